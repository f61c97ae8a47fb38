#![allow(dead_code)]

use std::collections::BTreeMap;

use datalogger_operator::config::OperatorConfig;
use datalogger_operator::crd::{DataLogger, DataLoggerSpec};
use datalogger_operator::store::{MemoryStore, ObjectKey};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub const NS: &str = "default";

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn app1_spec() -> DataLoggerSpec {
    DataLoggerSpec {
        custom_name: "app1".into(),
        replicas: 2,
        port: 8080,
        node_port: 30080,
        target_port: 80,
    }
}

pub fn data_logger(name: &str, spec: DataLoggerSpec) -> DataLogger {
    let mut dl = DataLogger::new(name, spec);
    dl.metadata.namespace = Some(NS.into());
    dl
}

pub fn with_labels(mut dl: DataLogger, labels: &[(&str, &str)]) -> DataLogger {
    dl.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    dl
}

pub fn key_of(dl: &DataLogger) -> ObjectKey {
    ObjectKey::namespaced(NS, dl.metadata.name.clone().unwrap_or_default())
}

pub fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z"))
        .expect("valid RFC 3339 timestamp")
}

/// Simulate an external delete request on a stored DataLogger.
pub async fn request_deletion(store: &MemoryStore, key: &ObjectKey) -> DataLogger {
    let mut dl: DataLogger = store.peek(key).await.expect("stored DataLogger");
    dl.metadata.deletion_timestamp = Some(deletion_time());
    store.insert(dl).await.expect("reseed DataLogger")
}

pub fn test_config() -> OperatorConfig {
    OperatorConfig::default()
}

/// Issue a real delete; the finalizer keeps the object around.
pub async fn request_deletion_in_cluster(key: &ObjectKey) {
    use kube::{Api, Client, api::DeleteParams};
    let client = Client::try_default().await.expect("kube client");
    let api: Api<DataLogger> = Api::namespaced(client, key.namespace.as_deref().unwrap_or(NS));
    api.delete(&key.name, &DeleteParams::default())
        .await
        .expect("delete DataLogger");
}
