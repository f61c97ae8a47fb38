use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use tracing::{debug, info, instrument, trace, warn};

use super::{Applied, ReconcileErr};
use crate::config::WorkloadConfig;
use crate::crd::DataLogger;
use crate::drift::{self, diff};
use crate::ownership::{ensure_adoptable, set_controller_reference};
use crate::store::{ObjectKey, Store};

pub const APP_LABEL: &str = "app";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
const DEFAULT_APP_NAME: &str = "datalogger";

/// Namespace the DataLogger and all of its namespaced children live in.
pub fn namespace_of(dl: &DataLogger) -> String {
    dl.namespace().unwrap_or_else(|| "default".to_string())
}

/// Key shared by the Workload and Endpoint of `dl`.
pub fn child_key(dl: &DataLogger) -> ObjectKey {
    ObjectKey::namespaced(namespace_of(dl), dl.spec.custom_name.clone())
}

/// Pod labels; also used verbatim as the Deployment selector.
pub fn selector_labels(dl: &DataLogger) -> BTreeMap<String, String> {
    let labels = dl.labels();
    let name = labels
        .get(NAME_LABEL)
        .cloned()
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
    let instance = labels.get(INSTANCE_LABEL).cloned().unwrap_or_else(|| dl.name_any());
    BTreeMap::from([
        (NAME_LABEL.to_string(), name),
        (INSTANCE_LABEL.to_string(), instance),
        (APP_LABEL.to_string(), dl.spec.custom_name.clone()),
    ])
}

/// Desired Deployment for `dl`, without ownership or hash.
pub fn desired_workload(dl: &DataLogger, settings: &WorkloadConfig) -> Deployment {
    let labels = selector_labels(dl);
    Deployment {
        metadata: ObjectMeta {
            name: Some(dl.spec.custom_name.clone()),
            namespace: Some(namespace_of(dl)),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(dl.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: settings.container_name.clone(),
                        image: Some(settings.image.clone()),
                        env: Some(vec![EnvVar {
                            name: "CUSTOM_NAME".into(),
                            value: Some(dl.spec.custom_name.clone()),
                            ..Default::default()
                        }]),
                        ports: Some(vec![ContainerPort {
                            container_port: settings.app_port,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the Workload when missing, update it when its content hash drifted.
#[instrument(skip_all, fields(ns = %namespace_of(dl), name = %dl.spec.custom_name))]
pub async fn converge<S: Store>(
    store: &S,
    dl: &DataLogger,
    settings: &WorkloadConfig,
) -> Result<Applied<Deployment>, ReconcileErr> {
    let mut desired = desired_workload(dl, settings);
    set_controller_reference(store.registry(), dl, &mut desired)?;
    drift::compute_hash(&mut desired)?;

    let key = child_key(dl);
    match store.get::<Deployment>(&key).await {
        Err(e) if e.is_not_found() => {
            let created = store.create(&desired).await?;
            info!(%key, "workload: created");
            Ok(Applied::Created(created))
        }
        Err(e) => Err(e.into()),
        Ok(current) => {
            ensure_adoptable(&current, dl).inspect_err(|e| {
                warn!(%key, error = %e, "workload: owned by another controller");
            })?;
            if drift::equal(&desired, &current)? {
                trace!(%key, "workload: up to date");
                return Ok(Applied::Unchanged(current));
            }
            if let Ok(patch) = diff::describe(&current, &desired) {
                debug!(%key, %patch, "workload: drift detected");
            }
            desired.metadata.resource_version = current.metadata.resource_version.clone();
            let updated = store.update(&desired).await?;
            info!(%key, "workload: updated");
            Ok(Applied::Updated(updated))
        }
    }
}
