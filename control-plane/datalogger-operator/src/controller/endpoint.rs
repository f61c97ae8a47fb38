use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info, instrument, trace, warn};

use super::workload::{APP_LABEL, child_key, namespace_of};
use super::{Applied, ReconcileErr};
use crate::crd::DataLogger;
use crate::drift::{self, diff};
use crate::ownership::{is_controlled_by, set_controller_reference, set_owner_reference};
use crate::store::{Store, TypeRegistry};

/// Desired NodePort Service for `dl`, controlled by `workload` and
/// additionally owned by `dl` itself.
pub fn desired_endpoint(
    registry: &TypeRegistry,
    dl: &DataLogger,
    workload: &Deployment,
) -> Result<Service, ReconcileErr> {
    let labels = BTreeMap::from([(APP_LABEL.to_string(), dl.spec.custom_name.clone())]);
    let mut svc = Service {
        metadata: ObjectMeta {
            name: Some(dl.spec.custom_name.clone()),
            namespace: Some(namespace_of(dl)),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".into()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".into()),
                port: dl.spec.port,
                target_port: (dl.spec.target_port != 0)
                    .then_some(IntOrString::Int(dl.spec.target_port)),
                node_port: (dl.spec.node_port != 0).then_some(dl.spec.node_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    set_controller_reference(registry, workload, &mut svc)?;
    set_owner_reference(registry, dl, &mut svc)?;
    Ok(svc)
}

/// Converge the Endpoint. Requires the Workload to exist: any failure to
/// fetch it aborts the pass.
#[instrument(skip_all, fields(ns = %namespace_of(dl), name = %dl.spec.custom_name))]
pub async fn converge<S: Store>(
    store: &S,
    dl: &DataLogger,
) -> Result<Applied<Service>, ReconcileErr> {
    let key = child_key(dl);
    let workload: Deployment = store.get(&key).await.inspect_err(|e| {
        warn!(%key, error = %e, "endpoint: workload unavailable; aborting");
    })?;

    let mut desired = desired_endpoint(store.registry(), dl, &workload)?;
    drift::compute_hash(&mut desired)?;

    match store.get::<Service>(&key).await {
        Err(e) if e.is_not_found() => {
            let created = store.create(&desired).await?;
            info!(%key, "endpoint: created");
            Ok(Applied::Created(created))
        }
        Err(e) => Err(e.into()),
        Ok(current) => {
            let controlled = is_controlled_by(&current, &workload);
            if controlled && drift::equal(&desired, &current)? {
                trace!(%key, "endpoint: up to date");
                return Ok(Applied::Unchanged(current));
            }
            if let Ok(patch) = diff::describe(&current, &desired) {
                debug!(%key, controlled, %patch, "endpoint: drift detected");
            }
            desired.metadata.resource_version = current.metadata.resource_version.clone();
            carry_allocated_ips(&current, &mut desired);
            let updated = store.update(&desired).await?;
            info!(%key, controlled, "endpoint: updated");
            Ok(Applied::Updated(updated))
        }
    }
}

/// Keep the cluster IPs the store allocated; they are immutable once set.
fn carry_allocated_ips(current: &Service, desired: &mut Service) {
    let (Some(cur), Some(want)) = (current.spec.as_ref(), desired.spec.as_mut()) else {
        return;
    };
    want.cluster_ip = cur.cluster_ip.clone();
    want.cluster_ips = cur.cluster_ips.clone();
}
