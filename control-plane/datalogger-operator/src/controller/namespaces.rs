//! Tenant namespace fan-out driven by label conventions: every label whose
//! key starts with `namespaces` names a namespace that must exist.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::workload::namespace_of;
use super::{Applied, ReconcileErr};
use crate::crd::{API_GROUP, DataLogger};
use crate::store::{ObjectKey, Store};

pub const NAMESPACE_LABEL_PREFIX: &str = "namespaces";
/// Never treated as a tenant label even though it could match the prefix rules.
pub const RESERVED_LABEL: &str = "name";
pub const OWNER_NAME_LABEL: &str = "app.datalogger.io/owner-name";
pub const OWNER_NAMESPACE_LABEL: &str = "app.datalogger.io/owner-namespace";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "datalogger-operator";

/// A namespace requested by one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantNamespace {
    pub label: String,
    pub name: String,
}

/// Tenant namespaces named by `labels`, in label-key order, first label wins
/// on duplicate targets; empty values are skipped.
pub fn tenant_namespaces(labels: &BTreeMap<String, String>) -> Vec<TenantNamespace> {
    let mut seen = BTreeSet::new();
    labels
        .iter()
        .filter(|(k, _)| k.as_str() != RESERVED_LABEL && k.starts_with(NAMESPACE_LABEL_PREFIX))
        .filter(|(_, v)| !v.is_empty())
        .filter(|(_, v)| seen.insert(v.to_string()))
        .map(|(k, v)| TenantNamespace {
            label: k.clone(),
            name: v.clone(),
        })
        .collect()
}

fn owner_labels(dl: &DataLogger) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_NAME_LABEL.to_string(), dl.name_any()),
        (OWNER_NAMESPACE_LABEL.to_string(), namespace_of(dl)),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ])
}

/// True when `ns` was provisioned on behalf of `dl`.
pub fn is_owned_by(ns: &Namespace, dl: &DataLogger) -> bool {
    let labels = ns.labels();
    owner_labels(dl)
        .iter()
        .filter(|(k, _)| k.starts_with(API_GROUP))
        .all(|(k, v)| labels.get(k) == Some(v))
}

fn new_namespace(name: &str, owner: Option<&DataLogger>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: owner.map(owner_labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Ensure every tenant exists. Newly created namespaces are labelled with
/// `owner` when given; existing ones are left untouched.
#[instrument(skip_all, fields(count = tenants.len()))]
pub async fn provision<S: Store>(
    store: &S,
    tenants: &[TenantNamespace],
    owner: Option<&DataLogger>,
) -> Result<Vec<Applied<Namespace>>, ReconcileErr> {
    let mut out = Vec::with_capacity(tenants.len());
    for tenant in tenants {
        let key = ObjectKey::cluster(tenant.name.clone());
        match store.get::<Namespace>(&key).await {
            Ok(existing) => {
                debug!(namespace = %tenant.name, label = %tenant.label, "namespace: exists");
                out.push(Applied::Unchanged(existing));
            }
            Err(e) if e.is_not_found() => {
                let created = store
                    .create(&new_namespace(&tenant.name, owner))
                    .await
                    .inspect_err(|e| {
                        error!(namespace = %tenant.name, error = %e, "namespace: create failed")
                    })?;
                info!(namespace = %tenant.name, label = %tenant.label, "namespace: created");
                out.push(Applied::Created(created));
            }
            Err(e) => {
                error!(namespace = %tenant.name, error = %e, "namespace: existence check failed");
                return Err(e.into());
            }
        }
    }
    Ok(out)
}

/// Delete every namespace provisioned on behalf of `owner`, found by its
/// owner labels so tenants dropped from the DataLogger's labels are still
/// released. Returns the delete count.
#[instrument(skip_all, fields(owner = %owner.name_any()))]
pub async fn release<S: Store>(store: &S, owner: &DataLogger) -> Result<usize, ReconcileErr> {
    let owned: Vec<Namespace> = store.list(None, &owner_labels(owner)).await?;
    let mut deleted = 0;
    for ns in owned.iter().filter(|ns| is_owned_by(ns, owner)) {
        let name = ns.name_any();
        match store.delete(ns).await {
            Ok(()) => {
                info!(namespace = %name, "namespace: deleted");
                deleted += 1;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(namespace = %name, error = %e, "namespace: delete failed");
                return Err(e.into());
            }
        }
    }
    Ok(deleted)
}
