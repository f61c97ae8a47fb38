//! Entry points invoked by the watch loops. Both fetch the triggering
//! object fresh from the store, so a pass always sees current state.

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument};

use super::namespaces;
use super::{PassOutcome, ReconcileErr, Reconciler};
use crate::config::OperatorConfig;
use crate::crd::DataLogger;
use crate::store::{ObjectKey, Store};

/// Fetch the DataLogger at `key` and run one reconcile pass. The fetch and
/// every call of the pass share one deadline.
///
/// Returns `Ok(None)` when the object is already gone.
#[instrument(skip_all, fields(key = %key))]
pub async fn dispatch_data_logger<S: Store>(
    store: &S,
    cfg: &OperatorConfig,
    key: &ObjectKey,
) -> Result<Option<PassOutcome>, ReconcileErr> {
    let deadline = cfg.pass_timeout();
    let res = tokio::time::timeout(deadline, data_logger_pass(store, cfg, key))
        .await
        .unwrap_or(Err(ReconcileErr::DeadlineExceeded(deadline)));
    match &res {
        Ok(outcome) => debug!(?outcome, "dispatch: pass complete"),
        Err(e) => error!(error = %e, "dispatch: pass failed"),
    }
    res
}

async fn data_logger_pass<S: Store>(
    store: &S,
    cfg: &OperatorConfig,
    key: &ObjectKey,
) -> Result<Option<PassOutcome>, ReconcileErr> {
    let dl: DataLogger = match store.get(key).await {
        Ok(dl) => dl,
        Err(e) if e.is_not_found() => {
            debug!("dispatch: DataLogger gone; nothing to do");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    Reconciler::new(store, &cfg.workload).reconcile(dl).await.map(Some)
}

/// Provision the tenants named by a Namespace's own labels.
///
/// Returns the number of namespaces created, or `Ok(None)` when the
/// triggering namespace no longer exists.
#[instrument(skip_all, fields(namespace = %name))]
pub async fn dispatch_namespace<S: Store>(
    store: &S,
    cfg: &OperatorConfig,
    name: &str,
) -> Result<Option<usize>, ReconcileErr> {
    let deadline = cfg.pass_timeout();
    let res = tokio::time::timeout(deadline, namespace_pass(store, name))
        .await
        .unwrap_or(Err(ReconcileErr::DeadlineExceeded(deadline)));
    match &res {
        Ok(Some(created)) if *created > 0 => {
            info!(created, "dispatch: tenant namespaces provisioned")
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "dispatch: namespace pass failed"),
    }
    res
}

async fn namespace_pass<S: Store>(store: &S, name: &str) -> Result<Option<usize>, ReconcileErr> {
    let ns: Namespace = match store.get(&ObjectKey::cluster(name)).await {
        Ok(ns) => ns,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let tenants = namespaces::tenant_namespaces(ns.labels());
    let applied = namespaces::provision(store, &tenants, None).await?;
    Ok(Some(applied.iter().filter(|a| a.is_write()).count()))
}

/// Uniform retry policy: every failure is retried after the same delay.
pub fn requeue_after_error(cfg: &OperatorConfig) -> Action {
    Action::requeue(cfg.requeue_delay())
}
