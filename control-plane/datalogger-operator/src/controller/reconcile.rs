use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use super::namespaces;
use super::workload::{child_key, namespace_of};
use super::{ReconcileErr, endpoint, workload};
use crate::config::WorkloadConfig;
use crate::crd::DataLogger;
use crate::ownership::{has_owner_reference, is_controlled_by};
use crate::store::{Managed, ObjectKey, Store, kind_of};

/// Marker blocking DataLogger removal until its children are gone.
pub const FINALIZER: &str = "app.datalogger.io/finalizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No deletion requested.
    Active,
    /// Deletion requested, cleanup still pending.
    Terminating,
    /// Deletion requested and our finalizer is gone; nothing left to do.
    Finalized,
}

impl Lifecycle {
    pub fn of(dl: &DataLogger) -> Self {
        if dl.metadata.deletion_timestamp.is_none() {
            Lifecycle::Active
        } else if has_finalizer(dl) {
            Lifecycle::Terminating
        } else {
            Lifecycle::Finalized
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Children converged; `writes` counts creates and updates issued.
    Converged { writes: usize },
    /// Children deleted and the finalizer released.
    Finalized,
    /// Already finalized; no calls were made.
    Skipped,
}

fn has_finalizer(dl: &DataLogger) -> bool {
    dl.finalizers().iter().any(|f| f == FINALIZER)
}

fn finalizer_count(dl: &DataLogger) -> usize {
    dl.finalizers().iter().filter(|f| *f == FINALIZER).count()
}

/// Drives one DataLogger through a single reconcile pass.
pub struct Reconciler<'a, S> {
    store: &'a S,
    workload: &'a WorkloadConfig,
}

impl<'a, S: Store> Reconciler<'a, S> {
    pub fn new(store: &'a S, workload: &'a WorkloadConfig) -> Self {
        Self { store, workload }
    }

    #[instrument(skip_all, fields(ns = %namespace_of(&dl), name = %dl.name_any()))]
    pub async fn reconcile(&self, dl: DataLogger) -> Result<PassOutcome, ReconcileErr> {
        match Lifecycle::of(&dl) {
            Lifecycle::Active => {
                dl.spec.validate()?;
                let dl = self.ensure_finalizer(dl).await?;
                self.converge(&dl).await
            }
            Lifecycle::Terminating => self.finalize(dl).await,
            Lifecycle::Finalized => {
                info!("reconcile: already finalized; nothing to do");
                Ok(PassOutcome::Skipped)
            }
        }
    }

    /// Rewrite `finalizers` so our marker appears exactly once.
    async fn ensure_finalizer(&self, mut dl: DataLogger) -> Result<DataLogger, ReconcileErr> {
        if finalizer_count(&dl) == 1 {
            return Ok(dl);
        }
        info!("reconcile: adding finalizer");
        let finalizers = dl.finalizers_mut();
        finalizers.retain(|f| f != FINALIZER);
        finalizers.push(FINALIZER.to_string());
        Ok(self.store.update(&dl).await?)
    }

    async fn converge(&self, dl: &DataLogger) -> Result<PassOutcome, ReconcileErr> {
        let workload = workload::converge(self.store, dl, self.workload).await?;
        let endpoint = endpoint::converge(self.store, dl).await?;
        let tenants = namespaces::tenant_namespaces(dl.labels());
        let provisioned = namespaces::provision(self.store, &tenants, Some(dl)).await?;

        let writes = [workload.is_write(), endpoint.is_write()]
            .into_iter()
            .chain(provisioned.iter().map(|n| n.is_write()))
            .filter(|w| *w)
            .count();
        info!(
            workload = workload.verb(),
            endpoint = endpoint.verb(),
            tenants = tenants.len(),
            writes,
            "reconcile: converged"
        );
        Ok(PassOutcome::Converged { writes })
    }

    /// Delete children in dependency order, then release the finalizer.
    /// Only children this DataLogger owns are touched. Any failure leaves the
    /// finalizer in place for the next pass.
    async fn finalize(&self, mut dl: DataLogger) -> Result<PassOutcome, ReconcileErr> {
        info!("reconcile: deletion requested; tearing down children");
        let key = child_key(&dl);
        let workload: Option<Deployment> = self.fetch_child(&key).await?;
        let workload = workload.filter(|w| {
            let owned = is_controlled_by(w, &dl);
            if !owned {
                warn!(%key, "reconcile: workload not controlled by this DataLogger; keeping");
            }
            owned
        });

        let endpoint: Option<Service> = self.fetch_child(&key).await?;
        if let Some(svc) = endpoint {
            let owned = has_owner_reference(&svc, &dl)
                || workload.as_ref().is_some_and(|w| is_controlled_by(&svc, w));
            if owned {
                self.delete_child(&key, &svc).await?;
            } else {
                warn!(%key, "reconcile: endpoint not owned by this DataLogger; keeping");
            }
        }
        if let Some(w) = &workload {
            self.delete_child(&key, w).await?;
        }
        namespaces::release(self.store, &dl).await?;

        dl.finalizers_mut().retain(|f| f != FINALIZER);
        self.store.update(&dl).await?;
        info!("reconcile: finalizer removed");
        Ok(PassOutcome::Finalized)
    }

    async fn fetch_child<K: Managed>(&self, key: &ObjectKey) -> Result<Option<K>, ReconcileErr> {
        match self.store.get(key).await {
            Ok(child) => Ok(Some(child)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_child<K: Managed>(&self, key: &ObjectKey, child: &K) -> Result<(), ReconcileErr> {
        match self.store.delete(child).await {
            Ok(()) => {
                info!(%key, kind = %kind_of::<K>(), "reconcile: child deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                warn!(%key, kind = %kind_of::<K>(), error = %e, "reconcile: child delete failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DataLoggerSpec;

    fn dl(deleting: bool, finalizers: &[&str]) -> DataLogger {
        let mut dl = DataLogger::new("logger", DataLoggerSpec::default());
        dl.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        if deleting {
            dl.metadata.deletion_timestamp =
                Some(serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap());
        }
        dl
    }

    #[test]
    fn lifecycle_follows_deletion_and_finalizer() {
        assert_eq!(Lifecycle::of(&dl(false, &[])), Lifecycle::Active);
        assert_eq!(Lifecycle::of(&dl(false, &[FINALIZER])), Lifecycle::Active);
        assert_eq!(Lifecycle::of(&dl(true, &[FINALIZER])), Lifecycle::Terminating);
        assert_eq!(Lifecycle::of(&dl(true, &["other"])), Lifecycle::Finalized);
        assert_eq!(Lifecycle::of(&dl(true, &[])), Lifecycle::Finalized);
    }

    #[test]
    fn finalizer_count_sees_duplicates() {
        assert_eq!(finalizer_count(&dl(false, &[FINALIZER, "x", FINALIZER])), 2);
        assert!(!has_finalizer(&dl(false, &["x"])));
    }
}
