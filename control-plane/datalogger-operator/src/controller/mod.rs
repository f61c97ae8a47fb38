use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Service},
};
use kube::{
    Client, ResourceExt,
    api::Api,
    runtime::{Controller, controller::Action, watcher::Config},
};
use tracing::{error, info};

use crate::config::OperatorConfig;
use crate::crd::{DataLogger, SpecError};
use crate::drift::HashError;
use crate::ownership::OwnershipError;
use crate::store::{KubeStore, ObjectKey, StoreError, TypeRegistry};

pub mod dispatch;
pub mod endpoint;
pub mod namespaces;
pub mod reconcile;
pub mod workload;

pub use reconcile::{FINALIZER, Lifecycle, PassOutcome, Reconciler};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Configuration(#[from] OwnershipError),
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("reconcile pass exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl ReconcileErr {
    /// Store lookup that found nothing; the only error any caller inspects.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileErr::Store(e) if e.is_not_found())
    }
}

/// Result of a single convergence write decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<K> {
    Created(K),
    Updated(K),
    Unchanged(K),
}

impl<K> Applied<K> {
    pub fn into_inner(self) -> K {
        match self {
            Applied::Created(k) | Applied::Updated(k) | Applied::Unchanged(k) => k,
        }
    }

    pub fn get(&self) -> &K {
        match self {
            Applied::Created(k) | Applied::Updated(k) | Applied::Unchanged(k) => k,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Applied::Unchanged(_))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Applied::Created(_) => "created",
            Applied::Updated(_) => "updated",
            Applied::Unchanged(_) => "unchanged",
        }
    }
}

pub struct ControllerContext {
    pub store: KubeStore,
    pub cfg: OperatorConfig,
}

impl ControllerContext {
    pub fn new(client: Client, cfg: OperatorConfig) -> Self {
        let registry = Arc::new(TypeRegistry::standard());
        let store = KubeStore::new(client, registry, &cfg.field_manager);
        Self { store, cfg }
    }
}

pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let (api, deployments, services): (
        Api<DataLogger>,
        Api<Deployment>,
        Api<Service>,
    ) = match cfg.watch_namespace.as_deref() {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (
            Api::all(client.clone()),
            Api::all(client.clone()),
            Api::all(client.clone()),
        ),
    };
    info!(namespace = ?cfg.watch_namespace, "starting DataLogger controller");
    let ctx = Arc::new(ControllerContext::new(client, cfg));

    Controller::new(api, Config::default())
        .owns(deployments, Config::default())
        .owns(services, Config::default())
        .shutdown_on_signal()
        .run(reconcile_data_logger, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(name = %obj_ref.name, ns = ?obj_ref.namespace, "reconciled: requeue={:?}", action)
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

pub async fn run_namespace_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    info!("starting Namespace fan-out controller");
    let ctx = Arc::new(ControllerContext::new(client, cfg));

    Controller::new(api, Config::default())
        .shutdown_on_signal()
        .run(reconcile_namespace, namespace_error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, _)) => {
                    info!(namespace = %obj_ref.name, "namespace fan-out reconciled")
                }
                Err(e) => error!(error = ?e, "namespace fan-out error"),
            }
        })
        .await;

    Ok(())
}

async fn reconcile_data_logger(
    obj: Arc<DataLogger>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let key = ObjectKey {
        namespace: obj.namespace(),
        name: obj.name_any(),
    };
    dispatch::dispatch_data_logger(&ctx.store, &ctx.cfg, &key).await?;
    Ok(Action::await_change())
}

async fn reconcile_namespace(
    obj: Arc<Namespace>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    dispatch::dispatch_namespace(&ctx.store, &ctx.cfg, &obj.name_any()).await?;
    Ok(Action::await_change())
}

fn error_policy(
    _obj: Arc<DataLogger>,
    _error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    dispatch::requeue_after_error(&ctx.cfg)
}

fn namespace_error_policy(
    _obj: Arc<Namespace>,
    _error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    dispatch::requeue_after_error(&ctx.cfg)
}
