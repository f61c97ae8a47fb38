use kube::Client;
use tokio::{task::JoinHandle, try_join};
use tracing::info;

use crate::{
    config::OperatorConfig,
    controller::{run_controller, run_namespace_controller},
};

/// Spawn the DataLogger controller loop.
pub fn spawn_controller(
    client: Client,
    cfg: OperatorConfig,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move { run_controller(client, cfg).await })
}

/// Spawn the Namespace fan-out loop, or a no-op task when the feature is off.
pub fn spawn_namespace_controller(
    client: Client,
    cfg: OperatorConfig,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        if !cfg.features.namespace_controller {
            info!("namespace controller disabled by configuration");
            return Ok(());
        }
        run_namespace_controller(client, cfg).await
    })
}

/// Start both controllers and wait until both finish.
pub async fn run_all(client: Client, cfg: OperatorConfig) -> anyhow::Result<()> {
    let controller = spawn_controller(client.clone(), cfg.clone());
    let namespaces = spawn_namespace_controller(client, cfg);

    let (c_res, n_res) = try_join!(controller, namespaces)?;
    c_res?;
    n_res?;
    Ok(())
}
