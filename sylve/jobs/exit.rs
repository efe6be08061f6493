use std::process::exit;

use tokio::signal::ctrl_c;

use crate::node::Manager;

/// Ctrl-C handler
///
/// Listens to Ctrl-C signal, and after receiving one persists node state
/// before exiting.
pub async fn spawn_ctrlc_handler(manager: &Manager<'_>) {
    debug!("Spawning Ctrl-C handler");

    ctrl_c().await.expect("Unable to listen to Ctrl-C signal.");

    if let Err(e) = manager.persist().await {
        error!("Unable to persist node state: {}", e);
    }

    exit(0);
}
