use std::time::Duration;

use tokio::time::sleep;

use crate::node::Manager;

/// Persistence job spawner
///
/// Periodically saves the job table and event ledger to the data directory.
pub async fn spawn_persistence(manager: &Manager<'_>) {
    debug!("Spawning persistence handler.");

    let timer = Duration::from_secs(manager.config.timers.persistence);

    loop {
        sleep(timer).await;

        if let Err(e) = manager.persist().await {
            error!("Unable to persist node state: {}", e);
        }
    }
}
