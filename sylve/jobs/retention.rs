use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use crate::node::Manager;

async fn execute_retention(manager: &Manager<'_>) {
    let deleted = manager.store().apply_retention(Utc::now()).await;

    if deleted > 0 {
        info!("History retention deleted {} events", deleted);
    }
}

/// Retention job spawner
///
/// Periodically downsamples the replication event ledger.
pub async fn spawn_retention(manager: &Manager<'_>) {
    debug!("Spawning retention handler.");

    let timer = Duration::from_secs(manager.config.timers.retention);

    loop {
        sleep(timer).await;

        execute_retention(manager).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use super::execute_retention;
    use crate::{
        node::{
            store::event::{BackupReplicationEvent, Direction},
            Manager,
        },
        utils::testing::{MemoryEngine, CONFIG},
    };

    fn event_at(age: Duration) -> BackupReplicationEvent {
        let mut event = BackupReplicationEvent::begin(
            Direction::Push,
            None,
            String::from("tank/a"),
            String::from("tank/b"),
            None,
        );
        event.started_at = Utc::now() - age;
        event.complete(None);
        event
    }

    #[tokio::test]
    async fn test_retention_prunes_old_events() {
        let manager = Manager::with_engine(&CONFIG, Arc::new(MemoryEngine::default()));

        manager.store().append_event(event_at(Duration::minutes(5))).await;
        manager.store().append_event(event_at(Duration::days(80))).await;

        execute_retention(&manager).await;

        let events = manager.store().recent_events(10).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].started_at > Utc::now() - Duration::hours(1));
    }
}
