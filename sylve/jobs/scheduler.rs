use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sylve_lib::core::schedule::Schedule;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::node::{service::ServiceError, Manager};

fn next_run(schedule: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .parse::<Schedule>()
        .ok()
        .and_then(|schedule| schedule.next_after(after))
}

/// Dispatch every enabled job whose tick has arrived.
///
/// The next tick is bumped before the run is spawned, so a run outliving
/// the scheduler interval is not fired twice. Overlap with a still-running
/// pair is rejected by the pair lock inside the run itself.
async fn tick(manager: &Arc<Manager<'static>>, cancel: &CancellationToken) {
    let now = Utc::now();

    for job in manager.store().jobs().await {
        if !job.enabled {
            continue;
        }

        let due = match job.next_run {
            Some(next) => next <= now,
            None => {
                // Fresh job: schedule its first tick instead of firing
                // immediately
                let next = next_run(&job.schedule, now);

                manager
                    .store()
                    .update_job(&job.name, |job| job.next_run = next)
                    .await;

                continue;
            }
        };

        if !due {
            continue;
        }

        let next = next_run(&job.schedule, now);

        manager
            .store()
            .update_job(&job.name, |job| job.next_run = next)
            .await;

        let name = job.name.clone();
        let runner = manager.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            if let Err(ServiceError::AlreadyRunning(source, destination)) =
                runner.handle_job_run(&name, false, &cancel).await
            {
                warn!(
                    "Backup job \"{}\" skipped, {} -> {} is already replicating",
                    name, source, destination
                );
            }
        });
    }
}

/// Scheduler job spawner
///
/// Periodically scans the job table and dispatches due runs.
pub async fn spawn_scheduler(manager: &Arc<Manager<'static>>) {
    debug!("Spawning scheduler handler.");

    let timer = Duration::from_secs(manager.config.timers.scheduler);
    let cancel = CancellationToken::new();

    loop {
        sleep(timer).await;

        tick(manager, &cancel).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use tokio_util::sync::CancellationToken;

    use super::tick;
    use crate::{
        config::{job::JobConfig, Config},
        node::{store::event::EventStatus, zfs::StorageEngine, Manager},
        utils::testing::MemoryEngine,
    };

    fn job_config() -> JobConfig {
        JobConfig {
            name: String::from("nightly"),
            source_dataset: String::from("tank/a"),
            destination_dataset: String::from("tank/b"),
            target: None,
            schedule: String::from("*/5 * * * *"),
            force: false,
            with_intermediates: false,
            enabled: true,
        }
    }

    // Leak a config so the manager can be shared with spawned runs
    fn leaked_config() -> &'static Config {
        let mut config = Config::default();
        config.jobs.push(job_config());

        Box::leak(Box::new(config))
    }

    #[tokio::test]
    async fn test_fresh_job_is_scheduled_not_fired() {
        let config = leaked_config();
        let engine = Arc::new(MemoryEngine::default());
        let manager = Arc::new(Manager::with_engine(config, engine));
        manager.store().sync_jobs(&config.jobs).await;

        tick(&manager, &CancellationToken::new()).await;

        let job = manager.store().job("nightly").await.unwrap();
        assert!(job.next_run.is_some());
        assert!(job.next_run.unwrap() > Utc::now());
        assert!(manager.store().recent_events(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_due_job_is_dispatched() {
        let config = leaked_config();
        let engine = Arc::new(MemoryEngine::default());
        engine.add_dataset("tank/a", 1);
        engine.add_snapshot("tank/a", "one", 11, 100);

        let manager = Arc::new(Manager::with_engine(config, engine.clone()));
        manager.store().sync_jobs(&config.jobs).await;

        let past = Utc::now() - Duration::minutes(1);
        manager
            .store()
            .update_job("nightly", |job| job.next_run = Some(past))
            .await;

        tick(&manager, &CancellationToken::new()).await;

        // The tick was bumped past now before the run was spawned
        let job = manager.store().job("nightly").await.unwrap();
        assert!(job.next_run.unwrap() > Utc::now());

        // Wait for the spawned run to finish
        let mut done = false;
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;

            let events = manager.store().recent_events(10).await;
            if events.len() == 1 && events[0].status == EventStatus::Succeeded {
                done = true;
                break;
            }
        }
        assert!(done);

        assert_eq!(engine.list_snapshots("tank/b").await.unwrap().len(), 1);
    }
}
