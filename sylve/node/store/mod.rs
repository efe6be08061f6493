/// Ledger rows
pub mod event;

/// Job state
pub mod job;

use std::{collections::HashMap, io::Error as IoError, path::Path};

use bincode::{deserialize, serialize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sylve_lib::core::retention::apply_retention;
use thiserror::Error;
use tokio::{
    fs::{create_dir_all, read, write},
    sync::Mutex,
};
use uuid::Uuid;

use crate::config::job::JobConfig;
use event::{BackupReplicationEvent, EventStatus};
use job::BackupJob;

const STORE_FILE: &str = "sylve-backup.db";

/// Upper bound on one status page
pub const MAX_STATUS_PAGE: usize = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unable to read state from file: {0}")]
    FileReadError(IoError),
    #[error("Unable to write state to file: {0}")]
    FileWriteError(IoError),
    #[error("Invalid state file format: {0}")]
    InvalidFileFormat(bincode::Error),
    #[error("Unable to serialize state: {0}")]
    SerializationError(bincode::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Serialize, Deserialize, Default)]
struct StoreSnapshot {
    jobs: Vec<BackupJob>,
    events: Vec<BackupReplicationEvent>,
}

/// In-memory jobs and replication ledger, snapshotted to a bincode file.
///
/// Events are held in append order, which for any one dataset pair equals
/// start-time order since the pair lock serializes runs.
#[derive(Default)]
pub struct Store {
    jobs: Mutex<HashMap<String, BackupJob>>,
    events: Mutex<Vec<BackupReplicationEvent>>,
}

impl Store {
    pub async fn load(&self, directory: &Path) -> StoreResult<()> {
        let mut snapshot: StoreSnapshot = deserialize(
            &read(directory.join(STORE_FILE))
                .await
                .map_err(StoreError::FileReadError)?,
        )
        .map_err(StoreError::InvalidFileFormat)?;

        // A row persisted mid-run belongs to a transfer that no longer
        // exists; fail it so the pair can run again
        for event in &mut snapshot.events {
            if event.status == EventStatus::Running {
                warn!(
                    "Failing interrupted {:?} run {} -> {}",
                    event.direction, event.source_dataset, event.destination_dataset
                );
                event.complete(Some(String::from("interrupted by node shutdown")));
            }
        }

        *self.jobs.lock().await = snapshot
            .jobs
            .into_iter()
            .map(|job| (job.name.clone(), job))
            .collect();
        *self.events.lock().await = snapshot.events;

        Ok(())
    }

    pub async fn persist(&self, directory: &Path) -> StoreResult<()> {
        create_dir_all(directory)
            .await
            .map_err(StoreError::FileWriteError)?;

        let snapshot = StoreSnapshot {
            jobs: self.jobs.lock().await.values().cloned().collect(),
            events: self.events.lock().await.clone(),
        };

        write(
            directory.join(STORE_FILE),
            serialize(&snapshot).map_err(StoreError::SerializationError)?,
        )
        .await
        .map_err(StoreError::FileWriteError)
    }

    /// Reconcile job state with config: new jobs are added, existing jobs
    /// keep their bookkeeping, jobs removed from config are dropped
    pub async fn sync_jobs(&self, configs: &[JobConfig]) {
        let mut jobs = self.jobs.lock().await;

        let mut synced = HashMap::with_capacity(configs.len());

        for config in configs {
            let job = match jobs.remove(&config.name) {
                Some(mut job) => {
                    job.apply_config(config);
                    job
                }
                None => BackupJob::from(config),
            };

            synced.insert(config.name.clone(), job);
        }

        *jobs = synced;
    }

    pub async fn job(&self, name: &str) -> Option<BackupJob> {
        self.jobs.lock().await.get(name).cloned()
    }

    pub async fn jobs(&self) -> Vec<BackupJob> {
        let mut jobs = self.jobs.lock().await.values().cloned().collect::<Vec<_>>();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub async fn update_job<F>(&self, name: &str, update: F)
    where
        F: FnOnce(&mut BackupJob),
    {
        if let Some(job) = self.jobs.lock().await.get_mut(name) {
            update(job);
        }
    }

    pub async fn append_event(&self, event: BackupReplicationEvent) {
        self.events.lock().await.push(event);
    }

    pub async fn update_event<F>(&self, id: Uuid, update: F)
    where
        F: FnOnce(&mut BackupReplicationEvent),
    {
        if let Some(event) = self
            .events
            .lock()
            .await
            .iter_mut()
            .find(|event| event.id == id)
        {
            update(event);
        }
    }

    /// Newest-first page of ledger rows, clamped to [`MAX_STATUS_PAGE`]
    pub async fn recent_events(&self, limit: usize) -> Vec<BackupReplicationEvent> {
        self.events
            .lock()
            .await
            .iter()
            .rev()
            .take(limit.min(MAX_STATUS_PAGE))
            .cloned()
            .collect()
    }

    /// Downsample the ledger, returning the amount of deleted rows
    pub async fn apply_retention(&self, now: DateTime<Utc>) -> usize {
        let mut events = self.events.lock().await;

        let outcome = apply_retention(now, &events);
        let delete = outcome.delete.into_iter().collect::<std::collections::HashSet<_>>();

        events.retain(|event| !delete.contains(&event.id));

        delete.len()
    }
}
