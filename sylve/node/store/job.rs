use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::EventStatus;
use crate::config::job::JobConfig;

/// Scheduled replication intent plus last-run bookkeeping.
///
/// The definition half mirrors [`JobConfig`]; the bookkeeping half is
/// mutated by the orchestrator after each run and survives restarts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupJob {
    pub name: String,
    pub source_dataset: String,
    pub destination_dataset: String,
    pub target: Option<String>,
    pub schedule: String,
    pub force: bool,
    pub with_intermediates: bool,
    pub enabled: bool,

    pub last_status: Option<EventStatus>,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl BackupJob {
    /// Update the definition half from config, keeping the bookkeeping.
    /// A changed schedule resets the next run so it is recomputed.
    pub fn apply_config(&mut self, config: &JobConfig) {
        if self.schedule != config.schedule {
            self.next_run = None;
        }

        self.source_dataset = config.source_dataset.clone();
        self.destination_dataset = config.destination_dataset.clone();
        self.target = config.target.clone();
        self.schedule = config.schedule.clone();
        self.force = config.force;
        self.with_intermediates = config.with_intermediates;
        self.enabled = config.enabled;
    }
}

impl From<&JobConfig> for BackupJob {
    fn from(config: &JobConfig) -> Self {
        BackupJob {
            name: config.name.clone(),
            source_dataset: config.source_dataset.clone(),
            destination_dataset: config.destination_dataset.clone(),
            target: config.target.clone(),
            schedule: config.schedule.clone(),
            force: config.force,
            with_intermediates: config.with_intermediates,
            enabled: config.enabled,
            last_status: None,
            last_error: None,
            last_run: None,
            next_run: None,
        }
    }
}
