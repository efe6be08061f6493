use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sylve_lib::core::{
    planner::{PlanMode, ReplicationPlan},
    retention::Retained,
};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Source-initiated transfer towards a target
    Push,
    /// Puller-initiated transfer from a remote source
    Pull,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Running,
    Succeeded,
    Failed,
}

/// One immutable ledger row per attempted transfer.
///
/// Append-only; pruned only by retention. The ledger is the source of truth
/// for "did this ever work".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackupReplicationEvent {
    pub id: Uuid,
    pub direction: Direction,
    /// Remote endpoint address, `None` for local transfers
    pub remote_address: Option<String>,
    pub source_dataset: String,
    pub destination_dataset: String,
    pub base_snapshot: Option<String>,
    pub target_snapshot: Option<String>,
    pub mode: Option<PlanMode>,
    pub status: EventStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Originating job name, `None` for operator-issued runs
    pub job: Option<String>,
}

impl BackupReplicationEvent {
    pub fn begin(
        direction: Direction,
        remote_address: Option<String>,
        source_dataset: String,
        destination_dataset: String,
        job: Option<String>,
    ) -> Self {
        BackupReplicationEvent {
            id: Uuid::new_v4(),
            direction,
            remote_address,
            source_dataset,
            destination_dataset,
            base_snapshot: None,
            target_snapshot: None,
            mode: None,
            status: EventStatus::Running,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            job,
        }
    }

    /// Fill in the computed plan once planning has succeeded
    pub fn record_plan(&mut self, plan: &ReplicationPlan) {
        self.base_snapshot = plan.base.as_ref().map(|base| base.label.clone());
        self.target_snapshot = Some(plan.target.label.clone());
        self.mode = Some(plan.mode);
    }

    /// Transition to a terminal status
    pub fn complete(&mut self, error: Option<String>) {
        self.status = match error {
            Some(_) => EventStatus::Failed,
            None => EventStatus::Succeeded,
        };
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}

impl Retained for BackupReplicationEvent {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.started_at
    }
}
