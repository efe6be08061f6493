use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::snapshot::{earliest, latest, Snapshot};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("source dataset has no snapshots")]
    NothingToSend,
    #[error("destination history diverged from source, no common snapshot")]
    Diverged,
    #[error("snapshot \"{0}\" not found in source chain")]
    SnapshotNotFound(String),
}

impl PlanError {
    /// Stable, greppable message code
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::NothingToSend => "nothing_to_send",
            PlanError::Diverged => "diverged",
            PlanError::SnapshotNotFound(_) => "snapshot_not_found",
        }
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Full,
    Incremental,
}

/// Planning switches taken from a job or an operator request
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Allow destructive rollback of a diverged destination
    pub force: bool,
    /// Ship every intermediate snapshot instead of only the latest delta
    pub with_intermediates: bool,
    /// Pin the transfer target to a labeled source snapshot instead of the latest
    pub target_label: Option<String>,
}

/// Computed transfer plan. Transient: recomputed on every run, never persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPlan {
    pub mode: PlanMode,
    pub source_dataset: String,
    pub destination_dataset: String,
    /// Incremental base, present only for [`PlanMode::Incremental`]
    pub base: Option<Snapshot>,
    pub target: Snapshot,
    pub with_intermediates: bool,
    /// Instructs the receiver to discard the destination's divergent history
    pub force_rollback: bool,
    /// Destination already holds the source's latest snapshot
    pub noop: bool,
}

/// Compute a transfer plan from the two sides' snapshot chains.
///
/// Both chains must be ordered ascending by creation time. The destination
/// chain is empty when the destination dataset does not exist yet. Snapshot
/// identity is matched by GUID, never by name, since labels may be reused
/// across divergent histories.
pub fn plan(
    source_dataset: &str,
    destination_dataset: &str,
    source: &[Snapshot],
    destination: &[Snapshot],
    options: &PlanOptions,
) -> PlanResult<ReplicationPlan> {
    if source.is_empty() {
        return Err(PlanError::NothingToSend);
    }

    let source = match options.target_label.as_deref() {
        Some(label) => {
            let position = source
                .iter()
                .position(|snapshot| snapshot.label == label)
                .ok_or_else(|| PlanError::SnapshotNotFound(label.to_string()))?;

            &source[..=position]
        }
        None => source,
    };

    let target = latest(source).expect("Source chain is not empty");

    if destination.is_empty() {
        let target = if options.with_intermediates {
            earliest(source).expect("Source chain is not empty")
        } else {
            target
        };

        return Ok(ReplicationPlan {
            mode: PlanMode::Full,
            source_dataset: source_dataset.to_string(),
            destination_dataset: destination_dataset.to_string(),
            base: None,
            target: target.clone(),
            with_intermediates: options.with_intermediates,
            force_rollback: false,
            noop: false,
        });
    }

    // Most recent destination snapshot with a GUID present in the source chain
    let base = destination
        .iter()
        .rev()
        .find_map(|candidate| source.iter().find(|s| s.guid == candidate.guid));

    match base {
        Some(base) => Ok(ReplicationPlan {
            noop: base.guid == target.guid,
            mode: PlanMode::Incremental,
            source_dataset: source_dataset.to_string(),
            destination_dataset: destination_dataset.to_string(),
            base: Some(base.clone()),
            target: target.clone(),
            with_intermediates: options.with_intermediates,
            force_rollback: false,
        }),
        None if options.force => Ok(ReplicationPlan {
            mode: PlanMode::Full,
            source_dataset: source_dataset.to_string(),
            destination_dataset: destination_dataset.to_string(),
            base: None,
            target: target.clone(),
            with_intermediates: options.with_intermediates,
            force_rollback: true,
            noop: false,
        }),
        None => Err(PlanError::Diverged),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{plan, PlanError, PlanMode, PlanOptions};
    use crate::core::snapshot::Snapshot;

    fn snapshot(dataset: &str, label: &str, guid: u64, created: i64) -> Snapshot {
        Snapshot {
            dataset: dataset.to_string(),
            label: label.to_string(),
            guid,
            created: Utc.timestamp_opt(created, 0).unwrap(),
            used: 0,
        }
    }

    fn source_chain() -> Vec<Snapshot> {
        vec![
            snapshot("tank/a", "1", 1, 100),
            snapshot("tank/a", "2", 2, 200),
            snapshot("tank/a", "3", 3, 300),
        ]
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(
            plan("tank/a", "tank/b", &[], &[], &PlanOptions::default()).unwrap_err(),
            PlanError::NothingToSend
        );
    }

    #[test]
    fn test_empty_destination_latest() {
        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &[],
            &PlanOptions::default(),
        )
        .unwrap();

        assert_eq!(result.mode, PlanMode::Full);
        assert_eq!(result.target.guid, 3);
        assert!(result.base.is_none());
        assert!(!result.force_rollback);
        assert!(!result.noop);
    }

    #[test]
    fn test_empty_destination_with_intermediates() {
        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &[],
            &PlanOptions {
                with_intermediates: true,
                ..PlanOptions::default()
            },
        )
        .unwrap();

        assert_eq!(result.mode, PlanMode::Full);
        assert_eq!(result.target.guid, 1);
    }

    #[test]
    fn test_incremental_from_common_base() {
        let destination = vec![snapshot("tank/b", "1", 1, 100)];

        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &destination,
            &PlanOptions::default(),
        )
        .unwrap();

        assert_eq!(result.mode, PlanMode::Incremental);
        assert_eq!(result.base.as_ref().unwrap().guid, 1);
        assert_eq!(result.target.guid, 3);
        assert!(!result.noop);
    }

    #[test]
    fn test_most_recent_common_base_wins() {
        let destination = vec![
            snapshot("tank/b", "1", 1, 100),
            snapshot("tank/b", "2", 2, 200),
        ];

        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &destination,
            &PlanOptions::default(),
        )
        .unwrap();

        assert_eq!(result.base.as_ref().unwrap().guid, 2);
    }

    #[test]
    fn test_base_matched_by_guid_not_name() {
        // Label "2" reused on the destination after a rollback, with a
        // different physical snapshot behind it
        let destination = vec![
            snapshot("tank/b", "1", 1, 100),
            snapshot("tank/b", "2", 99, 250),
        ];

        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &destination,
            &PlanOptions::default(),
        )
        .unwrap();

        assert_eq!(result.base.as_ref().unwrap().guid, 1);
    }

    #[test]
    fn test_noop_when_destination_is_current() {
        let destination = vec![
            snapshot("tank/b", "1", 1, 100),
            snapshot("tank/b", "2", 2, 200),
            snapshot("tank/b", "3", 3, 300),
        ];

        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &destination,
            &PlanOptions::default(),
        )
        .unwrap();

        assert!(result.noop);
    }

    #[test]
    fn test_diverged_without_force() {
        let destination = vec![snapshot("tank/b", "other", 77, 150)];

        assert_eq!(
            plan(
                "tank/a",
                "tank/b",
                &source_chain(),
                &destination,
                &PlanOptions::default()
            )
            .unwrap_err(),
            PlanError::Diverged
        );
    }

    #[test]
    fn test_diverged_with_force() {
        let destination = vec![snapshot("tank/b", "other", 77, 150)];

        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &destination,
            &PlanOptions {
                force: true,
                ..PlanOptions::default()
            },
        )
        .unwrap();

        assert_eq!(result.mode, PlanMode::Full);
        assert_eq!(result.target.guid, 3);
        assert!(result.force_rollback);
    }

    #[test]
    fn test_pinned_target_label() {
        let destination = vec![snapshot("tank/b", "1", 1, 100)];

        let result = plan(
            "tank/a",
            "tank/b",
            &source_chain(),
            &destination,
            &PlanOptions {
                target_label: Some(String::from("2")),
                ..PlanOptions::default()
            },
        )
        .unwrap();

        assert_eq!(result.target.guid, 2);
        assert_eq!(result.base.as_ref().unwrap().guid, 1);
    }

    #[test]
    fn test_pinned_target_label_missing() {
        assert_eq!(
            plan(
                "tank/a",
                "tank/b",
                &source_chain(),
                &[],
                &PlanOptions {
                    target_label: Some(String::from("nope")),
                    ..PlanOptions::default()
                }
            )
            .unwrap_err(),
            PlanError::SnapshotNotFound(String::from("nope"))
        );
    }

    #[test]
    fn test_replan_after_transfer_is_noop() {
        let source = source_chain();
        let destination = vec![snapshot("tank/b", "1", 1, 100)];

        let first = plan(
            "tank/a",
            "tank/b",
            &source,
            &destination,
            &PlanOptions::default(),
        )
        .unwrap();

        assert_eq!(first.base.as_ref().unwrap().guid, 1);
        assert_eq!(first.target.guid, 3);

        // Simulate a successful transfer of the planned target
        let mut destination = destination;
        destination.push(snapshot("tank/b", "3", 3, 300));

        let second = plan(
            "tank/a",
            "tank/b",
            &source,
            &destination,
            &PlanOptions::default(),
        )
        .unwrap();

        assert!(second.noop);
    }
}
