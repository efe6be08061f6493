use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ZFS-style globally unique snapshot/dataset id.
///
/// Stable across clones and renames, which makes it the only safe identity
/// for matching snapshots between two independent hosts.
pub type Guid = u64;

/// Named, versioned storage container owned by the storage engine.
///
/// The replication engine only ever reads these.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Hierarchical path name, e.g. `tank/vm/web`
    pub name: String,
    pub guid: Guid,
    /// Space used by the dataset and its descendants, in bytes
    pub used: u64,
    /// Space referenced by the dataset itself, in bytes
    pub referenced: u64,
    pub mountpoint: Option<String>,
    /// Origin snapshot if this dataset is a clone
    pub origin: Option<String>,
}

/// Immutable point-in-time view of a dataset, `<dataset>@<label>`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Dataset the snapshot belongs to
    pub dataset: String,
    /// Label after the `@`
    pub label: String,
    pub guid: Guid,
    pub created: DateTime<Utc>,
    /// Space used by the snapshot, in bytes
    pub used: u64,
}

impl Snapshot {
    /// Full `<dataset>@<label>` name
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.dataset, self.label)
    }
}

/// Latest snapshot of a chain ordered ascending by creation time
pub fn latest(chain: &[Snapshot]) -> Option<&Snapshot> {
    chain.last()
}

/// Earliest snapshot of a chain ordered ascending by creation time
pub fn earliest(chain: &[Snapshot]) -> Option<&Snapshot> {
    chain.first()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::Snapshot;

    #[test]
    fn test_full_name() {
        let snapshot = Snapshot {
            dataset: String::from("tank/vm"),
            label: String::from("daily-2026-08-25"),
            guid: 42,
            created: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            used: 1024,
        };

        assert_eq!(snapshot.full_name(), "tank/vm@daily-2026-08-25");
    }
}
