use serde::{Deserialize, Serialize};

const fn default_enabled() -> bool {
    true
}

/// Scheduled replication intent
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobConfig {
    /// Job name, unique across the config
    pub name: String,

    /// Source dataset name (for a jail, its root dataset)
    pub source_dataset: String,

    /// Destination dataset name on the target
    pub destination_dataset: String,

    /// Backup target name. `None` replicates to a local dataset.
    #[serde(default)]
    pub target: Option<String>,

    /// 5-field cron expression, evaluated in UTC
    pub schedule: String,

    /// Allow destructive rollback of a diverged destination
    #[serde(default)]
    pub force: bool,

    /// Ship every intermediate snapshot rather than only the latest delta
    #[serde(default)]
    pub with_intermediates: bool,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
