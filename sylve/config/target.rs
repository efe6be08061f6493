use serde::{Deserialize, Serialize};

const fn default_enabled() -> bool {
    true
}

/// Remote backup endpoint descriptor
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TargetConfig {
    /// Display name, referenced by jobs
    pub name: String,

    /// Network address, `host:port`
    pub address: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
