/// Backup target descriptors
pub mod target;

/// Scheduled replication jobs
pub mod job;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use job::JobConfig;
use target::TargetConfig;

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8445)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./db")
}

fn default_zfs_binary() -> PathBuf {
    PathBuf::from("zfs")
}

/// Default amount of seconds a cluster token stays valid
const fn default_token_ttl() -> u64 {
    3600
}

/// Default amount of seconds between scheduler ticks
const fn default_scheduler_timer() -> u64 {
    30
}

/// Default amount of seconds between ledger retention passes
const fn default_retention_timer() -> u64 {
    3600
}

/// Default amount of seconds between state snapshots
const fn default_persistence_timer() -> u64 {
    300
}

/// Server configuration
#[derive(Serialize, Deserialize)]
pub struct Config {
    /// Replication endpoint listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Directory holding the persisted job/ledger state
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path to the zfs binary
    #[serde(default = "default_zfs_binary")]
    pub zfs_binary: PathBuf,

    /// Cluster credential config
    pub cluster: ClusterConfig,

    /// Background job timers
    #[serde(default)]
    pub timers: Timers,

    /// Backup targets
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    /// Scheduled replication jobs
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Cluster identity and trust, issued by the cluster layer
#[derive(Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Shared secret used to sign and verify cluster tokens
    pub secret: String,

    /// Identity of this node, placed in the token subject
    pub node_id: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
}

#[derive(Serialize, Deserialize)]
pub struct Timers {
    #[serde(default = "default_scheduler_timer")]
    pub scheduler: u64,

    #[serde(default = "default_retention_timer")]
    pub retention: u64,

    #[serde(default = "default_persistence_timer")]
    pub persistence: u64,
}

impl Default for Timers {
    fn default() -> Self {
        Timers {
            scheduler: default_scheduler_timer(),
            retention: default_retention_timer(),
            persistence: default_persistence_timer(),
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            listen: default_listen(),
            data_dir: default_data_dir(),
            zfs_binary: default_zfs_binary(),
            cluster: ClusterConfig {
                secret: String::from("test-cluster-secret"),
                node_id: String::from("test-node"),
                token_ttl: default_token_ttl(),
            },
            timers: Timers::default(),
            targets: Vec::new(),
            jobs: Vec::new(),
        }
    }
}
