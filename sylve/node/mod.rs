/// Cluster token issuing and verification
pub mod auth;
/// Per-pair replication locks
pub mod locks;
/// Node-to-node replication protocol
pub mod replication;
/// Replication orchestration
pub mod service;
/// Job bookkeeping and event ledger
pub mod store;
/// Streaming transfer primitive
pub mod transfer;
/// Storage engine driver
pub mod zfs;

use std::sync::Arc;

use crate::config::{target::TargetConfig, Config};
use locks::PairLocks;
use store::{Store, StoreResult};
use zfs::{StorageEngine, Zfs};

/// Backup node state: configuration, storage engine, persisted store and
/// replication locks
pub struct Manager<'a> {
    /// Node configuration
    pub config: &'a Config,
    engine: Arc<dyn StorageEngine>,
    store: Store,
    locks: PairLocks,
}

impl<'a> Manager<'a> {
    pub fn new(config: &'a Config) -> Manager<'a> {
        Manager::with_engine(config, Arc::new(Zfs::new(config.zfs_binary.clone())))
    }

    /// Manager backed by a custom storage engine (used by tests)
    pub fn with_engine(config: &'a Config, engine: Arc<dyn StorageEngine>) -> Manager<'a> {
        Manager {
            config,
            engine,
            store: Store::default(),
            locks: PairLocks::default(),
        }
    }

    pub fn engine(&self) -> &dyn StorageEngine {
        &*self.engine
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn locks(&self) -> &PairLocks {
        &self.locks
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.config
            .targets
            .iter()
            .find(|target| target.name == name)
    }

    /// Load persisted state from the data directory.
    ///
    /// Jobs are reconciled with the configuration afterwards even when
    /// loading failed, so a fresh node starts with its configured jobs.
    pub async fn load_from_fs(&self) -> StoreResult<()> {
        let result = self.store.load(&self.config.data_dir).await;
        self.store.sync_jobs(&self.config.jobs).await;
        result
    }

    pub async fn persist(&self) -> StoreResult<()> {
        self.store.persist(&self.config.data_dir).await
    }
}
