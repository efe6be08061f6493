use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use bincode::{deserialize, serialize};
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use sylve_lib::core::snapshot::{Dataset, Guid, Snapshot};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    config::Config,
    node::zfs::{StorageEngine, ZfsError, ZfsResult},
};

pub static CONFIG: Lazy<Config> = Lazy::new(Config::default);

struct MemoryDataset {
    dataset: Dataset,
    snapshots: Vec<Snapshot>,
}

/// In-memory storage engine.
///
/// A "stream" is the bincode-serialized list of shipped snapshots, which
/// lets receive reconstruct the destination chain the way a real engine
/// would apply a send stream.
#[derive(Default)]
pub struct MemoryEngine {
    datasets: Mutex<BTreeMap<String, MemoryDataset>>,
    guid_counter: AtomicU64,
    fail_sends: AtomicBool,
}

impl MemoryEngine {
    pub fn add_dataset(&self, name: &str, guid: Guid) {
        self.datasets
            .lock()
            .expect("Engine state poisoned")
            .insert(
                name.to_string(),
                MemoryDataset {
                    dataset: Dataset {
                        name: name.to_string(),
                        guid,
                        used: 0,
                        referenced: 0,
                        mountpoint: None,
                        origin: None,
                    },
                    snapshots: Vec::new(),
                },
            );
    }

    pub fn add_snapshot(&self, dataset: &str, label: &str, guid: Guid, created: i64) {
        let mut datasets = self.datasets.lock().expect("Engine state poisoned");
        let entry = datasets
            .get_mut(dataset)
            .expect("Dataset is not registered");

        entry.snapshots.push(Snapshot {
            dataset: dataset.to_string(),
            label: label.to_string(),
            guid,
            created: Utc.timestamp_opt(created, 0).unwrap(),
            used: 0,
        });
        entry.snapshots.sort_by_key(|snapshot| snapshot.created);
    }

    /// Make every subsequent send fail before writing any data
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    fn shipped(
        &self,
        target: &Snapshot,
        base: Option<&Snapshot>,
        intermediates: bool,
    ) -> ZfsResult<Vec<Snapshot>> {
        let datasets = self.datasets.lock().expect("Engine state poisoned");
        let chain = &datasets
            .get(&target.dataset)
            .ok_or_else(|| ZfsError::DatasetNotFound(target.dataset.clone()))?
            .snapshots;

        let target_index = chain
            .iter()
            .position(|snapshot| snapshot.guid == target.guid)
            .ok_or(ZfsError::SnapshotNotFound(target.guid))?;

        match base {
            None => Ok(vec![chain[target_index].clone()]),
            Some(base) => {
                let base_index = chain
                    .iter()
                    .position(|snapshot| snapshot.guid == base.guid)
                    .ok_or(ZfsError::SnapshotNotFound(base.guid))?;

                let range = &chain[base_index + 1..=target_index];

                if intermediates {
                    Ok(range.to_vec())
                } else {
                    Ok(range.last().into_iter().cloned().collect())
                }
            }
        }
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn list_datasets(&self, prefix: Option<&str>) -> ZfsResult<Vec<Dataset>> {
        Ok(self
            .datasets
            .lock()
            .expect("Engine state poisoned")
            .values()
            .map(|entry| entry.dataset.clone())
            .filter(|dataset| match prefix {
                Some(prefix) => dataset.name.starts_with(prefix),
                None => true,
            })
            .collect())
    }

    async fn list_snapshots(&self, dataset: &str) -> ZfsResult<Vec<Snapshot>> {
        self.datasets
            .lock()
            .expect("Engine state poisoned")
            .get(dataset)
            .map(|entry| entry.snapshots.clone())
            .ok_or_else(|| ZfsError::DatasetNotFound(dataset.to_string()))
    }

    async fn snapshot_by_guid(&self, guid: Guid) -> ZfsResult<Snapshot> {
        self.datasets
            .lock()
            .expect("Engine state poisoned")
            .values()
            .flat_map(|entry| entry.snapshots.iter())
            .find(|snapshot| snapshot.guid == guid)
            .cloned()
            .ok_or(ZfsError::SnapshotNotFound(guid))
    }

    async fn send(
        &self,
        target: &Snapshot,
        base: Option<&Snapshot>,
        intermediates: bool,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ZfsResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ZfsError::CommandFailed(String::from(
                "simulated send failure",
            )));
        }

        let shipped = self.shipped(target, base, intermediates)?;

        let payload =
            serialize(&shipped).map_err(|e| ZfsError::InvalidOutput(e.to_string()))?;

        output
            .write_all(&payload)
            .await
            .map_err(ZfsError::StreamError)?;

        Ok(())
    }

    async fn receive(
        &self,
        dataset: &str,
        force_rollback: bool,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> ZfsResult<()> {
        let mut payload = Vec::new();
        input
            .read_to_end(&mut payload)
            .await
            .map_err(ZfsError::StreamError)?;

        let shipped: Vec<Snapshot> =
            deserialize(&payload).map_err(|e| ZfsError::InvalidOutput(e.to_string()))?;

        let mut datasets = self.datasets.lock().expect("Engine state poisoned");

        let entry = datasets.entry(dataset.to_string()).or_insert_with(|| {
            MemoryDataset {
                dataset: Dataset {
                    name: dataset.to_string(),
                    guid: 9000 + self.guid_counter.fetch_add(1, Ordering::SeqCst),
                    used: 0,
                    referenced: 0,
                    mountpoint: None,
                    origin: None,
                },
                snapshots: Vec::new(),
            }
        });

        if force_rollback {
            entry.snapshots.clear();
        }

        for snapshot in shipped {
            if entry
                .snapshots
                .iter()
                .any(|existing| existing.guid == snapshot.guid)
            {
                continue;
            }

            entry.snapshots.push(Snapshot {
                dataset: dataset.to_string(),
                ..snapshot
            });
        }

        entry.snapshots.sort_by_key(|snapshot| snapshot.created);

        Ok(())
    }
}
