use std::{io::Error as IoError, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sylve_lib::core::snapshot::{Dataset, Guid, Snapshot};
use thiserror::Error;
use tokio::{
    io::{copy, AsyncRead, AsyncWrite, AsyncWriteExt},
    process::Command,
};

#[derive(Error, Debug)]
pub enum ZfsError {
    #[error("storage engine unavailable: {0}")]
    StorageUnavailable(IoError),
    #[error("zfs command failed: {0}")]
    CommandFailed(String),
    #[error("dataset \"{0}\" does not exist")]
    DatasetNotFound(String),
    #[error("snapshot with guid {0} not found")]
    SnapshotNotFound(Guid),
    #[error("unexpected zfs output: {0}")]
    InvalidOutput(String),
    #[error("snapshot stream error: {0}")]
    StreamError(IoError),
}

impl ZfsError {
    /// Stable, greppable message code
    pub fn code(&self) -> &'static str {
        match self {
            ZfsError::StorageUnavailable(_) => "storage_unavailable",
            ZfsError::CommandFailed(_) => "command_failed",
            ZfsError::DatasetNotFound(_) => "dataset_not_found",
            ZfsError::SnapshotNotFound(_) => "snapshot_not_found",
            ZfsError::InvalidOutput(_) => "invalid_output",
            ZfsError::StreamError(_) => "stream_error",
        }
    }
}

pub type ZfsResult<T> = Result<T, ZfsError>;

/// Seam over the local storage engine.
///
/// Results are never cached between calls: snapshot sets change between
/// invocations.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Datasets, optionally filtered by name prefix, sorted by name
    async fn list_datasets(&self, prefix: Option<&str>) -> ZfsResult<Vec<Dataset>>;

    /// Snapshot chain of a dataset, ordered ascending by creation time
    async fn list_snapshots(&self, dataset: &str) -> ZfsResult<Vec<Snapshot>>;

    /// Look a snapshot up by GUID across all datasets
    async fn snapshot_by_guid(&self, guid: Guid) -> ZfsResult<Snapshot>;

    /// Write the snapshot stream for `target` into `output`. `base` selects
    /// an incremental send; `intermediates` ships every snapshot between
    /// base and target.
    async fn send(
        &self,
        target: &Snapshot,
        base: Option<&Snapshot>,
        intermediates: bool,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ZfsResult<()>;

    /// Receive a snapshot stream from `input` into `dataset`.
    /// `force_rollback` discards divergent destination history first.
    async fn receive(
        &self,
        dataset: &str,
        force_rollback: bool,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> ZfsResult<()>;
}

/// Driver shelling out to the zfs CLI
pub struct Zfs {
    binary: PathBuf,
}

fn optional_field(field: &str) -> Option<String> {
    match field {
        "-" | "none" => None,
        value => Some(value.to_string()),
    }
}

fn parse_number(field: &str, line: &str) -> ZfsResult<u64> {
    field
        .parse()
        .map_err(|_| ZfsError::InvalidOutput(line.to_string()))
}

/// Parse one line of `zfs list -Hp -o name,guid,used,refer,mountpoint,origin`
fn parse_dataset_line(line: &str) -> ZfsResult<Dataset> {
    let fields = line.split('\t').collect::<Vec<_>>();

    match *fields.as_slice() {
        [name, guid, used, referenced, mountpoint, origin] => Ok(Dataset {
            name: name.to_string(),
            guid: parse_number(guid, line)?,
            used: parse_number(used, line)?,
            referenced: parse_number(referenced, line)?,
            mountpoint: optional_field(mountpoint),
            origin: optional_field(origin),
        }),
        _ => Err(ZfsError::InvalidOutput(line.to_string())),
    }
}

/// Parse one line of `zfs list -Hp -o name,guid,creation,used -t snapshot`
fn parse_snapshot_line(line: &str) -> ZfsResult<Snapshot> {
    let fields = line.split('\t').collect::<Vec<_>>();

    match *fields.as_slice() {
        [name, guid, creation, used] => {
            let (dataset, label) = name
                .split_once('@')
                .ok_or_else(|| ZfsError::InvalidOutput(line.to_string()))?;

            let created = Utc
                .timestamp_opt(parse_number(creation, line)? as i64, 0)
                .single()
                .ok_or_else(|| ZfsError::InvalidOutput(line.to_string()))?;

            Ok(Snapshot {
                dataset: dataset.to_string(),
                label: label.to_string(),
                guid: parse_number(guid, line)?,
                created,
                used: parse_number(used, line)?,
            })
        }
        _ => Err(ZfsError::InvalidOutput(line.to_string())),
    }
}

impl Zfs {
    pub fn new(binary: PathBuf) -> Self {
        Zfs { binary }
    }

    async fn run(&self, args: &[&str]) -> ZfsResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(ZfsError::StorageUnavailable)?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| ZfsError::InvalidOutput(e.to_string()))
        } else {
            Err(ZfsError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

#[async_trait]
impl StorageEngine for Zfs {
    async fn list_datasets(&self, prefix: Option<&str>) -> ZfsResult<Vec<Dataset>> {
        let output = self
            .run(&[
                "list",
                "-Hp",
                "-o",
                "name,guid,used,refer,mountpoint,origin",
                "-t",
                "filesystem,volume",
                "-s",
                "name",
            ])
            .await?;

        output
            .lines()
            .filter(|line| match prefix {
                Some(prefix) => line.starts_with(prefix),
                None => true,
            })
            .map(parse_dataset_line)
            .collect()
    }

    async fn list_snapshots(&self, dataset: &str) -> ZfsResult<Vec<Snapshot>> {
        let result = self
            .run(&[
                "list",
                "-Hp",
                "-o",
                "name,guid,creation,used",
                "-t",
                "snapshot",
                "-s",
                "creation",
                "-d",
                "1",
                dataset,
            ])
            .await;

        match result {
            Ok(output) => output.lines().map(parse_snapshot_line).collect(),
            Err(ZfsError::CommandFailed(message)) if message.contains("does not exist") => {
                Err(ZfsError::DatasetNotFound(dataset.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn snapshot_by_guid(&self, guid: Guid) -> ZfsResult<Snapshot> {
        let output = self
            .run(&[
                "list",
                "-Hp",
                "-o",
                "name,guid,creation,used",
                "-t",
                "snapshot",
            ])
            .await?;

        output
            .lines()
            .map(parse_snapshot_line)
            .find(|snapshot| match snapshot {
                Ok(snapshot) => snapshot.guid == guid,
                Err(_) => true,
            })
            .unwrap_or(Err(ZfsError::SnapshotNotFound(guid)))
    }

    async fn send(
        &self,
        target: &Snapshot,
        base: Option<&Snapshot>,
        intermediates: bool,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> ZfsResult<()> {
        let target_name = target.full_name();
        let mut args = vec!["send"];

        let base_name = base.map(Snapshot::full_name);

        if let Some(base_name) = base_name.as_deref() {
            args.push(if intermediates { "-I" } else { "-i" });
            args.push(base_name);
        }

        args.push(&target_name);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ZfsError::StorageUnavailable)?;

        let mut stdout = child.stdout.take().expect("Child stdout is piped");

        copy(&mut stdout, output)
            .await
            .map_err(ZfsError::StreamError)?;

        let result = child
            .wait_with_output()
            .await
            .map_err(ZfsError::StorageUnavailable)?;

        if result.status.success() {
            Ok(())
        } else {
            Err(ZfsError::CommandFailed(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ))
        }
    }

    async fn receive(
        &self,
        dataset: &str,
        force_rollback: bool,
        input: &mut (dyn AsyncRead + Send + Unpin),
    ) -> ZfsResult<()> {
        let mut args = vec!["recv", "-u"];

        if force_rollback {
            args.push("-F");
        }

        args.push(dataset);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ZfsError::StorageUnavailable)?;

        let mut stdin = child.stdin.take().expect("Child stdin is piped");

        let stream = async {
            copy(input, &mut stdin).await?;
            stdin.shutdown().await
        };

        // A receive-side failure closes stdin early; report the exit status
        // instead of the broken pipe in that case
        let stream_result = stream.await;

        // Close the pipe so the child sees EOF before we wait on it
        drop(stdin);

        let result = child
            .wait_with_output()
            .await
            .map_err(ZfsError::StorageUnavailable)?;

        if !result.status.success() {
            return Err(ZfsError::CommandFailed(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }

        stream_result.map_err(ZfsError::StreamError)?;

        Ok(())
    }
}
