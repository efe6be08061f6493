/// In-memory byte pipe joining the two transfer halves
pub mod pipe;

use sylve_lib::core::planner::ReplicationPlan;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::node::zfs::StorageEngine;
use pipe::PipeWriter;

/// Buffered chunks between sender and receiver
pub const PIPE_CAPACITY: usize = 64;

/// Read size used when pumping a pipe onto the wire
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("transfer canceled")]
    Canceled,
}

impl TransferError {
    /// Stable, greppable message code
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Send(_) => "send_failed",
            TransferError::Receive(_) => "receive_failed",
            TransferError::Canceled => "canceled",
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Combine the two halves' outcomes. The send side is authoritative: a
/// receive failure while the stream was healthy indicates a
/// destination-side problem and is reported as such.
pub fn combine(send: Result<(), String>, receive: Result<(), String>) -> TransferResult<()> {
    match (send, receive) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(send), _) => Err(TransferError::Send(send)),
        (Ok(()), Err(receive)) => Err(TransferError::Receive(receive)),
    }
}

/// Run the plan's send side into the pipe.
///
/// On failure the pipe is closed with the triggering error so the receive
/// half observes it as a terminal read error instead of a silent truncation.
pub async fn send_into_pipe(
    engine: &dyn StorageEngine,
    plan: &ReplicationPlan,
    mut writer: PipeWriter,
) -> Result<(), String> {
    let result = engine
        .send(
            &plan.target,
            plan.base.as_ref(),
            plan.with_intermediates,
            &mut writer,
        )
        .await;

    match result {
        Ok(()) => {
            let _ = writer.shutdown().await;
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            writer.close_with_error(message.clone());
            Err(message)
        }
    }
}

/// Execute a plan with both halves on this host.
///
/// Cancellation drops both halves, which closes the pipe and kills any
/// spawned engine processes.
pub async fn local(
    engine: &dyn StorageEngine,
    plan: &ReplicationPlan,
    cancel: &CancellationToken,
) -> TransferResult<()> {
    let (writer, mut reader) = pipe::pipe(PIPE_CAPACITY);

    let transfer = async {
        let (send, receive) = tokio::join!(
            send_into_pipe(engine, plan, writer),
            async {
                engine
                    .receive(&plan.destination_dataset, plan.force_rollback, &mut reader)
                    .await
                    .map_err(|e| e.to_string())
            }
        );

        combine(send, receive)
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Canceled),
        result = transfer => result,
    }
}

#[cfg(test)]
mod tests {
    use sylve_lib::core::planner::{plan, PlanOptions};
    use tokio_util::sync::CancellationToken;

    use super::{combine, local, TransferError};
    use crate::{node::zfs::StorageEngine, utils::testing::MemoryEngine};

    #[test]
    fn test_combine_send_side_authoritative() {
        assert!(combine(Ok(()), Ok(())).is_ok());

        assert!(matches!(
            combine(Err(String::from("sender")), Err(String::from("receiver"))),
            Err(TransferError::Send(message)) if message == "sender"
        ));

        assert!(matches!(
            combine(Ok(()), Err(String::from("receiver"))),
            Err(TransferError::Receive(message)) if message == "receiver"
        ));
    }

    #[tokio::test]
    async fn test_local_transfer() {
        let engine = MemoryEngine::default();
        engine.add_dataset("tank/a", 1);
        engine.add_snapshot("tank/a", "1", 11, 100);
        engine.add_snapshot("tank/a", "2", 12, 200);

        let source = engine.list_snapshots("tank/a").await.unwrap();
        let plan = plan("tank/a", "tank/b", &source, &[], &PlanOptions::default()).unwrap();

        local(&engine, &plan, &CancellationToken::new())
            .await
            .unwrap();

        let replicated = engine.list_snapshots("tank/b").await.unwrap();
        assert_eq!(replicated.len(), 1);
        assert_eq!(replicated[0].guid, 12);
        assert_eq!(replicated[0].dataset, "tank/b");
    }

    #[tokio::test]
    async fn test_send_failure_is_authoritative() {
        let engine = MemoryEngine::default();
        engine.add_dataset("tank/a", 1);
        engine.add_snapshot("tank/a", "1", 11, 100);
        engine.fail_sends();

        let source = engine.list_snapshots("tank/a").await.unwrap();
        let plan = plan("tank/a", "tank/b", &source, &[], &PlanOptions::default()).unwrap();

        let error = local(&engine, &plan, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, TransferError::Send(_)));

        // Nothing was received, so the destination was never created
        assert!(matches!(
            engine.list_snapshots("tank/b").await,
            Err(crate::node::zfs::ZfsError::DatasetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_canceled_transfer() {
        let engine = MemoryEngine::default();
        engine.add_dataset("tank/a", 1);
        engine.add_snapshot("tank/a", "1", 11, 100);

        let source = engine.list_snapshots("tank/a").await.unwrap();
        let plan = plan("tank/a", "tank/b", &source, &[], &PlanOptions::default()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            local(&engine, &plan, &cancel).await.unwrap_err(),
            TransferError::Canceled
        ));
    }
}
