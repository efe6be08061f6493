use chrono::Utc;
use sylve_lib::core::{
    planner::{plan, PlanError, PlanMode, PlanOptions, ReplicationPlan},
    schedule::Schedule,
    snapshot::{Dataset, Snapshot},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::node::{
    replication::{
        client::{error::ClientError, Client},
        message::PullRequest,
    },
    store::{
        event::{BackupReplicationEvent, Direction, EventStatus},
        job::BackupJob,
    },
    transfer::{self, TransferError},
    zfs::ZfsError,
    Manager,
};

/// Upper bound on plan-transfer legs per run. A full transfer of the
/// earliest snapshot is followed by an incremental leg towards the latest
/// one, so a run converges without waiting for the next tick.
const MAX_TRANSFER_LEGS: usize = 3;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("replication already running for {0} -> {1}")]
    AlreadyRunning(String, String),
    #[error("backup job \"{0}\" not found")]
    JobNotFound(String),
    #[error("target \"{0}\" not found")]
    TargetNotFound(String),
    #[error("target \"{0}\" is disabled")]
    TargetDisabled(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Storage(#[from] ZfsError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ServiceError {
    /// Stable, greppable message code
    pub fn code(&self) -> &str {
        match self {
            ServiceError::AlreadyRunning(_, _) => "already_running",
            ServiceError::JobNotFound(_) => "job_not_found",
            ServiceError::TargetNotFound(_) => "target_not_found",
            ServiceError::TargetDisabled(_) => "target_disabled",
            ServiceError::Plan(e) => e.code(),
            ServiceError::Storage(e) => e.code(),
            ServiceError::Transfer(e) => e.code(),
            ServiceError::Client(e) => e.code(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl Manager<'_> {
    /// Snapshot chain of a dataset, empty when the dataset does not exist
    /// yet. A first replication into a fresh destination is a full send,
    /// not an error.
    pub async fn snapshot_chain(&self, dataset: &str) -> Result<Vec<Snapshot>, ZfsError> {
        match self.engine().list_snapshots(dataset).await {
            Ok(chain) => Ok(chain),
            Err(ZfsError::DatasetNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Run a backup job and record the outcome in its bookkeeping.
    ///
    /// A run rejected because the pair is already replicating touches
    /// neither the ledger nor the bookkeeping, the running attempt owns
    /// both.
    pub async fn handle_job_run(
        &self,
        name: &str,
        manual: bool,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let job = self
            .store()
            .job(name)
            .await
            .ok_or_else(|| ServiceError::JobNotFound(name.to_string()))?;

        info!("Running backup job \"{}\" (manual: {})", name, manual);

        let started = Utc::now();
        let result = self.run_job(&job, cancel).await;

        if matches!(result, Err(ServiceError::AlreadyRunning(_, _))) {
            return result;
        }

        let (status, error) = match &result {
            Ok(()) => (EventStatus::Succeeded, None),
            Err(e) => (EventStatus::Failed, Some(e.to_string())),
        };

        let next_run = job
            .schedule
            .parse::<Schedule>()
            .ok()
            .and_then(|schedule| schedule.next_after(Utc::now()));

        self.store()
            .update_job(name, |job| {
                job.last_status = Some(status);
                job.last_error = error;
                job.last_run = Some(started);
                job.next_run = next_run;
            })
            .await;

        match &result {
            Ok(()) => info!("Backup job \"{}\" finished", name),
            Err(e) => error!("Backup job \"{}\" failed: {}", name, e),
        }

        result
    }

    async fn run_job(&self, job: &BackupJob, cancel: &CancellationToken) -> ServiceResult<()> {
        let options = PlanOptions {
            force: job.force,
            with_intermediates: job.with_intermediates,
            target_label: None,
        };

        match job.target.as_deref() {
            None => self.replicate_local(job, &options, cancel).await,
            Some(name) => {
                let target = self
                    .target(name)
                    .ok_or_else(|| ServiceError::TargetNotFound(name.to_string()))?;

                if !target.enabled {
                    return Err(ServiceError::TargetDisabled(name.to_string()));
                }

                let address = target.address.clone();
                self.push_to_target(job, &address, &options, cancel).await
            }
        }
    }

    async fn replicate_local(
        &self,
        job: &BackupJob,
        options: &PlanOptions,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let _guard = self
            .locks()
            .try_acquire(&job.source_dataset, &job.destination_dataset)
            .ok_or_else(|| {
                ServiceError::AlreadyRunning(
                    job.source_dataset.clone(),
                    job.destination_dataset.clone(),
                )
            })?;

        let event = BackupReplicationEvent::begin(
            Direction::Push,
            None,
            job.source_dataset.clone(),
            job.destination_dataset.clone(),
            Some(job.name.clone()),
        );
        let event_id = event.id;
        self.store().append_event(event).await;

        let result = self
            .execute_local(
                &job.source_dataset,
                &job.destination_dataset,
                options,
                event_id,
                cancel,
            )
            .await;

        self.complete_event(event_id, &result).await;

        result
    }

    async fn execute_local(
        &self,
        source: &str,
        destination: &str,
        options: &PlanOptions,
        event_id: Uuid,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let mut recorded = false;

        for _ in 0..MAX_TRANSFER_LEGS {
            let source_chain = self.engine().list_snapshots(source).await?;
            let destination_chain = self.snapshot_chain(destination).await?;

            let plan = plan(source, destination, &source_chain, &destination_chain, options)?;

            self.record_leg(event_id, &plan, &mut recorded).await;

            if plan.noop {
                return Ok(());
            }

            transfer::local(self.engine(), &plan, cancel).await?;

            if !follow_up(&plan) {
                return Ok(());
            }
        }

        Ok(())
    }

    async fn push_to_target(
        &self,
        job: &BackupJob,
        address: &str,
        options: &PlanOptions,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let _guard = self
            .locks()
            .try_acquire(&job.source_dataset, &job.destination_dataset)
            .ok_or_else(|| {
                ServiceError::AlreadyRunning(
                    job.source_dataset.clone(),
                    job.destination_dataset.clone(),
                )
            })?;

        let event = BackupReplicationEvent::begin(
            Direction::Push,
            Some(address.to_string()),
            job.source_dataset.clone(),
            job.destination_dataset.clone(),
            Some(job.name.clone()),
        );
        let event_id = event.id;
        self.store().append_event(event).await;

        let result = self
            .execute_push(
                &job.source_dataset,
                &job.destination_dataset,
                address,
                options,
                event_id,
                cancel,
            )
            .await;

        self.complete_event(event_id, &result).await;

        result
    }

    async fn execute_push(
        &self,
        source: &str,
        destination: &str,
        address: &str,
        options: &PlanOptions,
        event_id: Uuid,
        cancel: &CancellationToken,
    ) -> ServiceResult<()> {
        let mut client = Client::connect(address, &self.config.cluster).await?;
        let mut recorded = false;

        for _ in 0..MAX_TRANSFER_LEGS {
            let source_chain = self.engine().list_snapshots(source).await?;
            let destination_chain = client.list_snapshots(destination).await?;

            let plan = plan(source, destination, &source_chain, &destination_chain, options)?;

            self.record_leg(event_id, &plan, &mut recorded).await;

            if plan.noop {
                return Ok(());
            }

            client.push(self.engine(), &plan, cancel).await?;

            if !follow_up(&plan) {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Pull a dataset from a remote node. The remote plans against our
    /// destination chain, streams, and keeps its own ledger entry; we keep
    /// ours.
    pub async fn pull_from_node(
        &self,
        address: &str,
        source_dataset: &str,
        destination_dataset: &str,
        snapshot: Option<String>,
        force: bool,
        with_intermediates: bool,
        cancel: &CancellationToken,
    ) -> ServiceResult<ReplicationPlan> {
        let _guard = self
            .locks()
            .try_acquire(source_dataset, destination_dataset)
            .ok_or_else(|| {
                ServiceError::AlreadyRunning(
                    source_dataset.to_string(),
                    destination_dataset.to_string(),
                )
            })?;

        let event = BackupReplicationEvent::begin(
            Direction::Pull,
            Some(address.to_string()),
            source_dataset.to_string(),
            destination_dataset.to_string(),
            None,
        );
        let event_id = event.id;
        self.store().append_event(event).await;

        let result = self
            .execute_pull(
                address,
                source_dataset,
                destination_dataset,
                snapshot,
                force,
                with_intermediates,
                event_id,
                cancel,
            )
            .await;

        self.complete_event(event_id, &result).await;

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_pull(
        &self,
        address: &str,
        source_dataset: &str,
        destination_dataset: &str,
        snapshot: Option<String>,
        force: bool,
        with_intermediates: bool,
        event_id: Uuid,
        cancel: &CancellationToken,
    ) -> ServiceResult<ReplicationPlan> {
        let mut client = Client::connect(address, &self.config.cluster).await?;
        let mut executed: Option<ReplicationPlan> = None;
        let mut recorded = false;

        for _ in 0..MAX_TRANSFER_LEGS {
            let destination_chain = self.snapshot_chain(destination_dataset).await?;

            let request = PullRequest {
                source_dataset: source_dataset.to_string(),
                destination_dataset: destination_dataset.to_string(),
                destination_chain,
                snapshot: snapshot.clone(),
                force,
                with_intermediates,
            };

            let plan = client.pull_plan(request).await?;

            self.record_leg(event_id, &plan, &mut recorded).await;

            client.pull_stream(self.engine(), &plan, cancel).await?;

            let continued = !plan.noop && follow_up(&plan);

            if executed.is_none() {
                executed = Some(plan);
            }

            if !continued {
                break;
            }
        }

        // The loop always runs at least one leg
        executed.ok_or(ServiceError::Plan(PlanError::NothingToSend))
    }

    pub async fn list_target_datasets(
        &self,
        address: &str,
        prefix: Option<String>,
    ) -> ServiceResult<Vec<Dataset>> {
        let mut client = Client::connect(address, &self.config.cluster).await?;

        Ok(client.list_datasets(prefix).await?)
    }

    pub async fn list_target_status(
        &self,
        address: &str,
        limit: usize,
    ) -> ServiceResult<Vec<BackupReplicationEvent>> {
        let mut client = Client::connect(address, &self.config.cluster).await?;

        Ok(client.list_events(limit).await?)
    }

    /// Record the first leg's plan on the ledger entry; later legs only
    /// advance the recorded target snapshot.
    async fn record_leg(&self, event_id: Uuid, plan: &ReplicationPlan, recorded: &mut bool) {
        if *recorded {
            let label = plan.target.label.clone();

            self.store()
                .update_event(event_id, move |event| {
                    event.target_snapshot = Some(label);
                })
                .await;
        } else {
            self.store()
                .update_event(event_id, |event| event.record_plan(plan))
                .await;

            *recorded = true;
        }
    }

    async fn complete_event<T>(&self, event_id: Uuid, result: &ServiceResult<T>) {
        let error = result.as_ref().err().map(|e| e.to_string());

        self.store()
            .update_event(event_id, |event| event.complete(error))
            .await;
    }
}

fn follow_up(plan: &ReplicationPlan) -> bool {
    plan.mode == PlanMode::Full && plan.with_intermediates
}
