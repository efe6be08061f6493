use structopt::StructOpt;
use sylve_lib::core::planner::PlanMode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    cli::{commands::resolve_target_address, Server},
    node::{service::ServiceError, store::StoreError, Manager},
};

#[derive(Error, Debug)]
pub enum PullCommandError {
    #[error("Unable to load configuration file")]
    ConfigFileError,
    #[error("\"{0}\" is neither a configured target nor a host:port address")]
    TargetNotFound(String),
    #[error("Store error: {0}")]
    StoreError(StoreError),
    #[error(transparent)]
    ServiceError(#[from] ServiceError),
}

#[derive(StructOpt)]
pub struct PullCommand {
    /// Backup target name or host:port address
    #[structopt(long)]
    target: String,

    /// Dataset on the target to pull from
    #[structopt(long)]
    source_dataset: String,

    /// Local dataset to receive into
    #[structopt(long)]
    destination_dataset: String,

    /// Pull up to a labeled snapshot instead of the latest one
    #[structopt(long)]
    snapshot: Option<String>,

    /// Allow destructive rollback of a diverged local dataset
    #[structopt(long)]
    force: bool,

    /// Receive every intermediate snapshot rather than only the delta
    #[structopt(long)]
    with_intermediates: bool,
}

impl PullCommand {
    pub async fn dispatch(&self, server: &'static Server) -> Result<(), PullCommandError> {
        let config = server.config().ok_or(PullCommandError::ConfigFileError)?;

        let address = resolve_target_address(config, &self.target)
            .ok_or_else(|| PullCommandError::TargetNotFound(self.target.clone()))?;

        let manager = Manager::new(config);

        match manager.load_from_fs().await {
            Err(StoreError::FileReadError(e)) => info!("No previous node state: {}", e),
            Err(e) => Err(e).map_err(PullCommandError::StoreError)?,
            Ok(_) => (),
        };

        let cancel = CancellationToken::new();

        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let plan = manager
            .pull_from_node(
                &address,
                &self.source_dataset,
                &self.destination_dataset,
                self.snapshot.clone(),
                self.force,
                self.with_intermediates,
                &cancel,
            )
            .await?;

        if plan.noop {
            println!(
                "{} is already up to date with {}@{}",
                self.destination_dataset, self.source_dataset, plan.target.label
            );
        } else {
            let kind = match plan.mode {
                PlanMode::Full => "full",
                PlanMode::Incremental => "incremental",
            };

            println!(
                "Pulled {} stream of {} into {} (target @{})",
                kind, self.source_dataset, self.destination_dataset, plan.target.label
            );
        }

        manager
            .persist()
            .await
            .map_err(PullCommandError::StoreError)?;

        Ok(())
    }
}
