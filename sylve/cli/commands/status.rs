use std::time::Duration;

use structopt::StructOpt;
use thiserror::Error;
use tokio::time::timeout;

use crate::{
    cli::{
        commands::{resolve_target_address, METADATA_TIMEOUT_SECS},
        Server,
    },
    node::{service::ServiceError, store::event::EventStatus, Manager},
};

#[derive(Error, Debug)]
pub enum StatusCommandError {
    #[error("Unable to load configuration file")]
    ConfigFileError,
    #[error("\"{0}\" is neither a configured target nor a host:port address")]
    TargetNotFound(String),
    #[error("Request timed out")]
    Timeout,
    #[error(transparent)]
    ServiceError(#[from] ServiceError),
}

#[derive(StructOpt)]
pub struct StatusCommand {
    /// Backup target name or host:port address
    #[structopt(long)]
    target: String,

    /// Number of history entries to show
    #[structopt(default_value = "20", long)]
    limit: usize,
}

impl StatusCommand {
    pub async fn dispatch(&self, server: &'static Server) -> Result<(), StatusCommandError> {
        let config = server.config().ok_or(StatusCommandError::ConfigFileError)?;

        let address = resolve_target_address(config, &self.target)
            .ok_or_else(|| StatusCommandError::TargetNotFound(self.target.clone()))?;

        let manager = Manager::new(config);
        let deadline = Duration::from_secs(METADATA_TIMEOUT_SECS);

        let events = timeout(deadline, manager.list_target_status(&address, self.limit))
            .await
            .map_err(|_| StatusCommandError::Timeout)??;

        for event in events {
            let status = match event.status {
                EventStatus::Running => "running",
                EventStatus::Succeeded => "succeeded",
                EventStatus::Failed => "failed",
            };

            println!(
                "{}  {:<9} {} -> {} ({:?}, target {})",
                event.started_at.format("%Y-%m-%d %H:%M:%S"),
                status,
                event.source_dataset,
                event.destination_dataset,
                event.direction,
                event.target_snapshot.as_deref().unwrap_or("-")
            );

            if let Some(error) = &event.error {
                println!("    error: {}", error);
            }
        }

        Ok(())
    }
}
