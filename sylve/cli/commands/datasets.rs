use std::time::Duration;

use structopt::StructOpt;
use thiserror::Error;
use tokio::time::timeout;

use crate::{
    cli::{
        commands::{resolve_target_address, METADATA_TIMEOUT_SECS},
        Server,
    },
    node::{service::ServiceError, Manager},
};

#[derive(Error, Debug)]
pub enum DatasetsCommandError {
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
pub struct DatasetsCommand {
    /// Backup target name or host:port address
    #[structopt(long)]
    target: String,

    /// Only list datasets under this name prefix
    #[structopt(long)]
    prefix: Option<String>,
}

impl DatasetsCommand {
    pub async fn dispatch(&self, server: &'static Server) -> Result<(), DatasetsCommandError> {
        let config = server
            .config()
            .ok_or(DatasetsCommandError::ConfigFileError)?;

        let address = resolve_target_address(config, &self.target)
            .ok_or_else(|| DatasetsCommandError::TargetNotFound(self.target.clone()))?;

        let manager = Manager::new(config);
        let deadline = Duration::from_secs(METADATA_TIMEOUT_SECS);

        let datasets = timeout(
            deadline,
            manager.list_target_datasets(&address, self.prefix.clone()),
        )
        .await
        .map_err(|_| DatasetsCommandError::Timeout)??;

        println!("{:<40} {:>12} {:>12}  MOUNTPOINT", "NAME", "USED", "REFER");

        for dataset in datasets {
            println!(
                "{:<40} {:>12} {:>12}  {}",
                dataset.name,
                dataset.used,
                dataset.referenced,
                dataset.mountpoint.as_deref().unwrap_or("-")
            );
        }

        Ok(())
    }
}
