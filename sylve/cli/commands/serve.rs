use std::sync::Arc;

use structopt::StructOpt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    cli::Server,
    dispatch_jobs,
    jobs::{
        exit::spawn_ctrlc_handler, persistence::spawn_persistence, retention::spawn_retention,
        scheduler::spawn_scheduler,
    },
    node::{
        replication::server::{self, error::ServerError},
        store::StoreError,
        Manager,
    },
};

#[derive(Error, Debug)]
pub enum ServeCommandError {
    #[error("Unable to load configuration file")]
    ConfigFileError,
    #[error("Replication endpoint error: {0}")]
    EndpointError(ServerError),
    #[error("Store error: {0}")]
    StoreError(StoreError),
}

#[derive(StructOpt)]
pub struct ServeCommand {
    /// Override the configured listen port
    #[structopt(long)]
    listen_port: Option<u16>,
}

impl ServeCommand {
    pub async fn dispatch(&self, server: &'static Server) -> Result<(), ServeCommandError> {
        info!("Initializing node.");

        let config = server.config().ok_or(ServeCommandError::ConfigFileError)?;
        let manager = Manager::new(config);

        info!("Loading node state from FS.");

        match manager.load_from_fs().await {
            Err(StoreError::FileReadError(e)) => info!("No previous node state: {}", e),
            Err(e) => Err(e).map_err(ServeCommandError::StoreError)?,
            Ok(_) => (),
        };

        let manager = Arc::new(manager);

        dispatch_jobs!(
            manager,
            spawn_scheduler,
            spawn_retention,
            spawn_persistence,
            spawn_ctrlc_handler
        );

        let mut listen = config.listen;

        if let Some(port) = self.listen_port {
            listen.set_port(port);
        }

        server::serve(&manager, listen, CancellationToken::new())
            .await
            .map_err(ServeCommandError::EndpointError)?;

        Ok(())
    }
}
