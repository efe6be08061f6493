/// CLI commands
mod commands;

use std::{
    io::{Error, ErrorKind},
    path::PathBuf,
};

use structopt::StructOpt;
use tokio::fs::read_to_string;
use toml::from_str;

use crate::config::Config;
use commands::{
    datasets::DatasetsCommand, pull::PullCommand, serve::ServeCommand, status::StatusCommand,
};

/// Backup node
#[derive(StructOpt)]
pub enum Command {
    #[structopt(about = "Start backup node")]
    Serve(ServeCommand),
    #[structopt(about = "List datasets on a backup target")]
    Datasets(DatasetsCommand),
    #[structopt(about = "Show replication history of a backup target")]
    Status(StatusCommand),
    #[structopt(about = "Pull a dataset from a backup target")]
    Pull(PullCommand),
}

/// Server with config and selected command
#[derive(StructOpt)]
pub struct Server {
    /// Server configuration path
    #[structopt(default_value = "SylveBackup.toml", long)]
    config: PathBuf,

    /// Loaded server configuration
    #[structopt(skip = None)]
    loaded_config: Option<Config>,

    #[structopt(subcommand)]
    command: Command,
}

impl Server {
    /// Load configuration
    pub async fn load_config(mut self) -> Result<Self, Error> {
        match read_to_string(self.config.as_path()).await {
            Ok(file) => {
                self.loaded_config =
                    Some(from_str(&file).map_err(|e| Error::new(ErrorKind::InvalidData, e))?)
            }
            Err(e) => info!("Unable to load configuration file: {}", e),
        };

        Ok(self)
    }

    pub fn config(&self) -> Option<&Config> {
        self.loaded_config.as_ref()
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}
