#[macro_use]
extern crate log;

/// CLI
mod cli;

/// Configuration
pub mod config;

/// Background jobs
mod jobs;

/// Node
mod node;

/// Utilities for easier development
pub mod utils;

use anyhow::Error;
use once_cell::sync::OnceCell;
use structopt::StructOpt;

use cli::{Command::*, Server};

static SERVER: OnceCell<Server> = OnceCell::new();

#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init_custom_env("LOG_LEVEL");

    SERVER
        .set(Server::from_args().load_config().await?)
        .ok()
        .expect("Server was already initialized");

    let server = SERVER.get().expect("Server is not initialized");

    match server.command() {
        Serve(command) => command.dispatch(server).await?,
        Datasets(command) => command.dispatch(server).await?,
        Status(command) => command.dispatch(server).await?,
        Pull(command) => command.dispatch(server).await?,
    };

    Ok(())
}
