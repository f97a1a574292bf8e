use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
    /// Unix socket of the coordinator
    #[clap(short, long, default_value = None)]
    pub socket: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Shows how many tasks are pending and running.
    Status {},
    /// Exits successfully iff every task of the job has been committed.
    Done {},
}
