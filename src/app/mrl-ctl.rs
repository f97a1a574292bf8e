use anyhow::{Context, Result};
use clap::Parser;
use mrlease::cmd::ctl::{Args, Commands};
use mrlease::rpc::Empty;
use mrlease::utils::init_tracing;
use mrlease::worker::connect;
use mrlease::{DEFAULT_RPC_TIMEOUT, DEFAULT_SOCKET_PATH};
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();
    let socket = args
        .socket
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
    let mut client = connect(&socket, DEFAULT_RPC_TIMEOUT)?;

    match args.command {
        Commands::Status {} => {
            let status = client
                .job_status(Empty {})
                .await
                .context("JobStatus failed")?
                .into_inner();
            println!("pending map:\t{}", status.pending_map);
            println!("pending reduce:\t{}", status.pending_reduce);
            println!("running:\t{}", status.running);
            println!("done:\t\t{}", status.done);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Done {} => {
            let done = client
                .is_job_done(Empty {})
                .await
                .context("IsJobDone failed")?
                .into_inner()
                .done;
            println!("{done}");
            Ok(if done {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
