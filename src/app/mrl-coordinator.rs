use anyhow::Result;
use clap::Parser;
use mrlease::cmd::coordinator::Args;
use mrlease::utils::{init_tracing, prepare_inputs};
use mrlease::coordinator;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.config();

    let inputs = prepare_inputs(&args.inputs, args.chunks, &args.chunk_dir())?;
    info!(count = inputs.len(), "map inputs ready");

    coordinator::start(inputs, config).await
}
