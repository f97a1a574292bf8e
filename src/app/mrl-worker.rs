use anyhow::Result;
use clap::Parser;
use mrlease::cmd::worker::Args;
use mrlease::utils::init_tracing;
use mrlease::{worker, workload};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let engine = workload::named(&args.workload)?;
    worker::run(args.config(), engine).await?;
    Ok(())
}
