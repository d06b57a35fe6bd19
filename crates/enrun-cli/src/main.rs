// crates/enrun-cli/src/main.rs

//! Operator CLI: run a single pipeline run by id against a live
//! environment, for local smoke-testing. Not a user-facing product
//! surface — modelled on `crates/fluent-cli`'s thin
//! `main.rs` (`cli::run().await`), trimmed to the one command this
//! workspace needs.

use clap::Parser;
use enrun_core::types::RunStatus;
use enrun_runtime::{init_tracing, run, RunPipelineRequest};

#[derive(Parser, Debug)]
#[command(name = "enrun-cli", about = "Run a single pipeline run and print its summary")]
struct Args {
    /// The pipeline run id to execute.
    pipeline_run_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let response = run(RunPipelineRequest { pipeline_run_id: args.pipeline_run_id }).await?;
    println!("{}", serde_json::to_string_pretty(&response.data)?);

    if response.data.status == RunStatus::Failed {
        std::process::exit(1);
    }

    Ok(())
}
