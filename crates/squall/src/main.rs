//! squall CLI: batch clients for a message queue and blob storage.

use std::process::ExitCode;

use clap::Parser;

use squall::{CliArgs, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
