mod cli;
mod commands;
mod error;
mod output;
mod shutdown;
mod telemetry;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(error) = telemetry::init_tracing() {
        eprintln!("warning: {error}");
    }

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown::cancel_on_signal(cancel.clone()));

    let result = run(&cli, cancel.clone()).await;
    cancel.cancel();
    // The signal task returns once the token is cancelled.
    let _ = signals.await;

    match result {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(code = error.exit_code(), "{error}");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run(cli: &Cli, cancel: CancellationToken) -> Result<ExitCode, CliError> {
    let outcome = commands::run(cli, cancel).await?;
    output::render(&outcome.report, cli.pretty)?;
    Ok(ExitCode::from(outcome.exit_code))
}
