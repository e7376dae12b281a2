//! Tracing initialization.
//!
//! Log lines go to stderr so stdout carries only the JSON report. The level
//! comes from `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=docketsync_core::governor=debug docketsync run comments
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::CliError;

pub fn init_tracing() -> Result<(), CliError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|error| CliError::Telemetry(error.to_string()))?;
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|error| CliError::Telemetry(error.to_string()))
}
