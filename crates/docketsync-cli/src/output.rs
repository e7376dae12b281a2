use std::io::{self, Write};

use serde::Serialize;

use crate::error::CliError;

/// Print `report` to stdout as a single JSON document.
pub fn render<T: Serialize>(report: &T, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{payload}")?;
    stdout.flush()?;
    Ok(())
}
