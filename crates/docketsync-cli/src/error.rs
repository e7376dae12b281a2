use docketsync_core::{FetchError, HttpError, StoreError, ValidationError, WarehouseError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("http client setup failed: {0}")]
    Http(#[from] HttpError),

    #[error("tracing setup failed: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Fetch(_) => 4,
            Self::Warehouse(error) if error.is_locked() => 6,
            Self::Store(error) if error.is_locked() => 6,
            Self::Warehouse(_)
            | Self::Store(_)
            | Self::Http(_)
            | Self::Telemetry(_)
            | Self::Serialization(_)
            | Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn locked_store_has_its_own_exit_code() {
        let locked = CliError::from(WarehouseError::Locked {
            path: PathBuf::from("docketsync.duckdb"),
            message: String::from("Conflicting lock is held"),
        });
        assert_eq!(locked.exit_code(), 6);
        assert_eq!(CliError::from(ValidationError::EmptySortKey).exit_code(), 2);
        assert_eq!(CliError::from(FetchError::Cancelled).exit_code(), 4);
    }
}
