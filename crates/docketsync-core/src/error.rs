use docketsync_warehouse::WarehouseError;
use thiserror::Error;

use crate::source::SourceError;

/// Rejected input: query construction, filters, identifiers and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid entity type '{value}', expected one of dockets, documents, comments")]
    InvalidEntity { value: String },

    #[error("page size {value} must be between 1 and {max}")]
    PageSizeOutOfRange { value: u32, max: u32 },
    #[error("page ceiling must be greater than zero")]
    ZeroPageCeiling,
    #[error("max items must be greater than zero")]
    ZeroMaxItems,
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,

    #[error("filter field cannot be empty")]
    EmptyFilterField,
    #[error("filter '{field}' has an empty value")]
    EmptyFilterValue { field: String },
    #[error("filter field '{field}' contains invalid character '{ch}'")]
    InvalidFilterField { field: String, ch: char },
    #[error("filter '{value}' must look like field=value, field>=value or field<=value")]
    InvalidFilterSyntax { value: String },
    #[error("lower bound on sort key '{field}' is managed by the partition planner")]
    ReservedSortFilter { field: String },

    #[error("sort key cannot be empty")]
    EmptySortKey,
    #[error("timestamp must be RFC3339 or 'YYYY-MM-DD HH:MM:SS': '{value}'")]
    InvalidTimestamp { value: String },

    #[error("item identifier cannot be empty")]
    EmptyItemId,
}

/// Failure of a governed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Over-limit signals persisted past the configured number of waits.
    #[error("request quota exhausted after {waits} cool-down waits")]
    QuotaExhausted { waits: u32 },

    /// A retryable failure kept recurring until the retry budget ran out.
    #[error("gave up after {attempts} attempts: {message}")]
    TransientExhausted { attempts: u32, message: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("operation cancelled")]
    Cancelled,
}

impl FetchError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::QuotaExhausted { .. } => "fetch.quota_exhausted",
            Self::TransientExhausted { .. } => "fetch.transient_exhausted",
            Self::Source(error) => error.code(),
            Self::Cancelled => "fetch.cancelled",
        }
    }
}

/// Failure writing to or reading from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("failed to encode record '{id}': {message}")]
    Encode { id: String, message: String },

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Warehouse(error) if error.is_locked())
    }
}

/// Run-fatal failure of a header or detail phase.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The items sharing one sort key exceed what a single sub-query can return.
    #[error(
        "cannot partition further: {items} items at or above {sort_key} = {value} \
         fill the page ceiling"
    )]
    PartitionExhausted {
        sort_key: String,
        value: String,
        items: u64,
    },

    /// A truncated sub-query returned nothing past its lower bound because
    /// the source applied the bound earlier than requested.
    #[error(
        "source ignored the lower bound {sort_key} >= {value}: {below} items \
         came back below it and none past it"
    )]
    LowerBoundIgnored {
        sort_key: String,
        value: String,
        below: u64,
    },

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl HarvestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "harvest.validation",
            Self::Fetch(error) => error.code(),
            Self::Store(error) if error.is_locked() => "store.locked",
            Self::Store(_) => "store.failed",
            Self::PartitionExhausted { .. } => "harvest.partition_exhausted",
            Self::LowerBoundIgnored { .. } => "harvest.lower_bound_ignored",
            Self::Worker(_) => "harvest.worker",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Cancelled))
    }
}
