use std::time::Duration;

use crate::governor::GovernorConfig;
use crate::walker::DEFAULT_PAGE_CEILING;
use crate::ValidationError;

/// Rows buffered before the sink commits a batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Tunables for a harvest run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// Pages the service serves per query.
    pub page_ceiling: u32,
    pub batch_size: usize,
    /// Detail requests allowed in flight at once.
    pub detail_concurrency: usize,
    pub governor: GovernorConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_ceiling: DEFAULT_PAGE_CEILING,
            batch_size: DEFAULT_BATCH_SIZE,
            detail_concurrency: 1,
            governor: GovernorConfig::default(),
        }
    }
}

impl HarvestConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_ceiling == 0 {
            return Err(ValidationError::ZeroPageCeiling);
        }
        if self.batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize);
        }
        if self.detail_concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.governor.cool_down = cool_down;
        self
    }
}
