mod regulations;
mod simulated;

pub use regulations::{
    RegulationsGovAdapter, API_KEY_HEADER, DEFAULT_BASE_URL, FILTER_TIME_ZONE,
    RATE_LIMIT_REMAINING_HEADER,
};
pub use simulated::{Fault, SimulatedSource};
