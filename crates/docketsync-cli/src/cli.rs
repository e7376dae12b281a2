//! Command-line arguments for docketsync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `headers` | Harvest listing headers for an entity, resuming from the store |
//! | `details` | Fetch detail records for stored headers (or explicit ids) |
//! | `run` | Headers followed by details |
//! | `status` | Row counts, cursors and recent runs from the local store |
//! | `quota` | Remaining request quota for the API key |
//! | `count` | Number of items matching a query |
//!
//! # Examples
//!
//! ```bash
//! docketsync run comments -f docketId=EPA-HQ-OAR-2021-0317 --pretty
//! docketsync headers documents --start "2023-01-01 00:00:00" --max-items 5000
//! docketsync details comments --id EPA-HQ-OAR-2021-0317-0001
//! RUST_LOG=docketsync_core=debug docketsync status
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use docketsync_core::domain::{DEFAULT_SORT_KEY, MAX_PAGE_SIZE};
use docketsync_core::walker::DEFAULT_PAGE_CEILING;
use docketsync_core::{EntityType, Filter, ItemId, SortValue};

/// Resumable harvester for the Regulations.gov v4 API.
#[derive(Debug, Parser)]
#[command(
    name = "docketsync",
    author,
    version,
    about = "Resumable, rate-limited harvester for the Regulations.gov API",
    long_about = "docketsync walks the Regulations.gov listing endpoints past their page \
ceiling by partitioning queries on the sort key, then fetches the detail record of every \
header it stored. Progress lives in a local DuckDB file, so an interrupted run picks up \
where it stopped."
)]
pub struct Cli {
    /// API key sent in the X-Api-Key header.
    #[arg(
        long,
        global = true,
        env = "DOCKETSYNC_API_KEY",
        default_value = "DEMO_KEY",
        hide_env_values = true
    )]
    pub api_key: String,

    /// DuckDB file holding harvested records (default: $DOCKETSYNC_HOME/docketsync.duckdb).
    #[arg(long, global = true, env = "DOCKETSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Seconds to wait after the API reports the quota as used up.
    #[arg(long, global = true, env = "DOCKETSYNC_COOL_DOWN_SECS", default_value_t = 1_200)]
    pub cool_down_secs: u64,

    /// Consecutive over-limit waits tolerated before the run halts.
    #[arg(long, global = true, default_value_t = 3)]
    pub max_over_limit_waits: u32,

    /// Records buffered before each database commit.
    #[arg(long, global = true, env = "DOCKETSYNC_BATCH_SIZE", default_value_t = 500)]
    pub batch_size: usize,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Accept invalid TLS certificates from the API host.
    #[arg(long, global = true, default_value_t = false)]
    pub insecure_tls: bool,

    /// Serve requests from an in-memory simulated catalog instead of the API.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Items in the simulated catalog.
    #[arg(long, global = true, default_value_t = 1_200)]
    pub mock_items: usize,

    /// Pretty-print the JSON report.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest listing headers into `<entity>_header`.
    Headers(HarvestArgs),
    /// Fetch detail records into `<entity>_detail`.
    Details(DetailsArgs),
    /// Harvest headers, then fetch the details still missing.
    Run(HarvestArgs),
    /// Summarize the local store.
    Status(StatusArgs),
    /// Report the remaining request quota.
    Quota,
    /// Count items matching a query.
    Count(QueryArgs),
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// dockets, documents or comments.
    pub entity: EntityType,

    /// Filter as field=value, field>=value or field<=value (repeatable).
    #[arg(short = 'f', long = "filter")]
    pub filters: Vec<Filter>,

    #[arg(long, default_value = DEFAULT_SORT_KEY)]
    pub sort_key: String,

    #[arg(long, default_value_t = MAX_PAGE_SIZE)]
    pub page_size: u32,
}

#[derive(Debug, Clone, Args)]
pub struct HarvestArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Earliest sort value to harvest (RFC3339, "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD", UTC).
    #[arg(long)]
    pub start: Option<SortValue>,

    /// Stop after this many distinct headers.
    #[arg(long)]
    pub max_items: Option<u64>,

    /// Ignore the cursor stored from earlier runs.
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Pages the API serves per query.
    #[arg(long, default_value_t = DEFAULT_PAGE_CEILING)]
    pub page_ceiling: u32,

    /// Detail requests in flight at once.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Args)]
pub struct DetailsArgs {
    pub entity: EntityType,

    /// Fetch these identifiers instead of the stored headers lacking details (repeatable).
    #[arg(long = "id")]
    pub ids: Vec<ItemId>,

    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {
    /// Recent runs to list.
    #[arg(long, default_value_t = 10)]
    pub runs: usize,
}
