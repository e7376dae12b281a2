mod count;
mod details;
mod headers;
mod quota;
mod run;
mod status;

use std::sync::Arc;
use std::time::Duration;

use docketsync_core::{
    EntityType, HarvestConfig, Harvester, QuerySpec, RegulationsGovAdapter, RemoteSource,
    ReqwestHttpClient, RunStatus, SimulatedSource, Warehouse, WarehouseConfig,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command, QueryArgs};
use crate::error::CliError;

/// Spacing between consecutive sort values in the simulated catalog.
const MOCK_SPACING_SECS: i64 = 3_600;

/// JSON report plus the process exit code it implies.
pub struct CommandOutcome {
    pub report: Value,
    pub exit_code: u8,
}

impl CommandOutcome {
    pub fn done(report: Value) -> Self {
        Self {
            report,
            exit_code: 0,
        }
    }

    pub fn with_status(report: Value, status: RunStatus) -> Self {
        Self {
            report,
            exit_code: exit_code_for(status),
        }
    }
}

pub fn exit_code_for(status: RunStatus) -> u8 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::CompletedWithFailures => 3,
        RunStatus::Halted => 4,
    }
}

pub async fn run(cli: &Cli, cancel: CancellationToken) -> Result<CommandOutcome, CliError> {
    match &cli.command {
        Command::Headers(args) => headers::run(cli, args, cancel).await,
        Command::Details(args) => details::run(cli, args, cancel).await,
        Command::Run(args) => run::run(cli, args, cancel).await,
        Command::Status(args) => status::run(cli, args),
        Command::Quota => quota::run(cli, cancel).await,
        Command::Count(args) => count::run(cli, args, cancel).await,
    }
}

/// The listing and detail endpoints a command talks to.
pub enum Remote {
    Live(Arc<RegulationsGovAdapter>),
    Simulated(Arc<SimulatedSource>),
}

impl Remote {
    pub fn connect(cli: &Cli, entity: EntityType) -> Result<Self, CliError> {
        if cli.mock {
            return Ok(Self::Simulated(Arc::new(SimulatedSource::synthetic(
                entity,
                cli.mock_items,
                MOCK_SPACING_SECS,
            ))));
        }
        let http_client = ReqwestHttpClient::with_options(cli.insecure_tls)?;
        let adapter = RegulationsGovAdapter::new(Arc::new(http_client), cli.api_key.clone())
            .with_timeout_ms(cli.timeout_ms);
        Ok(Self::Live(Arc::new(adapter)))
    }

    pub fn source(&self) -> Arc<dyn RemoteSource> {
        match self {
            Self::Live(adapter) => Arc::clone(adapter) as Arc<dyn RemoteSource>,
            Self::Simulated(source) => Arc::clone(source) as Arc<dyn RemoteSource>,
        }
    }
}

pub fn open_warehouse(cli: &Cli) -> Result<Arc<Warehouse>, CliError> {
    let warehouse = match &cli.db {
        Some(path) => Warehouse::open(WarehouseConfig::at(path))?,
        None => Warehouse::open_default()?,
    };
    Ok(Arc::new(warehouse))
}

pub fn harvest_config(cli: &Cli, page_ceiling: u32, concurrency: usize) -> HarvestConfig {
    let mut config = HarvestConfig {
        page_ceiling,
        batch_size: cli.batch_size,
        detail_concurrency: concurrency,
        ..HarvestConfig::default()
    }
    .with_cool_down(Duration::from_secs(cli.cool_down_secs));
    config.governor.max_over_limit_waits = cli.max_over_limit_waits;
    config
}

pub fn harvester(
    cli: &Cli,
    entity: EntityType,
    config: HarvestConfig,
    cancel: CancellationToken,
) -> Result<Harvester<dyn RemoteSource, Warehouse>, CliError> {
    let remote = Remote::connect(cli, entity)?;
    let warehouse = open_warehouse(cli)?;
    Ok(Harvester::new(remote.source(), warehouse, config, cancel)?)
}

pub fn build_query(args: &QueryArgs, max_items: Option<u64>) -> Result<QuerySpec, CliError> {
    Ok(QuerySpec::builder(args.entity)
        .filters(args.filters.iter().cloned())
        .sort_key(args.sort_key.clone())
        .page_size(args.page_size)
        .max_items(max_items)
        .build()?)
}
