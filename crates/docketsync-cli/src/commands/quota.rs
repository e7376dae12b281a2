use docketsync_core::domain::DEFAULT_SORT_KEY;
use docketsync_core::{EntityType, PageRequest, RateGovernor, RemoteSource};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{harvest_config, CommandOutcome, Remote};
use crate::cli::Cli;
use crate::error::CliError;

pub async fn run(cli: &Cli, cancel: CancellationToken) -> Result<CommandOutcome, CliError> {
    let governor = RateGovernor::new(harvest_config(cli, 1, 1).governor, cancel);

    match Remote::connect(cli, EntityType::Documents)? {
        Remote::Live(adapter) => {
            governor.call("quota", || adapter.quota_probe()).await?;
        }
        Remote::Simulated(source) => {
            let request = PageRequest {
                entity: EntityType::Documents,
                filters: Vec::new(),
                sort_key: DEFAULT_SORT_KEY.to_owned(),
                lower_bound: None,
                page_number: 1,
                page_size: 1,
            };
            governor
                .call("quota", || source.fetch_page(request.clone()))
                .await?;
        }
    }

    let snapshot = governor.snapshot();
    Ok(CommandOutcome::done(json!({
        "quota_remaining": snapshot.remaining,
        "requests_issued": snapshot.requests_issued,
    })))
}
