use docketsync_core::{PageRequest, RateGovernor, RemoteSource};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{build_query, harvest_config, CommandOutcome, Remote};
use crate::cli::{Cli, QueryArgs};
use crate::error::CliError;

pub async fn run(
    cli: &Cli,
    args: &QueryArgs,
    cancel: CancellationToken,
) -> Result<CommandOutcome, CliError> {
    let query = build_query(args, None)?;
    let governor = RateGovernor::new(harvest_config(cli, 1, 1).governor, cancel);

    let total = match Remote::connect(cli, query.entity())? {
        Remote::Live(adapter) => governor.call("count", || adapter.count(&query)).await?,
        Remote::Simulated(source) => {
            let request = PageRequest {
                entity: query.entity(),
                filters: query.filters().to_vec(),
                sort_key: query.sort_key().to_owned(),
                lower_bound: None,
                page_number: 1,
                page_size: query.page_size(),
            };
            governor
                .call("count", || source.fetch_page(request.clone()))
                .await?
                .total_elements
        }
    };

    Ok(CommandOutcome::done(json!({
        "entity": query.entity(),
        "filters": query.filters().iter().map(ToString::to_string).collect::<Vec<_>>(),
        "total_elements": total,
        "quota_remaining": governor.snapshot().remaining,
    })))
}
