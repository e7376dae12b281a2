use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{build_query, harvest_config, harvester, CommandOutcome};
use crate::cli::{Cli, HarvestArgs};
use crate::error::CliError;

pub async fn run(
    cli: &Cli,
    args: &HarvestArgs,
    cancel: CancellationToken,
) -> Result<CommandOutcome, CliError> {
    let query = build_query(&args.query, args.max_items)?;
    let config = harvest_config(cli, args.page_ceiling, args.concurrency);
    let harvester = harvester(cli, query.entity(), config, cancel)?;

    let report = harvester.run(&query, args.start, args.fresh).await;
    let outcome = report.outcome();
    let mut value = serde_json::to_value(&report)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(String::from("outcome"), json!(outcome));
    }
    Ok(CommandOutcome::with_status(value, outcome))
}
