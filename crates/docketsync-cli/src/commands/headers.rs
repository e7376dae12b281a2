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

    let report = harvester.harvest_headers(&query, args.start, args.fresh).await;
    let status = report.status;
    Ok(CommandOutcome::with_status(serde_json::to_value(report)?, status))
}
