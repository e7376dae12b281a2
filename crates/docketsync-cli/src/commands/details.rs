use docketsync_core::walker::DEFAULT_PAGE_CEILING;
use tokio_util::sync::CancellationToken;

use super::{harvest_config, harvester, CommandOutcome};
use crate::cli::{Cli, DetailsArgs};
use crate::error::CliError;

pub async fn run(
    cli: &Cli,
    args: &DetailsArgs,
    cancel: CancellationToken,
) -> Result<CommandOutcome, CliError> {
    let config = harvest_config(cli, DEFAULT_PAGE_CEILING, args.concurrency);
    let harvester = harvester(cli, args.entity, config, cancel)?;
    let ids = (!args.ids.is_empty()).then(|| args.ids.clone());

    let report = harvester.harvest_details(args.entity, ids).await;
    let status = report.status;
    Ok(CommandOutcome::with_status(serde_json::to_value(report)?, status))
}
