use docketsync_core::{DurableStore, EntityType, ResumeCoordinator, TableRef};
use serde::Serialize;

use super::{open_warehouse, CommandOutcome};
use crate::cli::{Cli, StatusArgs};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct EntityStatus {
    entity: EntityType,
    headers: u64,
    details: u64,
    cursor: Option<String>,
    pending_details: usize,
}

pub fn run(cli: &Cli, args: &StatusArgs) -> Result<CommandOutcome, CliError> {
    let warehouse = open_warehouse(cli)?;
    let coordinator = ResumeCoordinator::new(&*warehouse);

    let mut entities = Vec::with_capacity(EntityType::ALL.len());
    for entity in EntityType::ALL {
        let header = TableRef::header(entity);
        let cursor = DurableStore::max_sort_key(&*warehouse, header)?;
        entities.push(EntityStatus {
            entity,
            headers: warehouse.count_rows(header.name())?,
            details: warehouse.count_rows(TableRef::detail(entity).name())?,
            cursor: cursor.map(|value| value.to_string()),
            pending_details: coordinator.pending_detail_ids(entity)?.len(),
        });
    }

    let report = serde_json::json!({
        "db_path": warehouse.db_path(),
        "entities": entities,
        "recent_runs": warehouse.recent_runs(args.runs)?,
    });
    Ok(CommandOutcome::done(report))
}
