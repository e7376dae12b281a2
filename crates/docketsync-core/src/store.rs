//! Durable store contract and its DuckDB implementation.

use docketsync_warehouse::{ItemRow, Warehouse};
pub use docketsync_warehouse::TableKind;
use serde::Serialize;

use crate::domain::{EntityType, ItemId, Record, SortValue};
use crate::StoreError;

/// One of an entity's two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub entity: EntityType,
    pub kind: TableKind,
}

impl TableRef {
    pub const fn header(entity: EntityType) -> Self {
        Self {
            entity,
            kind: TableKind::Header,
        }
    }

    pub const fn detail(entity: EntityType) -> Self {
        Self {
            entity,
            kind: TableKind::Detail,
        }
    }

    pub const fn name(self) -> &'static str {
        match (self.entity, self.kind) {
            (EntityType::Dockets, TableKind::Header) => "dockets_header",
            (EntityType::Dockets, TableKind::Detail) => "dockets_detail",
            (EntityType::Documents, TableKind::Header) => "documents_header",
            (EntityType::Documents, TableKind::Detail) => "documents_detail",
            (EntityType::Comments, TableKind::Header) => "comments_header",
            (EntityType::Comments, TableKind::Detail) => "comments_detail",
        }
    }
}

/// Final state recorded for a run in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithFailures,
    Halted,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed_with_failures",
            Self::Halted => "halted",
        }
    }
}

/// Idempotent keyed storage for header and detail records.
///
/// `upsert_batch` must be all-or-nothing and skip identifiers already stored,
/// returning how many rows were actually added.
pub trait DurableStore: Send + Sync {
    fn upsert_batch(
        &self,
        table: TableRef,
        run_id: &str,
        records: &[Record],
    ) -> Result<usize, StoreError>;

    fn max_sort_key(&self, table: TableRef) -> Result<Option<SortValue>, StoreError>;

    /// Greatest sort key among rows written by runs begun with `criteria`.
    fn max_sort_key_for(
        &self,
        table: TableRef,
        criteria: &str,
    ) -> Result<Option<SortValue>, StoreError>;

    /// Identifiers in `header` with no row in `detail`, in sort order.
    fn identifiers_missing_from(
        &self,
        detail: TableRef,
        header: TableRef,
    ) -> Result<Vec<ItemId>, StoreError>;

    fn contains(&self, table: TableRef, id: &ItemId) -> Result<bool, StoreError>;

    /// Open a ledger row; header runs pass their query criteria.
    fn begin_run(
        &self,
        _run_id: &str,
        _table: TableRef,
        _criteria: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn finish_run(
        &self,
        _run_id: &str,
        _status: RunStatus,
        _items: u64,
        _failures: u64,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

impl DurableStore for Warehouse {
    fn upsert_batch(
        &self,
        table: TableRef,
        run_id: &str,
        records: &[Record],
    ) -> Result<usize, StoreError> {
        let rows = records
            .iter()
            .map(|record| {
                let attributes =
                    serde_json::to_string(&record.attributes).map_err(|error| StoreError::Encode {
                        id: record.id.to_string(),
                        message: error.to_string(),
                    })?;
                Ok(ItemRow {
                    item_id: record.id.as_str().to_owned(),
                    sort_key: record.sort_value.map(|value| value.to_string()),
                    attributes,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(self.upsert_records(table.name(), run_id, &rows)?)
    }

    fn max_sort_key(&self, table: TableRef) -> Result<Option<SortValue>, StoreError> {
        stored_sort_key(table, self.max_sort_key(table.name())?)
    }

    fn max_sort_key_for(
        &self,
        table: TableRef,
        criteria: &str,
    ) -> Result<Option<SortValue>, StoreError> {
        stored_sort_key(table, self.max_sort_key_for(table.name(), criteria)?)
    }

    fn identifiers_missing_from(
        &self,
        detail: TableRef,
        header: TableRef,
    ) -> Result<Vec<ItemId>, StoreError> {
        self.missing_identifiers(detail.name(), header.name())?
            .into_iter()
            .map(|id| {
                ItemId::new(id).map_err(|error| {
                    StoreError::Corrupt(format!("{}.item_id: {error}", header.name()))
                })
            })
            .collect()
    }

    fn contains(&self, table: TableRef, id: &ItemId) -> Result<bool, StoreError> {
        Ok(Warehouse::contains(self, table.name(), id.as_str())?)
    }

    fn begin_run(
        &self,
        run_id: &str,
        table: TableRef,
        criteria: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(Warehouse::begin_run(
            self,
            run_id,
            table.entity.as_str(),
            table.kind.as_str(),
            criteria,
        )?)
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        items: u64,
        failures: u64,
    ) -> Result<(), StoreError> {
        Ok(Warehouse::finish_run(
            self,
            run_id,
            status.as_str(),
            items,
            failures,
        )?)
    }
}

fn stored_sort_key(table: TableRef, value: Option<String>) -> Result<Option<SortValue>, StoreError> {
    value
        .map(|value| {
            SortValue::parse(&value)
                .map_err(|error| StoreError::Corrupt(format!("{}.sort_key: {error}", table.name())))
        })
        .transpose()
}
