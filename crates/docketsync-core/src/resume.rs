//! Where an interrupted harvest picks up again.
//!
//! Header runs restart from the greatest sort key stored by earlier runs with
//! the same query criteria (or the caller's start, whichever is later); the
//! inclusive lower bound means the items on that key are fetched again and
//! ignored by the store. Rows written under other criteria never move the
//! cursor, so changing filters starts over instead of skipping items. Detail
//! runs fetch every header identifier that has no detail row yet.

use tracing::info;

use crate::domain::{EntityType, ItemId, QuerySpec, SortValue};
use crate::store::{DurableStore, TableRef};
use crate::StoreError;

pub struct ResumeCoordinator<'a, St: DurableStore + ?Sized> {
    store: &'a St,
}

impl<'a, St: DurableStore + ?Sized> ResumeCoordinator<'a, St> {
    pub fn new(store: &'a St) -> Self {
        Self { store }
    }

    /// Lower bound for the next header run of `query`.
    pub fn resume_cursor(
        &self,
        query: &QuerySpec,
        start: Option<SortValue>,
    ) -> Result<Option<SortValue>, StoreError> {
        let entity = query.entity();
        let criteria = query.criteria();
        let stored = self
            .store
            .max_sort_key_for(TableRef::header(entity), &criteria)?;
        match stored {
            Some(stored) => info!(%entity, cursor = %stored, "resuming after stored headers"),
            None => info!(%entity, %criteria, "no earlier run with these criteria"),
        }
        Ok(stored.max(start))
    }

    /// Header identifiers of `entity` still lacking a detail record, in sort order.
    pub fn pending_detail_ids(&self, entity: EntityType) -> Result<Vec<ItemId>, StoreError> {
        self.store
            .identifiers_missing_from(TableRef::detail(entity), TableRef::header(entity))
    }
}
