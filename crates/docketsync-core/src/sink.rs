//! Batching sink in front of the durable store.

use serde::Serialize;
use tracing::{error, info};

use crate::domain::Record;
use crate::store::{DurableStore, TableRef};
use crate::StoreError;

/// Consumer of records produced by the planner or the detail fetcher.
pub trait RecordSink {
    fn accept(&mut self, record: Record) -> Result<(), StoreError>;

    /// Called once the producer has emitted its last record.
    fn end_of_sequence(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: Record) -> Result<(), StoreError> {
        self.push(record);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Records handed to the sink.
    pub accepted: u64,
    /// Records in batches the store committed.
    pub committed: u64,
    /// Committed records that were new to the store.
    pub inserted: u64,
    pub flushes: u32,
    /// Records buffered but not yet committed.
    pub pending: usize,
}

/// Buffers records and writes them to one table in batches of `batch_size`.
///
/// A failed flush keeps its records buffered so the next flush retries them.
pub struct IngestionSink<'a, St: DurableStore + ?Sized> {
    store: &'a St,
    table: TableRef,
    run_id: String,
    batch_size: usize,
    batch: Vec<Record>,
    stats: SinkStats,
}

impl<'a, St: DurableStore + ?Sized> IngestionSink<'a, St> {
    pub fn new(store: &'a St, table: TableRef, run_id: impl Into<String>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            table,
            run_id: run_id.into(),
            batch_size,
            batch: Vec::with_capacity(batch_size),
            stats: SinkStats::default(),
        }
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            pending: self.batch.len(),
            ..self.stats
        }
    }

    /// Commit everything buffered. Returns the number of new rows.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        if self.batch.is_empty() {
            return Ok(0);
        }
        match self.store.upsert_batch(self.table, &self.run_id, &self.batch) {
            Ok(inserted) => {
                let committed = self.batch.len();
                self.batch.clear();
                self.stats.committed += committed as u64;
                self.stats.inserted += inserted as u64;
                self.stats.flushes += 1;
                info!(
                    table = self.table.name(),
                    committed,
                    inserted,
                    total_committed = self.stats.committed,
                    "batch committed"
                );
                Ok(inserted)
            }
            Err(store_error) => {
                error!(
                    table = self.table.name(),
                    pending = self.batch.len(),
                    error = %store_error,
                    "batch commit failed; records stay buffered"
                );
                Err(store_error)
            }
        }
    }
}

impl<St: DurableStore + ?Sized> RecordSink for IngestionSink<'_, St> {
    fn accept(&mut self, record: Record) -> Result<(), StoreError> {
        self.batch.push(record);
        self.stats.accepted += 1;
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn end_of_sequence(&mut self) -> Result<(), StoreError> {
        self.flush().map(|_| ())
    }
}
