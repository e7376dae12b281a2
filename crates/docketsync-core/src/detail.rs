//! Detail fetcher: one governed request per identifier.
//!
//! Failures specific to one identifier (not found, duplicated on the server,
//! retries exhausted) are recorded and skipped. Quota exhaustion, rejected
//! credentials and cancellation stop the whole pass.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::domain::{EntityType, ItemId};
use crate::governor::RateGovernor;
use crate::sink::RecordSink;
use crate::source::{RemoteSource, SourceErrorKind};
use crate::{FetchError, HarvestError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailFailure {
    pub id: ItemId,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailReport {
    pub requested: u64,
    pub fetched: u64,
    pub failures: Vec<DetailFailure>,
}

pub struct DetailFetcher<S: RemoteSource + ?Sized + 'static> {
    source: Arc<S>,
    governor: Arc<RateGovernor>,
    concurrency: usize,
}

impl<S: RemoteSource + ?Sized + 'static> DetailFetcher<S> {
    pub fn new(source: Arc<S>, governor: Arc<RateGovernor>, concurrency: usize) -> Self {
        Self {
            source,
            governor,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch each distinct identifier once and hand the records to `sink`.
    ///
    /// With a concurrency of one, requests are issued in input order.
    pub async fn run<K: RecordSink + ?Sized>(
        &self,
        entity: EntityType,
        ids: Vec<ItemId>,
        sink: &mut K,
    ) -> Result<DetailReport, HarvestError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut pending = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect::<Vec<_>>()
            .into_iter();
        let mut report = DetailReport {
            requested: pending.len() as u64,
            ..DetailReport::default()
        };
        info!(%entity, requested = report.requested, "fetching details");

        let mut in_flight = JoinSet::new();
        loop {
            while in_flight.len() < self.concurrency {
                let Some(id) = pending.next() else {
                    break;
                };
                let source = Arc::clone(&self.source);
                let governor = Arc::clone(&self.governor);
                in_flight.spawn(async move {
                    let outcome = governor
                        .call("detail", || source.fetch_detail(entity, &id))
                        .await;
                    (id, outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (id, outcome) = joined.map_err(|error| HarvestError::Worker(error.to_string()))?;
            match outcome {
                Ok(mut record) => {
                    record.id = id;
                    if let Err(store_error) = sink.accept(record) {
                        in_flight.abort_all();
                        return Err(store_error.into());
                    }
                    report.fetched += 1;
                    if report.fetched % 100 == 0 {
                        info!(
                            %entity,
                            fetched = report.fetched,
                            requested = report.requested,
                            quota_remaining = ?self.governor.snapshot().remaining,
                            "detail progress"
                        );
                    }
                }
                Err(fetch_error) => match per_item_failure(fetch_error) {
                    Ok((code, message)) => {
                        warn!(%entity, id = %id, code, %message, "skipping item");
                        report.failures.push(DetailFailure { id, code, message });
                    }
                    Err(halt) => {
                        in_flight.abort_all();
                        warn!(%entity, fetched = report.fetched, error = %halt, "detail pass halted");
                        return Err(halt.into());
                    }
                },
            }
        }

        sink.end_of_sequence()?;
        info!(
            %entity,
            fetched = report.fetched,
            failures = report.failures.len(),
            "details finished"
        );
        Ok(report)
    }
}

/// Split failures into those that only affect one identifier and those that
/// stop the pass.
fn per_item_failure(error: FetchError) -> Result<(&'static str, String), FetchError> {
    let halts = match &error {
        FetchError::QuotaExhausted { .. } | FetchError::Cancelled => true,
        FetchError::Source(source_error) => source_error.kind() == SourceErrorKind::Unauthorized,
        FetchError::TransientExhausted { .. } => false,
    };
    if halts {
        Err(error)
    } else {
        Ok((error.code(), error.to_string()))
    }
}
