//! Run controller: wires the governor, planner, detail fetcher, sink and
//! store together for one header pass, one detail pass, or both.
//!
//! Every pass gets its own run identifier and ledger entry. Whatever the
//! outcome, records already accepted by the sink are flushed before the
//! report is returned.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HarvestConfig;
use crate::detail::{DetailFetcher, DetailReport};
use crate::domain::{EntityType, ItemId, QuerySpec, SortValue};
use crate::governor::{QuotaSnapshot, RateGovernor};
use crate::planner::{PartitionPlanner, PlanReport};
use crate::resume::ResumeCoordinator;
use crate::sink::{IngestionSink, SinkStats};
use crate::source::RemoteSource;
use crate::store::{DurableStore, RunStatus, TableKind, TableRef};
use crate::{HarvestError, StoreError, ValidationError};

/// Why a pass stopped before finishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Halt {
    pub code: &'static str,
    pub message: String,
    /// Every accepted record reached the store.
    pub flushed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub run_id: String,
    pub entity: EntityType,
    pub phase: TableKind,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<SortValue>,
    pub sink: SinkStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<DetailReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<Halt>,
    pub quota: QuotaSnapshot,
}

impl PhaseReport {
    fn open(table: TableRef) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            entity: table.entity,
            phase: table.kind,
            status: RunStatus::Completed,
            resumed_from: None,
            sink: SinkStats::default(),
            plan: None,
            details: None,
            halt: None,
            quota: QuotaSnapshot::default(),
        }
    }

    fn halt_with(&mut self, error: &HarvestError) {
        self.halt = Some(Halt {
            code: error.code(),
            message: error.to_string(),
            flushed: self.sink.pending == 0,
        });
    }

    pub fn failures(&self) -> u64 {
        self.details
            .as_ref()
            .map_or(0, |details| details.failures.len() as u64)
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub headers: PhaseReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<PhaseReport>,
}

impl RunReport {
    pub fn phases(&self) -> impl Iterator<Item = &PhaseReport> {
        std::iter::once(&self.headers).chain(self.details.as_ref())
    }

    pub fn outcome(&self) -> RunStatus {
        overall_status(self.phases())
    }
}

/// Worst status across `phases`.
pub fn overall_status<'a>(phases: impl IntoIterator<Item = &'a PhaseReport>) -> RunStatus {
    phases
        .into_iter()
        .fold(RunStatus::Completed, |status, phase| match (status, phase.status) {
            (RunStatus::Halted, _) | (_, RunStatus::Halted) => RunStatus::Halted,
            (RunStatus::CompletedWithFailures, _) | (_, RunStatus::CompletedWithFailures) => {
                RunStatus::CompletedWithFailures
            }
            _ => RunStatus::Completed,
        })
}

pub struct Harvester<S: RemoteSource + ?Sized + 'static, St: DurableStore + ?Sized> {
    source: Arc<S>,
    store: Arc<St>,
    governor: Arc<RateGovernor>,
    config: HarvestConfig,
}

impl<S: RemoteSource + ?Sized + 'static, St: DurableStore + ?Sized> Harvester<S, St> {
    pub fn new(
        source: Arc<S>,
        store: Arc<St>,
        config: HarvestConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let governor = Arc::new(RateGovernor::new(config.governor.clone(), cancel));
        Ok(Self {
            source,
            store,
            governor,
            config,
        })
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Header pass: walk every item matching `query` from the resume cursor
    /// (or `start` alone when `fresh`) into the entity's header table.
    pub async fn harvest_headers(
        &self,
        query: &QuerySpec,
        start: Option<SortValue>,
        fresh: bool,
    ) -> PhaseReport {
        let table = TableRef::header(query.entity());
        let mut phase = PhaseReport::open(table);

        let cursor = if fresh {
            Ok(start)
        } else {
            ResumeCoordinator::new(&*self.store).resume_cursor(query, start)
        };
        let cursor = match cursor {
            Ok(cursor) => cursor,
            Err(store_error) => {
                phase.halt_with(&store_error.into());
                return self.close(phase);
            }
        };
        phase.resumed_from = cursor;
        self.open_ledger(&phase, table, Some(query.criteria().as_str()));
        info!(
            run_id = %phase.run_id,
            entity = %table.entity,
            cursor = ?cursor.map(|value| value.to_string()),
            "header pass started"
        );

        let mut sink =
            IngestionSink::new(&*self.store, table, phase.run_id.clone(), self.config.batch_size);
        let planner =
            PartitionPlanner::new(&*self.source, &self.governor, self.config.page_ceiling);
        let outcome = planner.run(query, cursor, &mut sink).await;
        let flushed = sink.flush();
        phase.sink = sink.stats();

        match (outcome, flushed) {
            (Ok(plan), Ok(_)) => phase.plan = Some(plan),
            (Ok(plan), Err(store_error)) => {
                phase.plan = Some(plan);
                phase.halt_with(&store_error.into());
            }
            (Err(harvest_error), _) => phase.halt_with(&harvest_error),
        }
        self.close(phase)
    }

    /// Detail pass: fetch the given `ids` not yet stored as details, or every
    /// stored header still lacking a detail record when `ids` is `None`.
    pub async fn harvest_details(&self, entity: EntityType, ids: Option<Vec<ItemId>>) -> PhaseReport {
        let table = TableRef::detail(entity);
        let mut phase = PhaseReport::open(table);

        let ids = match ids {
            Some(ids) => self.not_yet_stored(table, ids),
            None => ResumeCoordinator::new(&*self.store).pending_detail_ids(entity),
        };
        let ids = match ids {
            Ok(ids) => ids,
            Err(store_error) => {
                phase.halt_with(&store_error.into());
                return self.close(phase);
            }
        };
        self.open_ledger(&phase, table, None);
        info!(run_id = %phase.run_id, %entity, ids = ids.len(), "detail pass started");

        let mut sink =
            IngestionSink::new(&*self.store, table, phase.run_id.clone(), self.config.batch_size);
        let fetcher = DetailFetcher::new(
            Arc::clone(&self.source),
            Arc::clone(&self.governor),
            self.config.detail_concurrency,
        );
        let outcome = fetcher.run(entity, ids, &mut sink).await;
        let flushed = sink.flush();
        phase.sink = sink.stats();

        match (outcome, flushed) {
            (Ok(details), Ok(_)) => phase.details = Some(details),
            (Ok(details), Err(store_error)) => {
                phase.details = Some(details);
                phase.halt_with(&store_error.into());
            }
            (Err(harvest_error), _) => phase.halt_with(&harvest_error),
        }
        self.close(phase)
    }

    /// Header pass followed, unless it halted, by a detail pass over the
    /// headers still missing details.
    pub async fn run(&self, query: &QuerySpec, start: Option<SortValue>, fresh: bool) -> RunReport {
        let headers = self.harvest_headers(query, start, fresh).await;
        if headers.is_halted() {
            return RunReport {
                headers,
                details: None,
            };
        }
        let details = self.harvest_details(query.entity(), None).await;
        RunReport {
            headers,
            details: Some(details),
        }
    }

    fn not_yet_stored(&self, table: TableRef, ids: Vec<ItemId>) -> Result<Vec<ItemId>, StoreError> {
        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.store.contains(table, &id)? {
                pending.push(id);
            }
        }
        Ok(pending)
    }

    fn open_ledger(&self, phase: &PhaseReport, table: TableRef, criteria: Option<&str>) {
        if let Err(store_error) = self.store.begin_run(&phase.run_id, table, criteria) {
            warn!(run_id = %phase.run_id, error = %store_error, "could not record run start");
        }
    }

    fn close(&self, mut phase: PhaseReport) -> PhaseReport {
        phase.status = if phase.is_halted() {
            RunStatus::Halted
        } else if phase.failures() > 0 {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };
        phase.quota = self.governor.snapshot();

        if let Err(store_error) = self.store.finish_run(
            &phase.run_id,
            phase.status,
            phase.sink.committed,
            phase.failures(),
        ) {
            warn!(run_id = %phase.run_id, error = %store_error, "could not record run outcome");
        }

        match &phase.halt {
            Some(halt) => error!(
                run_id = %phase.run_id,
                entity = %phase.entity,
                phase = phase.phase.as_str(),
                code = halt.code,
                committed = phase.sink.committed,
                pending = phase.sink.pending,
                "{}",
                halt.message
            ),
            None => info!(
                run_id = %phase.run_id,
                entity = %phase.entity,
                phase = phase.phase.as_str(),
                status = phase.status.as_str(),
                committed = phase.sink.committed,
                inserted = phase.sink.inserted,
                failures = phase.failures(),
                "pass finished"
            ),
        }
        phase
    }
}
