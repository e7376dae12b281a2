//! Core of docketsync.
//!
//! This crate contains:
//! - Entity, query and record models with validation
//! - The remote source contract plus the regulations.gov and simulated adapters
//! - The rate governor, page walker and partition planner
//! - The detail fetcher, ingestion sink and resume coordinator
//! - The run controller tying them to the DuckDB warehouse

pub mod adapters;
pub mod config;
pub mod detail;
pub mod domain;
pub mod error;
pub mod governor;
pub mod harvest;
pub mod http_client;
pub mod planner;
pub mod resume;
pub mod retry;
pub mod sink;
pub mod source;
pub mod store;
pub mod walker;

pub use adapters::{Fault, RegulationsGovAdapter, SimulatedSource};
pub use config::HarvestConfig;
pub use detail::{DetailFailure, DetailFetcher, DetailReport};
pub use docketsync_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
pub use domain::{
    EntityType, Filter, FilterOp, HeaderItem, ItemId, QuerySpec, QuerySpecBuilder, Record,
    SortValue,
};
pub use error::{FetchError, HarvestError, StoreError, ValidationError};
pub use self::governor::{GovernorConfig, GovernorPhase, Pacing, QuotaSignal, QuotaSnapshot, RateGovernor};
pub use harvest::{Halt, Harvester, PhaseReport, RunReport};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use planner::{PartitionPlanner, PlanReport, SubQueryReport};
pub use resume::ResumeCoordinator;
pub use retry::{Backoff, RetryConfig};
pub use sink::{IngestionSink, RecordSink, SinkStats};
pub use source::{
    PageEnvelope, PageRequest, RemoteSource, Reply, SourceError, SourceErrorKind, SourceFuture,
};
pub use store::{DurableStore, RunStatus, TableKind, TableRef};
pub use walker::{PageWalker, WalkSummary};
