//! Behavior tests for whole harvest runs
//!
//! These drive the run controller against the simulated catalog and an
//! on-disk DuckDB store, checking what a user sees after a run: rows stored,
//! reports returned and how a later run picks up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docketsync_core::{
    DurableStore, EntityType, Filter, GovernorConfig, HarvestConfig, Harvester, HeaderItem,
    ItemId, PageEnvelope, PageRequest, QuerySpec, Record, RemoteSource, Reply, RunStatus,
    SimulatedSource, SortValue, SourceError, SourceFuture, TableRef, Warehouse,
};
use docketsync_tests::{fast_governor, open_warehouse};
use serde_json::{Map, Value};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

fn open_store(temp: &TempDir) -> Arc<Warehouse> {
    open_warehouse(temp, "docketsync.duckdb")
}

fn fast_config() -> HarvestConfig {
    HarvestConfig {
        governor: fast_governor(
            Duration::from_millis(5),
            GovernorConfig::default().max_over_limit_waits,
        ),
        ..HarvestConfig::default()
    }
}

fn harvester<S: RemoteSource + 'static>(
    source: Arc<S>,
    store: &Arc<Warehouse>,
    config: HarvestConfig,
) -> Harvester<S, Warehouse> {
    Harvester::new(source, Arc::clone(store), config, CancellationToken::new())
        .expect("valid config")
}

fn query(entity: EntityType, page_size: u32) -> QuerySpec {
    QuerySpec::builder(entity)
        .page_size(page_size)
        .build()
        .expect("valid query")
}

/// Serves a fixed number of pages, then fails every listing request.
struct FailingAfter {
    inner: SimulatedSource,
    healthy_pages: AtomicU32,
}

impl RemoteSource for FailingAfter {
    fn fetch_page<'a>(&'a self, request: PageRequest) -> SourceFuture<'a, PageEnvelope> {
        let healthy = self
            .healthy_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if healthy {
            self.inner.fetch_page(request)
        } else {
            Box::pin(async {
                Err::<Reply<PageEnvelope>, _>(SourceError::internal("connection reset by peer"))
            })
        }
    }

    fn fetch_detail<'a>(&'a self, entity: EntityType, id: &'a ItemId) -> SourceFuture<'a, Record> {
        self.inner.fetch_detail(entity, id)
    }
}

// =============================================================================
// Partitioning past the page ceiling
// =============================================================================

#[tokio::test]
async fn when_twelve_thousand_items_match_then_three_sub_queries_store_each_once() {
    // Given: 12,000 comments with distinct timestamps and the live service limits
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(SimulatedSource::synthetic(EntityType::Comments, 12_000, 60));
    let harvester = harvester(Arc::clone(&source), &store, fast_config());

    // When: Headers are harvested with 250-item pages
    let report = harvester
        .harvest_headers(&query(EntityType::Comments, 250), None, false)
        .await;

    // Then: Three sub-queries cover 5,000 + 5,000 + 2,000 new items
    assert_eq!(report.status, RunStatus::Completed);
    let plan = report.plan.expect("plan report");
    assert_eq!(plan.sub_queries.len(), 3);
    let emitted = plan
        .sub_queries
        .iter()
        .map(|sub_query| sub_query.emitted)
        .collect::<Vec<_>>();
    assert_eq!(emitted, vec![5_000, 4_999, 2_001]);
    assert_eq!(plan.duplicates(), 2, "one boundary item per transition");
    assert_eq!(plan.unique_items, 12_000);
    assert_eq!(plan.total_elements, Some(12_000));

    // And: The cursor never moved backwards
    let bounds = plan
        .sub_queries
        .iter()
        .map(|sub_query| sub_query.lower_bound)
        .collect::<Vec<_>>();
    assert!(bounds.windows(2).all(|pair| pair[0] <= pair[1]));

    // And: The store holds every identifier exactly once
    assert_eq!(store.count_rows("comments_header").expect("count"), 12_000);
    assert_eq!(report.sink.inserted, 12_000);
}

#[tokio::test]
async fn when_a_plateau_exceeds_the_ceiling_then_the_run_halts_with_partition_exhaustion() {
    // Given: 6,000 documents sharing one timestamp
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(SimulatedSource::synthetic(EntityType::Documents, 6_000, 0));
    let harvester = harvester(source, &store, fast_config());

    // When: Headers are harvested
    let report = harvester
        .harvest_headers(&query(EntityType::Documents, 250), None, false)
        .await;

    // Then: The run halts with the plateau reported instead of looping
    assert_eq!(report.status, RunStatus::Halted);
    let halt = report.halt.expect("halt");
    assert_eq!(halt.code, "harvest.partition_exhausted");
    assert!(halt.message.contains("lastModifiedDate"));
    assert!(halt.message.contains("2024-01-01T00:00:00Z"));

    // And: What was accepted before the halt is durable
    assert!(halt.flushed);
    assert_eq!(report.sink.pending, 0);
    assert_eq!(store.count_rows("documents_header").expect("count"), 5_000);
}

// =============================================================================
// Idempotence and resume
// =============================================================================

#[tokio::test]
async fn when_the_same_harvest_runs_twice_then_the_second_adds_no_headers() {
    // Given: A completed header harvest
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(SimulatedSource::synthetic(EntityType::Dockets, 40, 600).with_page_ceiling(2));
    let config = HarvestConfig {
        page_ceiling: 2,
        ..fast_config()
    };
    let harvester = harvester(source, &store, config);
    let first = harvester
        .harvest_headers(&query(EntityType::Dockets, 5), None, false)
        .await;
    assert_eq!(first.sink.inserted, 40);

    // When: The same harvest runs again, from scratch and resumed
    let fresh = harvester
        .harvest_headers(&query(EntityType::Dockets, 5), None, true)
        .await;
    let resumed = harvester
        .harvest_headers(&query(EntityType::Dockets, 5), None, false)
        .await;

    // Then: Neither inserts anything
    assert_eq!(fresh.status, RunStatus::Completed);
    assert_eq!(fresh.sink.inserted, 0);
    assert_eq!(resumed.sink.inserted, 0);
    assert_eq!(resumed.sink.committed, 1, "only the cursor item is re-read");
    assert_eq!(store.count_rows("dockets_header").expect("count"), 40);
}

#[tokio::test]
async fn when_a_run_fails_midway_then_the_next_run_resumes_from_the_stored_cursor() {
    // Given: A listing that breaks after the first sub-query's two pages
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(FailingAfter {
        inner: SimulatedSource::synthetic(EntityType::Comments, 30, 60).with_page_ceiling(2),
        healthy_pages: AtomicU32::new(2),
    });
    let config = HarvestConfig {
        page_ceiling: 2,
        batch_size: 4,
        ..fast_config()
    };
    let crashed = harvester(Arc::clone(&source), &store, config.clone())
        .harvest_headers(&query(EntityType::Comments, 5), None, false)
        .await;

    // Then: The failed run halted with its accepted items flushed
    assert_eq!(crashed.status, RunStatus::Halted);
    let halt = crashed.halt.expect("halt");
    assert_eq!(halt.code, "source.internal");
    assert!(halt.flushed);
    assert_eq!(store.count_rows("comments_header").expect("count"), 10);

    // When: The service recovers and the harvest is started again
    source.healthy_pages.store(u32::MAX, Ordering::SeqCst);
    let resumed = harvester(Arc::clone(&source), &store, config)
        .harvest_headers(&query(EntityType::Comments, 5), None, false)
        .await;

    // Then: It starts at the last stored key and fills in the rest
    let expected_cursor = source.inner.items()[9].sort_value;
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.resumed_from, Some(expected_cursor));
    assert_eq!(resumed.sink.inserted, 20);
    assert_eq!(store.count_rows("comments_header").expect("count"), 30);
}

fn docket_comments(docket: &str, first_second: i64, count: i64) -> Vec<HeaderItem> {
    (0..count)
        .map(|index| {
            let mut attributes = Map::new();
            attributes.insert(String::from("docketId"), Value::from(docket));
            HeaderItem {
                id: ItemId::new(format!("{docket}-{index:04}")).expect("valid id"),
                sort_value: SortValue::from_unix_timestamp(first_second + index * 60)
                    .expect("valid key"),
                attributes,
            }
        })
        .collect()
}

fn docket_query(docket: &str) -> QuerySpec {
    QuerySpec::builder(EntityType::Comments)
        .filter(Filter::eq("docketId", docket).expect("valid filter"))
        .page_size(5)
        .build()
        .expect("valid query")
}

#[tokio::test]
async fn when_the_filters_change_then_the_run_does_not_resume_from_another_filters_cursor() {
    // Given: One docket with recent comments and one with older comments,
    // and a completed harvest of the recent docket
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let mut items = docket_comments("EPA-HQ-OAR-2024-0001", 1_717_200_000, 8);
    items.extend(docket_comments("EPA-HQ-OAR-2019-0002", 1_546_300_800, 8));
    let source = Arc::new(SimulatedSource::new(EntityType::Comments, items));
    let harvester = harvester(source, &store, fast_config());
    let recent = harvester
        .harvest_headers(&docket_query("EPA-HQ-OAR-2024-0001"), None, false)
        .await;
    assert_eq!(recent.sink.inserted, 8);

    // When: The older docket is harvested without --fresh
    let older = harvester
        .harvest_headers(&docket_query("EPA-HQ-OAR-2019-0002"), None, false)
        .await;

    // Then: It starts from the beginning and stores every one of its comments
    assert_eq!(older.status, RunStatus::Completed);
    assert_eq!(older.resumed_from, None);
    assert_eq!(older.sink.inserted, 8);
    assert_eq!(store.count_rows("comments_header").expect("count"), 16);

    // And: Repeating the recent docket resumes from its own cursor
    let repeated = harvester
        .harvest_headers(&docket_query("EPA-HQ-OAR-2024-0001"), None, false)
        .await;
    assert_eq!(
        repeated.resumed_from,
        Some(SortValue::from_unix_timestamp(1_717_200_000 + 7 * 60).expect("valid key"))
    );
    assert_eq!(repeated.sink.inserted, 0);
    assert_eq!(repeated.sink.committed, 1);
}

// =============================================================================
// Details
// =============================================================================

#[tokio::test]
async fn when_forty_of_a_hundred_details_exist_then_exactly_sixty_are_fetched() {
    // Given: 100 stored headers and 40 stored details
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(SimulatedSource::synthetic(EntityType::Comments, 100, 60));
    let harvester = harvester(Arc::clone(&source), &store, fast_config());
    let headers = harvester
        .harvest_headers(&query(EntityType::Comments, 250), None, false)
        .await;
    assert_eq!(headers.sink.inserted, 100);

    let existing = source.items()[..40]
        .iter()
        .map(|item| item.clone().into_record())
        .collect::<Vec<_>>();
    let stored = store
        .upsert_batch(TableRef::detail(EntityType::Comments), "seed", &existing)
        .expect("seed details");
    assert_eq!(stored, 40);

    // When: The detail pass runs without explicit identifiers
    let report = harvester.harvest_details(EntityType::Comments, None).await;

    // Then: Only the 60 missing identifiers are requested
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(source.detail_requests(), 60);
    let requested = source.requested_details().into_iter().collect::<HashSet<_>>();
    let expected = source.items()[40..]
        .iter()
        .map(|item| item.id.clone())
        .collect::<HashSet<_>>();
    assert_eq!(requested, expected);
    assert_eq!(store.count_rows("comments_detail").expect("count"), 100);
}

#[tokio::test]
async fn when_some_details_are_gone_then_the_run_completes_and_lists_them() {
    // Given: Stored headers, two of which have been withdrawn upstream
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let catalog = SimulatedSource::synthetic(EntityType::Documents, 12, 60);
    let gone = vec![catalog.items()[2].id.clone(), catalog.items()[7].id.clone()];
    let source = Arc::new(
        catalog
            .without_detail(gone[0].clone())
            .failing_detail(
                gone[1].clone(),
                SourceError::duplicated_on_server("Incorrect result size: expected 1, actual 2"),
            ),
    );
    let harvester = harvester(source, &store, fast_config());

    // When: Headers and details are harvested together
    let report = harvester
        .run(&query(EntityType::Documents, 250), None, false)
        .await;

    // Then: The run completes with the failures listed
    assert_eq!(report.outcome(), RunStatus::CompletedWithFailures);
    let details = report.details.expect("detail phase");
    let failures = details.details.expect("detail report").failures;
    let failed_ids = failures.iter().map(|failure| failure.id.clone()).collect::<Vec<_>>();
    assert_eq!(failed_ids, gone);
    assert_eq!(store.count_rows("documents_detail").expect("count"), 10);

    // And: The ledger recorded both passes
    let runs = store.recent_runs(5).expect("runs");
    assert_eq!(runs.len(), 2);
    assert!(runs
        .iter()
        .any(|run| run.phase == "detail" && run.status == "completed_with_failures" && run.failures == 2));
}

#[tokio::test]
async fn when_explicit_ids_are_already_stored_then_only_new_ones_are_fetched() {
    // Given: One detail already stored
    let temp = tempdir().expect("tempdir");
    let store = open_store(&temp);
    let source = Arc::new(SimulatedSource::synthetic(EntityType::Dockets, 5, 60));
    let harvester = harvester(Arc::clone(&source), &store, fast_config());
    let ids = source
        .items()
        .iter()
        .map(|item| item.id.clone())
        .collect::<Vec<_>>();
    let first = harvester
        .harvest_details(EntityType::Dockets, Some(ids[..1].to_vec()))
        .await;
    assert_eq!(first.sink.inserted, 1);

    // When: Details are requested for three ids including the stored one
    let report = harvester
        .harvest_details(EntityType::Dockets, Some(ids[..3].to_vec()))
        .await;

    // Then: Only the two new ids are requested
    assert_eq!(report.details.expect("detail report").requested, 2);
    assert_eq!(source.detail_requests(), 3);
    assert_eq!(store.count_rows("dockets_detail").expect("count"), 3);
}
