//! Partition planner.
//!
//! A listing query can reach at most `page_ceiling * page_size` items. When
//! more match, the planner issues successive sub-queries, each with an
//! inclusive lower bound equal to the greatest sort value the previous
//! sub-query returned. Items sitting exactly on that boundary come back
//! again; the planner remembers every identifier seen on the boundary value
//! and drops those repeats, so each item is emitted once no matter how the
//! service orders ties. Items below the bound (the service may widen it when
//! it reads the bound in a different offset) are dropped the same way, and
//! they never count as progress: the next bound comes only from items at or
//! above the current one.
//!
//! If a sub-query ends on the value it started from, the items sharing that
//! one value fill the ceiling by themselves and no bound can split them. That
//! is reported as [`HarvestError::PartitionExhausted`]. When the ceiling was
//! filled by items below the bound instead, the source is not honouring the
//! bound and the run stops with [`HarvestError::LowerBoundIgnored`].

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{ItemId, QuerySpec, SortValue};
use crate::governor::RateGovernor;
use crate::sink::RecordSink;
use crate::source::RemoteSource;
use crate::walker::{PageWalker, WalkSummary};
use crate::HarvestError;

/// Where the next sub-query starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue(SortValue),
    /// The sub-query made no progress past `old`.
    Plateau(SortValue),
}

/// Next inclusive lower bound given the previous bound and the last key seen.
pub fn next_lower_bound(old: Option<SortValue>, last_key: SortValue) -> Advance {
    match old {
        Some(old) if last_key <= old => Advance::Plateau(old),
        _ => Advance::Continue(last_key),
    }
}

/// Whether a finished sub-query left matching items unreached.
pub fn needs_another_sub_query(summary: &WalkSummary) -> bool {
    summary.truncated && summary.items > 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubQueryReport {
    pub lower_bound: Option<SortValue>,
    pub pages: u32,
    pub fetched: u64,
    pub emitted: u64,
    pub duplicates: u64,
    pub total_elements: Option<u64>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub sub_queries: Vec<SubQueryReport>,
    /// Distinct items emitted to the sink.
    pub unique_items: u64,
    /// Total the service reported for the first sub-query.
    pub total_elements: Option<u64>,
    pub limit_reached: bool,
    /// Greatest sort value emitted.
    pub final_cursor: Option<SortValue>,
}

impl PlanReport {
    pub fn fetched(&self) -> u64 {
        self.sub_queries.iter().map(|sub_query| sub_query.fetched).sum()
    }

    pub fn duplicates(&self) -> u64 {
        self.sub_queries.iter().map(|sub_query| sub_query.duplicates).sum()
    }
}

pub struct PartitionPlanner<'a, S: RemoteSource + ?Sized> {
    source: &'a S,
    governor: &'a RateGovernor,
    page_ceiling: u32,
}

impl<'a, S: RemoteSource + ?Sized> PartitionPlanner<'a, S> {
    pub fn new(source: &'a S, governor: &'a RateGovernor, page_ceiling: u32) -> Self {
        Self {
            source,
            governor,
            page_ceiling: page_ceiling.max(1),
        }
    }

    /// Retrieve every item matching `query` at or above `start`, emitting
    /// each distinct item to `sink` once, in sort order.
    ///
    /// Stops early, with exactly `max_items` emitted, when the query sets a
    /// limit.
    pub async fn run<K: RecordSink + ?Sized>(
        &self,
        query: &QuerySpec,
        start: Option<SortValue>,
        sink: &mut K,
    ) -> Result<PlanReport, HarvestError> {
        let limit = query.max_items();
        let mut report = PlanReport::default();
        let mut lower_bound = start;
        let mut boundary_ids: HashSet<ItemId> = HashSet::new();

        'sub_queries: loop {
            let mut walker =
                PageWalker::new(self.source, self.governor, query, lower_bound, self.page_ceiling);
            let mut sub_query = SubQueryReport {
                lower_bound,
                pages: 0,
                fetched: 0,
                emitted: 0,
                duplicates: 0,
                total_elements: None,
                truncated: false,
            };
            // Greatest key at or above the bound, and the identifiers on it.
            let mut tail_key: Option<SortValue> = None;
            let mut tail_ids: HashSet<ItemId> = HashSet::new();
            let mut below: u64 = 0;

            while let Some(page) = walker.next_page().await? {
                if report.sub_queries.is_empty() && report.total_elements.is_none() {
                    report.total_elements = Some(page.total_elements);
                    info!(
                        entity = %query.entity(),
                        total_elements = page.total_elements,
                        "matching items reported"
                    );
                }
                for item in page.items {
                    sub_query.fetched += 1;
                    if lower_bound.is_some_and(|bound| item.sort_value < bound) {
                        below += 1;
                        sub_query.duplicates += 1;
                        continue;
                    }
                    if tail_key < Some(item.sort_value) {
                        tail_key = Some(item.sort_value);
                        tail_ids.clear();
                    }
                    if tail_key == Some(item.sort_value) {
                        tail_ids.insert(item.id.clone());
                    }

                    let on_boundary = Some(item.sort_value) == lower_bound;
                    if on_boundary && boundary_ids.contains(&item.id) {
                        sub_query.duplicates += 1;
                        continue;
                    }

                    let sort_value = item.sort_value;
                    sink.accept(item.into_record())?;
                    sub_query.emitted += 1;
                    report.unique_items += 1;
                    report.final_cursor = report.final_cursor.max(Some(sort_value));

                    if limit.is_some_and(|limit| report.unique_items >= limit) {
                        report.limit_reached = true;
                        let summary = walker.summary();
                        sub_query.pages = summary.pages;
                        sub_query.total_elements = summary.total_elements;
                        report.sub_queries.push(sub_query);
                        info!(
                            unique_items = report.unique_items,
                            "item limit reached; stopping"
                        );
                        break 'sub_queries;
                    }
                }
                info!(
                    entity = %query.entity(),
                    sub_query = report.sub_queries.len() + 1,
                    retrieved = report.unique_items,
                    "page processed"
                );
            }

            let summary = walker.summary();
            sub_query.pages = summary.pages;
            sub_query.total_elements = summary.total_elements;
            sub_query.truncated = summary.truncated;
            report.sub_queries.push(sub_query);

            if !needs_another_sub_query(&summary) {
                break;
            }
            let advance = tail_key.map(|last_key| next_lower_bound(lower_bound, last_key));
            if below > 0 && !matches!(advance, Some(Advance::Continue(_))) {
                let value = lower_bound.map(|bound| bound.to_string()).unwrap_or_default();
                warn!(
                    sort_key = query.sort_key(),
                    value = %value,
                    below,
                    "sub-query made no progress past a bound the source did not apply"
                );
                return Err(HarvestError::LowerBoundIgnored {
                    sort_key: query.sort_key().to_owned(),
                    value,
                    below,
                });
            }
            let Some(advance) = advance else {
                break;
            };
            match advance {
                Advance::Continue(next) => {
                    info!(
                        entity = %query.entity(),
                        lower_bound = %next,
                        retrieved = report.unique_items,
                        "sub-query truncated; advancing lower bound"
                    );
                    lower_bound = Some(next);
                    boundary_ids = tail_ids;
                }
                Advance::Plateau(value) => {
                    warn!(
                        sort_key = query.sort_key(),
                        value = %value,
                        items = summary.items,
                        "sort value plateau fills the page ceiling"
                    );
                    return Err(HarvestError::PartitionExhausted {
                        sort_key: query.sort_key().to_owned(),
                        value: value.to_string(),
                        items: summary.items,
                    });
                }
            }
        }

        sink.end_of_sequence()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::adapters::SimulatedSource;
    use crate::domain::{EntityType, HeaderItem, Record};
    use crate::governor::GovernorConfig;
    use crate::source::{PageEnvelope, PageRequest, SourceFuture};

    /// Reads every lower bound an hour earlier than asked, the way a service
    /// misreading the bound's offset would.
    struct EarlyBound(SimulatedSource);

    impl RemoteSource for EarlyBound {
        fn fetch_page<'a>(&'a self, mut request: PageRequest) -> SourceFuture<'a, PageEnvelope> {
            request.lower_bound = request.lower_bound.map(|bound| {
                SortValue::from_unix_timestamp(bound.unix_timestamp() - 3_600).expect("earlier")
            });
            self.0.fetch_page(request)
        }

        fn fetch_detail<'a>(&'a self, entity: EntityType, id: &'a ItemId) -> SourceFuture<'a, Record> {
            self.0.fetch_detail(entity, id)
        }
    }

    fn governor() -> RateGovernor {
        RateGovernor::new(
            GovernorConfig {
                pacing: None,
                ..GovernorConfig::default()
            },
            CancellationToken::new(),
        )
    }

    fn key(seconds: i64) -> SortValue {
        SortValue::from_unix_timestamp(1_600_000_000 + seconds).expect("key")
    }

    fn item(id: &str, seconds: i64) -> HeaderItem {
        HeaderItem {
            id: ItemId::new(id).expect("id"),
            sort_value: key(seconds),
            attributes: Map::new(),
        }
    }

    fn query(page_size: u32, max_items: Option<u64>) -> QuerySpec {
        QuerySpec::builder(EntityType::Comments)
            .page_size(page_size)
            .max_items(max_items)
            .build()
            .expect("query")
    }

    #[test]
    fn lower_bound_advances_only_past_the_old_one() {
        assert_eq!(next_lower_bound(None, key(5)), Advance::Continue(key(5)));
        assert_eq!(next_lower_bound(Some(key(1)), key(5)), Advance::Continue(key(5)));
        assert_eq!(next_lower_bound(Some(key(5)), key(5)), Advance::Plateau(key(5)));
    }

    #[tokio::test]
    async fn boundary_plateau_items_are_emitted_once() {
        // Ceiling of 2 pages x 3 items; five items share key 10 across the
        // first boundary.
        let mut items = vec![item("A", 1), item("B", 2), item("C", 3)];
        for id in ["P1", "P2", "P3", "P4", "P5"] {
            items.push(item(id, 10));
        }
        items.extend([item("Z1", 20), item("Z2", 21)]);
        let source = SimulatedSource::new(EntityType::Comments, items).with_page_ceiling(2);
        let governor = governor();
        let planner = PartitionPlanner::new(&source, &governor, 2);
        let mut sink: Vec<Record> = Vec::new();

        let report = planner.run(&query(3, None), None, &mut sink).await.expect("run");

        let mut ids = sink.iter().map(|record| record.id.to_string()).collect::<Vec<_>>();
        assert_eq!(ids.len(), 10);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_eq!(report.unique_items, 10);
        assert_eq!(report.sub_queries.len(), 3);
        assert_eq!(report.sub_queries[1].lower_bound, Some(key(10)));
        assert_eq!(report.sub_queries[1].duplicates, 3);
        assert_eq!(report.sub_queries[2].lower_bound, Some(key(20)));
        assert_eq!(report.final_cursor, Some(key(21)));
    }

    #[tokio::test]
    async fn stops_at_exactly_max_items() {
        let source = SimulatedSource::synthetic(EntityType::Comments, 40, 5).with_page_ceiling(2);
        let governor = governor();
        let planner = PartitionPlanner::new(&source, &governor, 2);
        let mut sink: Vec<Record> = Vec::new();

        let report = planner
            .run(&query(5, Some(17)), None, &mut sink)
            .await
            .expect("run");

        assert_eq!(sink.len(), 17);
        assert!(report.limit_reached);
    }

    #[tokio::test]
    async fn plateau_wider_than_the_ceiling_is_fatal() {
        let items = (0..9).map(|index| item(&format!("T{index}"), 7)).collect();
        let source = SimulatedSource::new(EntityType::Comments, items).with_page_ceiling(2);
        let governor = governor();
        let planner = PartitionPlanner::new(&source, &governor, 2);
        let mut sink: Vec<Record> = Vec::new();

        let error = planner
            .run(&query(3, None), None, &mut sink)
            .await
            .expect_err("plateau");

        assert!(matches!(error, HarvestError::PartitionExhausted { items: 6, .. }));
    }

    #[tokio::test]
    async fn items_below_an_ignored_bound_are_not_mistaken_for_a_plateau() {
        // 20 items a minute apart: an hour-early bound returns only items
        // already seen, so no sub-query can move past the first boundary.
        let source = EarlyBound(
            SimulatedSource::synthetic(EntityType::Comments, 20, 60).with_page_ceiling(2),
        );
        let governor = governor();
        let planner = PartitionPlanner::new(&source, &governor, 2);
        let mut sink: Vec<Record> = Vec::new();

        let error = planner
            .run(&query(3, None), None, &mut sink)
            .await
            .expect_err("bound ignored");

        assert!(
            matches!(error, HarvestError::LowerBoundIgnored { below: 5, .. }),
            "{error:?}"
        );
        assert_eq!(error.code(), "harvest.lower_bound_ignored");
        assert_eq!(sink.len(), 6);
    }

    #[tokio::test]
    async fn widened_bounds_still_advance_on_items_past_the_bound() {
        let source = EarlyBound(
            SimulatedSource::synthetic(EntityType::Comments, 20, 1_000).with_page_ceiling(2),
        );
        let governor = governor();
        let planner = PartitionPlanner::new(&source, &governor, 2);
        let mut sink: Vec<Record> = Vec::new();

        let report = planner.run(&query(3, None), None, &mut sink).await.expect("run");

        let mut ids = sink.iter().map(|record| record.id.to_string()).collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        assert_eq!(report.unique_items, 20);
        assert!(report.sub_queries.len() > 2);
        assert_eq!(
            report.final_cursor,
            Some(SortValue::from_unix_timestamp(1_704_067_200 + 19_000).expect("last"))
        );
    }

    #[tokio::test]
    async fn a_result_set_of_exactly_the_ceiling_needs_one_sub_query() {
        let source = SimulatedSource::synthetic(EntityType::Comments, 6, 60).with_page_ceiling(2);
        let governor = governor();
        let planner = PartitionPlanner::new(&source, &governor, 2);
        let mut sink: Vec<Record> = Vec::new();

        let report = planner.run(&query(3, None), None, &mut sink).await.expect("run");

        assert_eq!(sink.len(), 6);
        assert_eq!(report.sub_queries.len(), 1);
        assert_eq!(report.sub_queries[0].pages, 2);
        assert!(!report.sub_queries[0].truncated);
    }
}
