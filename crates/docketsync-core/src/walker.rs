//! Page walker: one sub-query's pages, in order, up to the page ceiling.

use serde::Serialize;
use tracing::debug;

use crate::domain::{QuerySpec, SortValue};
use crate::governor::RateGovernor;
use crate::source::{PageEnvelope, PageRequest, RemoteSource, SourceError};
use crate::FetchError;

/// Most pages the listing endpoint serves for a single query.
pub const DEFAULT_PAGE_CEILING: u32 = 20;

/// What one sub-query produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub pages: u32,
    pub items: u64,
    /// Total the service reported for this sub-query's criteria.
    pub total_elements: Option<u64>,
    /// More matching items exist than this sub-query could reach.
    pub truncated: bool,
    pub last_key: Option<SortValue>,
}

pub struct PageWalker<'a, S: RemoteSource + ?Sized> {
    source: &'a S,
    governor: &'a RateGovernor,
    query: &'a QuerySpec,
    lower_bound: Option<SortValue>,
    page_ceiling: u32,
    next_page: u32,
    finished: bool,
    pages: u32,
    items: u64,
    total_elements: Option<u64>,
    total_pages: Option<u32>,
    last_key: Option<SortValue>,
}

impl<'a, S: RemoteSource + ?Sized> PageWalker<'a, S> {
    pub fn new(
        source: &'a S,
        governor: &'a RateGovernor,
        query: &'a QuerySpec,
        lower_bound: Option<SortValue>,
        page_ceiling: u32,
    ) -> Self {
        Self {
            source,
            governor,
            query,
            lower_bound,
            page_ceiling: page_ceiling.max(1),
            next_page: 1,
            finished: false,
            pages: 0,
            items: 0,
            total_elements: None,
            total_pages: None,
            last_key: None,
        }
    }

    /// Fetch the next page, or `None` once the sub-query is finished: the
    /// last page was served, an empty page came back, or the ceiling was hit.
    ///
    /// # Errors
    /// Governor failures propagate unchanged; a page whose items are out of
    /// sort order is reported as malformed.
    pub async fn next_page(&mut self) -> Result<Option<PageEnvelope>, FetchError> {
        if self.finished {
            return Ok(None);
        }
        let past_known_end = self
            .total_pages
            .is_some_and(|total_pages| self.next_page > total_pages);
        if self.next_page > self.page_ceiling || past_known_end {
            self.finished = true;
            return Ok(None);
        }

        let request = PageRequest {
            entity: self.query.entity(),
            filters: self.query.filters().to_vec(),
            sort_key: self.query.sort_key().to_owned(),
            lower_bound: self.lower_bound,
            page_number: self.next_page,
            page_size: self.query.page_size(),
        };
        let source = self.source;
        let envelope = self
            .governor
            .call("page", || source.fetch_page(request.clone()))
            .await?;

        self.total_elements = Some(envelope.total_elements);
        self.total_pages = Some(envelope.total_pages);
        if envelope.items.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.check_order(&envelope)?;

        self.pages += 1;
        self.items += envelope.items.len() as u64;
        self.last_key = envelope.items.last().map(|item| item.sort_value);
        self.next_page += 1;
        if envelope.last_page {
            self.finished = true;
        }
        debug!(
            page = envelope.page_number,
            items = envelope.items.len(),
            total_elements = envelope.total_elements,
            "page received"
        );
        Ok(Some(envelope))
    }

    fn check_order(&self, envelope: &PageEnvelope) -> Result<(), FetchError> {
        let mut previous = self.last_key;
        for item in &envelope.items {
            if previous.is_some_and(|previous| item.sort_value < previous) {
                return Err(FetchError::Source(SourceError::malformed(format!(
                    "page {} is not sorted by {}: item '{}' precedes an earlier key",
                    envelope.page_number,
                    self.query.sort_key(),
                    item.id
                ))));
            }
            previous = Some(item.sort_value);
        }
        Ok(())
    }

    pub fn summary(&self) -> WalkSummary {
        let capacity = u64::from(self.page_ceiling) * u64::from(self.query.page_size());
        let beyond_capacity = self.total_elements.is_some_and(|total| total > capacity);
        let stopped_at_ceiling = self.pages >= self.page_ceiling
            && self
                .total_pages
                .is_some_and(|total_pages| total_pages > self.page_ceiling);
        WalkSummary {
            pages: self.pages,
            items: self.items,
            total_elements: self.total_elements,
            truncated: beyond_capacity || stopped_at_ceiling,
            last_key: self.last_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::adapters::SimulatedSource;
    use crate::domain::EntityType;
    use crate::governor::GovernorConfig;

    fn governor() -> RateGovernor {
        RateGovernor::new(
            GovernorConfig {
                pacing: None,
                ..GovernorConfig::default()
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn stops_at_the_page_ceiling_and_reports_truncation() {
        let source = SimulatedSource::synthetic(EntityType::Comments, 130, 60);
        let governor = governor();
        let query = QuerySpec::builder(EntityType::Comments)
            .page_size(10)
            .build()
            .expect("query");
        let mut walker = PageWalker::new(&source, &governor, &query, None, 5);

        let mut pages = 0;
        while walker.next_page().await.expect("page").is_some() {
            pages += 1;
        }

        let summary = walker.summary();
        assert_eq!(pages, 5);
        assert_eq!(summary.items, 50);
        assert_eq!(summary.total_elements, Some(130));
        assert!(summary.truncated);
    }

    #[tokio::test]
    async fn result_set_of_exactly_the_ceiling_is_not_truncated() {
        let source = SimulatedSource::synthetic(EntityType::Comments, 50, 60);
        let governor = governor();
        let query = QuerySpec::builder(EntityType::Comments)
            .page_size(10)
            .build()
            .expect("query");
        let mut walker = PageWalker::new(&source, &governor, &query, None, 5);

        while walker.next_page().await.expect("page").is_some() {}

        let summary = walker.summary();
        assert_eq!(summary.pages, 5);
        assert_eq!(summary.items, 50);
        assert_eq!(summary.total_elements, Some(50));
        assert!(!summary.truncated);
        assert_eq!(source.page_requests(), 5);
    }

    #[tokio::test]
    async fn short_result_sets_end_on_the_last_page() {
        let source = SimulatedSource::synthetic(EntityType::Dockets, 25, 60);
        let governor = governor();
        let query = QuerySpec::builder(EntityType::Dockets)
            .page_size(10)
            .build()
            .expect("query");
        let mut walker = PageWalker::new(&source, &governor, &query, None, 20);

        while walker.next_page().await.expect("page").is_some() {}

        let summary = walker.summary();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.items, 25);
        assert!(!summary.truncated);
        assert_eq!(source.page_requests(), 3);
    }

    #[tokio::test]
    async fn empty_results_finish_without_items() {
        let source = SimulatedSource::new(EntityType::Documents, Vec::new());
        let governor = governor();
        let query = QuerySpec::all(EntityType::Documents);
        let mut walker = PageWalker::new(&source, &governor, &query, None, 20);

        assert!(walker.next_page().await.expect("page").is_none());
        assert!(walker.next_page().await.expect("page").is_none());
        assert_eq!(walker.summary().total_elements, Some(0));
        assert_eq!(source.page_requests(), 1);
    }
}
