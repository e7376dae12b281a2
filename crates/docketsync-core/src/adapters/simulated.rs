//! In-memory catalog with the same paging contract as the live service.
//!
//! Items are served sorted by sort value then identifier, with an inclusive
//! lower bound and a hard page ceiling. Over-limit replies and failures can
//! be queued to exercise the governor, and per-item detail failures can be
//! pinned to identifiers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use crate::domain::{EntityType, Filter, FilterOp, HeaderItem, ItemId, Record, SortValue, MAX_PAGE_SIZE};
use crate::source::{PageEnvelope, PageRequest, RemoteSource, Reply, SourceError, SourceFuture};
use crate::walker::DEFAULT_PAGE_CEILING;

/// A scripted response served before the regular one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    OverLimit,
    Error(SourceError),
}

pub struct SimulatedSource {
    entity: EntityType,
    items: Vec<HeaderItem>,
    missing_details: HashSet<ItemId>,
    failing_details: HashMap<ItemId, SourceError>,
    page_ceiling: u32,
    quota_remaining: Option<u32>,
    page_faults: Mutex<VecDeque<Fault>>,
    detail_faults: Mutex<VecDeque<Fault>>,
    page_requests: AtomicU64,
    detail_log: Mutex<Vec<ItemId>>,
}

impl SimulatedSource {
    pub fn new(entity: EntityType, mut items: Vec<HeaderItem>) -> Self {
        items.sort_by(|left, right| {
            left.sort_value
                .cmp(&right.sort_value)
                .then_with(|| left.id.cmp(&right.id))
        });
        Self {
            entity,
            items,
            missing_details: HashSet::new(),
            failing_details: HashMap::new(),
            page_ceiling: DEFAULT_PAGE_CEILING,
            quota_remaining: Some(500),
            page_faults: Mutex::new(VecDeque::new()),
            detail_faults: Mutex::new(VecDeque::new()),
            page_requests: AtomicU64::new(0),
            detail_log: Mutex::new(Vec::new()),
        }
    }

    /// `count` items whose sort values are `spacing_secs` apart, starting at
    /// 2024-01-01T00:00:00Z. A spacing of zero puts every item on one key.
    pub fn synthetic(entity: EntityType, count: usize, spacing_secs: i64) -> Self {
        let items = (0..count)
            .filter_map(|index| {
                let offset = spacing_secs.saturating_mul(index as i64);
                let sort_value = SortValue::from_unix_timestamp(SYNTHETIC_EPOCH + offset).ok()?;
                synthetic_item(entity, index, sort_value)
            })
            .collect();
        Self::new(entity, items)
    }

    pub fn with_page_ceiling(mut self, page_ceiling: u32) -> Self {
        self.page_ceiling = page_ceiling.max(1);
        self
    }

    pub fn with_quota_remaining(mut self, quota_remaining: Option<u32>) -> Self {
        self.quota_remaining = quota_remaining;
        self
    }

    /// Detail lookups for `id` answer not-found.
    pub fn without_detail(mut self, id: ItemId) -> Self {
        self.missing_details.insert(id);
        self
    }

    /// Detail lookups for `id` always fail with `error`.
    pub fn failing_detail(mut self, id: ItemId, error: SourceError) -> Self {
        self.failing_details.insert(id, error);
        self
    }

    pub fn push_page_fault(&self, fault: Fault) {
        lock(&self.page_faults).push_back(fault);
    }

    pub fn push_detail_fault(&self, fault: Fault) {
        lock(&self.detail_faults).push_back(fault);
    }

    pub fn items(&self) -> &[HeaderItem] {
        &self.items
    }

    pub fn page_requests(&self) -> u64 {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn detail_requests(&self) -> usize {
        lock(&self.detail_log).len()
    }

    /// Identifiers of every detail request, in arrival order.
    pub fn requested_details(&self) -> Vec<ItemId> {
        lock(&self.detail_log).clone()
    }

    fn serve_page(&self, request: &PageRequest) -> Result<Reply<PageEnvelope>, SourceError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = lock(&self.page_faults).pop_front() {
            return fault.into_reply();
        }
        if request.entity != self.entity {
            return Err(SourceError::invalid_request(format!(
                "simulated catalog serves {}, not {}",
                self.entity, request.entity
            )));
        }
        if request.page_size == 0 || request.page_size > MAX_PAGE_SIZE {
            return Err(SourceError::invalid_request(format!(
                "page[size] must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if request.page_number == 0 || request.page_number > self.page_ceiling {
            return Err(SourceError::invalid_request(format!(
                "page[number] must be between 1 and {}",
                self.page_ceiling
            )));
        }

        let matching = self
            .items
            .iter()
            .filter(|item| {
                request
                    .lower_bound
                    .map_or(true, |lower_bound| item.sort_value >= lower_bound)
            })
            .filter(|item| request.filters.iter().all(|filter| matches_filter(item, filter)))
            .collect::<Vec<_>>();

        let page_size = request.page_size as usize;
        let total_elements = matching.len() as u64;
        let total_pages = u32::try_from(matching.len().div_ceil(page_size)).unwrap_or(u32::MAX);
        let start = (request.page_number as usize - 1) * page_size;
        let items = matching
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();

        Ok(Reply::data(
            PageEnvelope {
                items,
                page_number: request.page_number,
                total_elements,
                total_pages,
                last_page: request.page_number >= total_pages,
            },
            self.quota_remaining,
        ))
    }

    fn serve_detail(&self, entity: EntityType, id: &ItemId) -> Result<Reply<Record>, SourceError> {
        lock(&self.detail_log).push(id.clone());
        if let Some(fault) = lock(&self.detail_faults).pop_front() {
            return fault.into_reply();
        }
        if let Some(error) = self.failing_details.get(id) {
            return Err(error.clone());
        }
        let item = self
            .items
            .iter()
            .find(|item| &item.id == id)
            .filter(|_| entity == self.entity && !self.missing_details.contains(id))
            .ok_or_else(|| SourceError::not_found(format!("{entity}/{id} does not exist")))?;

        let mut attributes = item.attributes.clone();
        attributes.insert(
            String::from("comment"),
            Value::String(format!("Full text of {id}")),
        );
        Ok(Reply::data(
            Record {
                id: item.id.clone(),
                sort_value: Some(item.sort_value),
                attributes,
            },
            self.quota_remaining,
        ))
    }
}

impl RemoteSource for SimulatedSource {
    fn fetch_page<'a>(&'a self, request: PageRequest) -> SourceFuture<'a, PageEnvelope> {
        Box::pin(async move { self.serve_page(&request) })
    }

    fn fetch_detail<'a>(&'a self, entity: EntityType, id: &'a ItemId) -> SourceFuture<'a, Record> {
        Box::pin(async move { self.serve_detail(entity, id) })
    }
}

impl Fault {
    fn into_reply<T>(self) -> Result<Reply<T>, SourceError> {
        match self {
            Self::OverLimit => Ok(Reply::OverLimit),
            Self::Error(error) => Err(error),
        }
    }
}

const SYNTHETIC_EPOCH: i64 = 1_704_067_200;

fn synthetic_item(entity: EntityType, index: usize, sort_value: SortValue) -> Option<HeaderItem> {
    let id = ItemId::new(format!("SIM-2024-0001-{index:06}")).ok()?;
    let mut attributes = Map::new();
    attributes.insert(
        String::from("title"),
        Value::String(format!("Simulated {} {index}", entity.as_str())),
    );
    attributes.insert(
        String::from("lastModifiedDate"),
        Value::String(sort_value.to_string()),
    );
    attributes.insert(
        String::from(entity.id_attribute()),
        Value::String(id.as_str().to_owned()),
    );
    Some(HeaderItem {
        id,
        sort_value,
        attributes,
    })
}

fn matches_filter(item: &HeaderItem, filter: &Filter) -> bool {
    let Some(actual) = item.attributes.get(filter.field()).map(attribute_text) else {
        return false;
    };
    match filter.op() {
        FilterOp::Eq => actual == filter.value(),
        FilterOp::Ge => actual.as_str() >= filter.value(),
        FilterOp::Le => actual.as_str() <= filter.value(),
    }
}

fn attribute_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
