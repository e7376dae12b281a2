use std::sync::Arc;

use jiff::tz::{Offset, TimeZone};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::{EntityType, HeaderItem, ItemId, QuerySpec, Record};
use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::source::{PageEnvelope, PageRequest, RemoteSource, Reply, SourceError, SourceFuture};

pub const DEFAULT_BASE_URL: &str = "https://api.regulations.gov/v4";
pub const API_KEY_HEADER: &str = "X-Api-Key";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";

/// Zone the service reads wall-clock filter values in.
pub const FILTER_TIME_ZONE: &str = "America/New_York";

/// Document known to exist, used to read the quota header cheaply.
const QUOTA_PROBE_DOCUMENT: &str = "FDA-2009-N-0501-0012";

const STATUS_OVER_LIMIT: u16 = 429;
const DUPLICATE_DETAIL_PREFIX: &str = "Incorrect result size";

/// Live catalog adapter for the federal regulations listing API.
#[derive(Clone)]
pub struct RegulationsGovAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    base_url: String,
    filter_zone: TimeZone,
    timeout_ms: u64,
}

impl RegulationsGovAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::ApiKeyHeader {
                name: String::from(API_KEY_HEADER),
                value: api_key.into(),
            },
            base_url: String::from(DEFAULT_BASE_URL),
            filter_zone: filter_zone(),
            timeout_ms: 30_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Build the listing request for one page.
    pub fn listing_request(&self, request: &PageRequest) -> HttpRequest {
        let mut http = HttpRequest::get(format!("{}/{}", self.base_url, request.entity))
            .with_auth(&self.auth)
            .with_timeout_ms(self.timeout_ms);
        for filter in &request.filters {
            http = http.with_query(filter.param_name(), filter.value());
        }
        if let Some(lower_bound) = request.lower_bound {
            http = http.with_query(
                format!("filter[{}][ge]", request.sort_key),
                lower_bound.render_in_zone(&self.filter_zone),
            );
        }
        http.with_query("page[number]", request.page_number.to_string())
            .with_query("page[size]", request.page_size.to_string())
            .with_query("sort", request.sort_key.clone())
    }

    pub fn detail_request(&self, entity: EntityType, id: &ItemId) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/{entity}/{}",
            self.base_url,
            urlencoding::encode(id.as_str())
        ))
        .with_auth(&self.auth)
        .with_timeout_ms(self.timeout_ms)
    }

    /// Remaining requests in the current quota window, read from a cheap
    /// detail lookup.
    pub async fn quota_probe(&self) -> Result<Reply<Option<u32>>, SourceError> {
        let request = HttpRequest::get(format!(
            "{}/documents/{QUOTA_PROBE_DOCUMENT}",
            self.base_url
        ))
        .with_auth(&self.auth)
        .with_timeout_ms(self.timeout_ms);
        let response = self.execute(request).await?;
        if response.status == STATUS_OVER_LIMIT {
            return Ok(Reply::OverLimit);
        }
        if !response.is_success() {
            return Err(status_error(&response, "quota probe"));
        }
        let remaining = quota_remaining(&response);
        Ok(Reply::data(remaining, remaining))
    }

    /// Total number of items matching `query`, from the first page's metadata.
    pub async fn count(&self, query: &QuerySpec) -> Result<Reply<u64>, SourceError> {
        let request = PageRequest {
            entity: query.entity(),
            filters: query.filters().to_vec(),
            sort_key: query.sort_key().to_owned(),
            lower_bound: None,
            page_number: 1,
            page_size: query.page_size(),
        };
        let reply = self
            .get_json::<ListingBody>(self.listing_request(&request), "count")
            .await?;
        Ok(reply.map(|body| body.meta.total_elements))
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, SourceError> {
        self.http_client
            .execute(request)
            .await
            .map_err(transport_error)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        context: &str,
    ) -> Result<Reply<T>, SourceError> {
        let response = self.execute(request).await?;
        if response.status == STATUS_OVER_LIMIT {
            return Ok(Reply::OverLimit);
        }
        if !response.is_success() {
            return Err(status_error(&response, context));
        }
        let body = serde_json::from_str::<T>(&response.body).map_err(|error| {
            SourceError::malformed(format!("{context}: unexpected response body: {error}"))
        })?;
        Ok(Reply::data(body, quota_remaining(&response)))
    }
}

impl RemoteSource for RegulationsGovAdapter {
    fn fetch_page<'a>(&'a self, request: PageRequest) -> SourceFuture<'a, PageEnvelope> {
        Box::pin(async move {
            let http = self.listing_request(&request);
            let reply = self.get_json::<ListingBody>(http, "listing").await?;
            let Reply::Data {
                body,
                quota_remaining,
            } = reply
            else {
                return Ok(Reply::OverLimit);
            };

            let mut items = Vec::with_capacity(body.data.len());
            for raw in body.data {
                let record = raw.into_record(request.entity, &request.sort_key)?;
                let item = HeaderItem::try_from(record).map_err(|record| {
                    SourceError::malformed(format!(
                        "listing item '{}' has no usable {}",
                        record.id, request.sort_key
                    ))
                })?;
                items.push(item);
            }

            Ok(Reply::data(
                PageEnvelope {
                    items,
                    page_number: body.meta.page_number.unwrap_or(request.page_number),
                    total_elements: body.meta.total_elements,
                    total_pages: body.meta.total_pages,
                    last_page: body.meta.last_page,
                },
                quota_remaining,
            ))
        })
    }

    fn fetch_detail<'a>(&'a self, entity: EntityType, id: &'a ItemId) -> SourceFuture<'a, Record> {
        Box::pin(async move {
            let http = self.detail_request(entity, id);
            let reply = self.get_json::<DetailBody>(http, "detail").await?;
            match reply {
                Reply::Data {
                    body,
                    quota_remaining,
                } => {
                    let record = body.data.into_record(entity, "lastModifiedDate")?;
                    Ok(Reply::data(record, quota_remaining))
                }
                Reply::OverLimit => Ok(Reply::OverLimit),
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListingBody {
    #[serde(default)]
    data: Vec<RawItem>,
    meta: ListingMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingMeta {
    total_elements: u64,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    page_number: Option<u32>,
    #[serde(default)]
    last_page: bool,
}

#[derive(Debug, Deserialize)]
struct DetailBody {
    data: RawItem,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl RawItem {
    fn into_record(self, entity: EntityType, sort_key: &str) -> Result<Record, SourceError> {
        let id = ItemId::new(self.id)
            .map_err(|error| SourceError::malformed(format!("{entity} item: {error}")))?;
        Ok(Record::from_attributes(entity, id, self.attributes, sort_key))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    status: Option<String>,
    detail: Option<String>,
}

fn filter_zone() -> TimeZone {
    TimeZone::get(FILTER_TIME_ZONE).unwrap_or_else(|error| {
        // Standard time only ever renders the bound earlier, never later.
        warn!(zone = FILTER_TIME_ZONE, %error, "time zone unavailable, using UTC-05:00");
        TimeZone::fixed(Offset::constant(-5))
    })
}

fn quota_remaining(response: &HttpResponse) -> Option<u32> {
    response
        .header(RATE_LIMIT_REMAINING_HEADER)
        .and_then(|value| value.trim().parse().ok())
}

fn transport_error(error: HttpError) -> SourceError {
    if error.retryable() {
        SourceError::unavailable(format!("transport error: {}", error.message()))
    } else {
        SourceError::internal(format!("transport error: {}", error.message()))
    }
}

fn status_error(response: &HttpResponse, context: &str) -> SourceError {
    let first = serde_json::from_str::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.errors.into_iter().next());
    let detail = first
        .as_ref()
        .and_then(|entry| entry.detail.clone())
        .unwrap_or_else(|| response.body.chars().take(200).collect());
    let message = format!("{context}: status {}: {detail}", response.status);

    let duplicated = first.as_ref().is_some_and(|entry| {
        entry.status.as_deref() == Some("500")
            && entry
                .detail
                .as_deref()
                .is_some_and(|detail| detail.starts_with(DUPLICATE_DETAIL_PREFIX))
    });
    if duplicated {
        return SourceError::duplicated_on_server(message);
    }

    match response.status {
        404 | 410 => SourceError::not_found(message),
        401 | 403 => SourceError::unauthorized(message),
        408 | 500..=599 => SourceError::unavailable(message),
        _ => SourceError::invalid_request(message),
    }
}
