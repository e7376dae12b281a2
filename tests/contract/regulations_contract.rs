use std::sync::Arc;
use std::time::Duration;

use docketsync_core::{
    EntityType, Fault, HarvestConfig, Harvester, HttpResponse, ItemId, PageRequest, QuerySpec,
    RegulationsGovAdapter, RemoteSource, Reply, RunStatus, ScriptedHttpClient, SimulatedSource,
    SortValue, SourceErrorKind,
};
use docketsync_tests::{fast_governor, open_warehouse};
use serde_json::Value;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

const RATE_LIMIT_HEADER: &str = "X-RateLimit-Remaining";

struct SourceCase {
    name: &'static str,
    source: Arc<dyn RemoteSource>,
    /// Identifier the case's detail calls ask for.
    detail_id: ItemId,
}

fn listing_body(items: &[(&str, &str)], total_elements: u64, total_pages: u32, last_page: bool) -> String {
    let data = items
        .iter()
        .map(|(id, modified)| {
            format!(
                r#"{{"id":"{id}","type":"comments","attributes":{{"lastModifiedDate":"{modified}","title":"Comment {id}","highlightedContent":""}}}}"#
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"{{"data":[{data}],"meta":{{"totalElements":{total_elements},"totalPages":{total_pages},"pageNumber":1,"lastPage":{last_page}}}}}"#
    )
}

fn detail_body(id: &str) -> String {
    format!(
        r#"{{"data":{{"id":"{id}","type":"comments","attributes":{{"lastModifiedDate":"2021-06-01T15:00:00Z","comment":"Full text","fileFormats":[{{"format":"pdf"}}]}}}}}}"#
    )
}

fn source_cases() -> Vec<SourceCase> {
    let simulated = SimulatedSource::synthetic(EntityType::Comments, 4, 60);
    let simulated_detail = simulated.items()[0].id.clone();

    let scripted = Arc::new(ScriptedHttpClient::new(vec![
        Ok(HttpResponse::ok_json(listing_body(
            &[
                ("EPA-HQ-OAR-2021-0317-0007", "2021-06-01T15:00:00Z"),
                ("EPA-HQ-OAR-2021-0317-0002", "2021-06-01T15:00:00Z"),
                ("EPA-HQ-OAR-2021-0317-0009", "2021-06-02T08:30:00Z"),
            ],
            3,
            1,
            true,
        ))
        .with_header(RATE_LIMIT_HEADER, "640")),
        Ok(HttpResponse::ok_json(detail_body("EPA-HQ-OAR-2021-0317-0007"))
            .with_header(RATE_LIMIT_HEADER, "639")),
    ]));
    let live = RegulationsGovAdapter::new(scripted, "contract-key")
        .with_base_url("https://catalog.test/v4");

    vec![
        SourceCase {
            name: "simulated",
            source: Arc::new(simulated),
            detail_id: simulated_detail,
        },
        SourceCase {
            name: "regulations.gov",
            source: Arc::new(live),
            detail_id: ItemId::new("EPA-HQ-OAR-2021-0317-0007").expect("id"),
        },
    ]
}

fn first_page() -> PageRequest {
    PageRequest {
        entity: EntityType::Comments,
        filters: Vec::new(),
        sort_key: String::from("lastModifiedDate"),
        lower_bound: None,
        page_number: 1,
        page_size: 25,
    }
}

#[tokio::test]
async fn every_source_honours_the_page_and_detail_contract() {
    for case in source_cases() {
        // Pages are sorted and each item carries its identity attribute.
        let reply = case
            .source
            .fetch_page(first_page())
            .await
            .unwrap_or_else(|error| panic!("source '{}' page failed: {error}", case.name));
        let Reply::Data { body, .. } = reply else {
            panic!("source '{}': expected a page", case.name);
        };
        assert!(!body.items.is_empty(), "source '{}': empty page", case.name);
        assert!(body.last_page, "source '{}': single page is last", case.name);
        assert_eq!(
            body.total_elements,
            body.items.len() as u64,
            "source '{}': total elements",
            case.name
        );
        for pair in body.items.windows(2) {
            assert!(
                pair[0].sort_value <= pair[1].sort_value,
                "source '{}': items out of order",
                case.name
            );
        }
        for item in &body.items {
            assert_eq!(
                item.attributes.get("commentId").and_then(Value::as_str),
                Some(item.id.as_str()),
                "source '{}': identity attribute",
                case.name
            );
            assert!(
                item.attributes.get("highlightedContent").is_none(),
                "source '{}': display-only attribute kept",
                case.name
            );
        }

        // Details come back under the requested identifier.
        let detail = case
            .source
            .fetch_detail(EntityType::Comments, &case.detail_id)
            .await
            .unwrap_or_else(|error| panic!("source '{}' detail failed: {error}", case.name));
        let Reply::Data { body, .. } = detail else {
            panic!("source '{}': expected a detail", case.name);
        };
        assert_eq!(body.id, case.detail_id, "source '{}': detail id", case.name);
        assert!(
            body.attributes.get("fileFormats").is_none(),
            "source '{}': display-only attribute kept",
            case.name
        );
    }
}

fn failing_cases() -> Vec<SourceCase> {
    let missing = ItemId::new("EPA-HQ-OAR-2021-0317-9999").expect("id");

    let simulated = SimulatedSource::synthetic(EntityType::Comments, 2, 60);
    simulated.push_detail_fault(Fault::OverLimit);

    let scripted = Arc::new(ScriptedHttpClient::new(vec![
        Ok(HttpResponse::new(429, "{}")),
        Ok(HttpResponse::new(
            404,
            r#"{"errors":[{"status":"404","detail":"The document ID could not be found."}]}"#,
        )),
    ]));
    let live = RegulationsGovAdapter::new(scripted, "contract-key")
        .with_base_url("https://catalog.test/v4");

    vec![
        SourceCase {
            name: "simulated",
            source: Arc::new(simulated),
            detail_id: missing.clone(),
        },
        SourceCase {
            name: "regulations.gov",
            source: Arc::new(live),
            detail_id: missing,
        },
    ]
}

#[tokio::test]
async fn every_source_reports_over_limit_and_missing_items_the_same_way() {
    for case in failing_cases() {
        let over_limit = case
            .source
            .fetch_detail(EntityType::Comments, &case.detail_id)
            .await
            .unwrap_or_else(|error| panic!("source '{}': over-limit is a reply: {error}", case.name));
        assert_eq!(over_limit, Reply::OverLimit, "source '{}'", case.name);

        let error = case
            .source
            .fetch_detail(EntityType::Comments, &case.detail_id)
            .await
            .expect_err("missing item");
        assert_eq!(error.kind(), SourceErrorKind::NotFound, "source '{}'", case.name);
    }
}

#[tokio::test]
async fn partitioned_listing_requests_carry_the_bound_in_the_service_offset() {
    // Two sub-queries: the first fills its one-page ceiling, the second starts
    // at the last key it saw and repeats the boundary item.
    let client = Arc::new(ScriptedHttpClient::new(vec![
        Ok(HttpResponse::ok_json(listing_body(
            &[
                ("EPA-HQ-OAR-2021-0317-0001", "2021-06-01T15:00:00Z"),
                ("EPA-HQ-OAR-2021-0317-0002", "2021-06-01T16:00:00Z"),
            ],
            3,
            2,
            false,
        ))
        .with_header(RATE_LIMIT_HEADER, "900")),
        Ok(HttpResponse::ok_json(listing_body(
            &[
                ("EPA-HQ-OAR-2021-0317-0002", "2021-06-01T16:00:00Z"),
                ("EPA-HQ-OAR-2021-0317-0003", "2021-06-01T17:30:00Z"),
            ],
            2,
            1,
            true,
        ))
        .with_header(RATE_LIMIT_HEADER, "899")),
    ]));
    let adapter = Arc::new(
        RegulationsGovAdapter::new(client.clone(), "contract-key")
            .with_base_url("https://catalog.test/v4"),
    );
    let temp = tempdir().expect("tempdir");
    let store = open_warehouse(&temp, "contract.duckdb");
    let config = HarvestConfig {
        page_ceiling: 1,
        batch_size: 10,
        detail_concurrency: 1,
        governor: fast_governor(Duration::from_millis(5), 1),
    };
    let harvester = Harvester::new(adapter, Arc::clone(&store), config, CancellationToken::new())
        .expect("harvester");
    let query = QuerySpec::builder(EntityType::Comments)
        .page_size(2)
        .build()
        .expect("query");

    let report = harvester.harvest_headers(&query, None, false).await;

    assert_eq!(report.status, RunStatus::Completed, "{:?}", report.halt);
    assert_eq!(report.sink.inserted, 3);
    assert_eq!(report.quota.remaining, Some(899));
    assert_eq!(store.count_rows("comments_header").expect("count"), 3);

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].query_value("filter[lastModifiedDate][ge]"), None);
    assert_eq!(
        requests[1].query_value("filter[lastModifiedDate][ge]"),
        Some("2021-06-01 12:00:00")
    );
    for request in &requests {
        assert_eq!(request.url, "https://catalog.test/v4/comments");
        assert_eq!(request.query_value("page[number]"), Some("1"));
        assert_eq!(request.query_value("page[size]"), Some("2"));
        assert_eq!(request.query_value("sort"), Some("lastModifiedDate"));
        assert_eq!(
            request.headers.get("x-api-key").map(String::as_str),
            Some("contract-key")
        );
    }
    assert_eq!(
        report.plan.as_ref().and_then(|plan| plan.final_cursor),
        Some(SortValue::parse("2021-06-01T17:30:00Z").expect("key"))
    );
}

#[tokio::test]
async fn count_reads_the_reported_total_without_walking_pages() {
    let client = Arc::new(ScriptedHttpClient::new(vec![Ok(HttpResponse::ok_json(
        listing_body(&[("EPA-HQ-OAR-2021-0317-0001", "2021-06-01T15:00:00Z")], 18_432, 738, false),
    )
    .with_header(RATE_LIMIT_HEADER, "12"))]));
    let adapter = RegulationsGovAdapter::new(client.clone(), "contract-key")
        .with_base_url("https://catalog.test/v4");
    let query = QuerySpec::builder(EntityType::Comments)
        .page_size(25)
        .build()
        .expect("query");

    let reply = adapter.count(&query).await.expect("count");

    assert_eq!(reply, Reply::data(18_432, Some(12)));
    assert_eq!(client.requests().len(), 1);
}

#[test]
fn detail_requests_escape_the_identifier() {
    let adapter = RegulationsGovAdapter::new(Arc::new(ScriptedHttpClient::default()), "key")
        .with_base_url("https://catalog.test/v4");

    let request = adapter.detail_request(
        EntityType::Documents,
        &ItemId::new("FDA 2009/N-0501").expect("id"),
    );

    assert_eq!(
        request.url,
        "https://catalog.test/v4/documents/FDA%202009%2FN-0501"
    );
}
