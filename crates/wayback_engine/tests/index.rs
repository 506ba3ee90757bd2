use std::time::Duration;

use futures_util::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wayback_core::{RetryPolicy, TimeRange, Timestamp};
use wayback_engine::{CdxIndexClient, FailureKind, IndexSettings, SnapshotIndex};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> IndexSettings {
    IndexSettings {
        cdx_url: format!("{}/cdx/search/cdx", server.uri()),
        snapshot_base: format!("{}/web/", server.uri()),
        timeout: Duration::from_millis(200),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        },
        ..IndexSettings::default()
    }
}

fn page(timestamps: &[&str]) -> serde_json::Value {
    let mut rows = vec![json!(["timestamp", "original", "statuscode", "mimetype", "digest"])];
    rows.extend(timestamps.iter().map(|ts| {
        json!([ts, "http://example.com/page", "200", "text/html", format!("D{ts}")])
    }));
    serde_json::Value::Array(rows)
}

fn stamps(records: &[wayback_core::SnapshotRecord]) -> Vec<String> {
    records.iter().map(|r| r.timestamp().to_string()).collect()
}

async fn mount_two_pages(server: &MockServer) {
    let mut first = page(&["20070221000000", "20070222000000"]);
    if let serde_json::Value::Array(rows) = &mut first {
        rows.push(json!([]));
        rows.push(json!(["next-page"]));
    }
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("url", "example.com/page"))
        .and(query_param("output", "json"))
        .and(query_param_is_missing("resumeKey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(first))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("resumeKey", "next-page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["20070226000000"])))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn stream_yields_one_item_per_page() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let pages: Vec<_> = client
        .query_stream("example.com/page", TimeRange::open())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);
}

#[tokio::test]
async fn query_follows_resume_keys_until_exhausted() {
    let server = MockServer::start().await;
    mount_two_pages(&server).await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let records = client.query("example.com/page", TimeRange::open()).await.unwrap();
    assert_eq!(
        stamps(&records),
        vec!["20070221000000", "20070222000000", "20070226000000"]
    );
    assert_eq!(
        records[0].archived_url(),
        format!("{}/web/20070221000000id_/http://example.com/page", server.uri())
    );
}

#[tokio::test]
async fn latest_asks_for_the_newest_captures_in_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .and(query_param("limit", "-2"))
        .and(query_param("to", "20070225000000"))
        .and(query_param_is_missing("showResumeKey"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(&["20070224000000", "20070222000000"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(IndexSettings {
        page_size: 2,
        ..settings(&server)
    })
    .unwrap();
    let until = Timestamp::parse("20070225").unwrap();
    let records = client.latest("example.com/page", until).await.unwrap();
    assert_eq!(stamps(&records), vec!["20070222000000", "20070224000000"]);
}

#[tokio::test]
async fn rate_limited_index_is_reported_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let err = client
        .query("example.com/page", TimeRange::open())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::RateLimited);
}

#[tokio::test]
async fn pagination_stops_at_page_limit() {
    let server = MockServer::start().await;
    let mut looping = page(&["20070221000000"]);
    if let serde_json::Value::Array(rows) = &mut looping {
        rows.push(json!([]));
        rows.push(json!(["again"]));
    }
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(looping))
        .expect(3)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(IndexSettings {
        max_pages: 3,
        ..settings(&server)
    })
    .unwrap();
    let records = client.query("example.com/page", TimeRange::open()).await.unwrap();
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn two_timeouts_then_success_surfaces_the_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(800))
                .set_body_json(page(&[])),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["20070221000000"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let records = client.query("example.com/page", TimeRange::open()).await.unwrap();
    assert_eq!(stamps(&records), vec!["20070221000000"]);
}

#[tokio::test]
async fn persistent_server_errors_become_index_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let err = client
        .query("example.com/page", TimeRange::open())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::IndexUnavailable);
    assert_eq!(err.url, "example.com/page");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let err = client
        .query("example.com/page", TimeRange::open())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::IndexUnavailable);
}

#[tokio::test]
async fn malformed_listing_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let err = client
        .query("example.com/page", TimeRange::open())
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::IndexParse);
}

#[tokio::test]
async fn results_are_memoized_per_pattern_and_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["20070221000000"])))
        .expect(2)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let open = TimeRange::open();
    let narrow = TimeRange::parse(Some("2007"), Some("2008")).unwrap();
    let first = client.query("example.com/page", open).await.unwrap();
    let again = client.query("example.com/page", open).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &again));
    client.query("example.com/page", narrow).await.unwrap();
}

#[tokio::test]
async fn evicted_and_cleared_listings_are_queried_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdx/search/cdx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["20070221000000"])))
        .expect(3)
        .mount(&server)
        .await;

    let client = CdxIndexClient::new(settings(&server)).unwrap();
    let open = TimeRange::open();
    client.query("example.com/page", open).await.unwrap();
    client.query("example.com/page", open).await.unwrap();
    assert_eq!(client.cached(), 1);

    client.evict("example.com/page", open);
    assert_eq!(client.cached(), 0);
    client.query("example.com/page", open).await.unwrap();

    client.clear();
    assert_eq!(client.cached(), 0);
    client.query("example.com/page", open).await.unwrap();
}
