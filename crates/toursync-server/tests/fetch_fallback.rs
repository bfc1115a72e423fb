//! Integration tests for the upstream fetch fallback chain, against a
//! stubbed portal. Strategies are told apart by the headers each one
//! sends: only the browser strategy carries `Cache-Control: no-cache`,
//! the other two identify themselves through the User-Agent alone.
//! (The browser User-Agent itself cannot be matched with the stock
//! header matcher: it contains a comma, which header matching treats
//! as a value-list separator.)

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toursync_server::error::FetchError;
use toursync_server::fetch::{TourApiClient, FALLBACK_USER_AGENT, MINIMAL_USER_AGENT};
use toursync_server::source::SourceKind;

fn client_for(server: &MockServer) -> TourApiClient {
    #[allow(clippy::unwrap_used)]
    TourApiClient::new("test-key").unwrap().with_base_url(server.uri())
}

fn nested_envelope() -> serde_json::Value {
    json!({
        "response": {
            "header": {"resultCode": "0000", "resultMsg": "OK"},
            "body": {
                "totalCount": 1,
                "items": {"item": [{"contentid": "100", "title": "Wetland Park"}]}
            }
        }
    })
}

#[tokio::test]
async fn first_strategy_success_skips_the_rest() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/areaBasedList1"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nested_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let data = client_for(&server).fetch(SourceKind::Greentour).await.unwrap();
    assert_eq!(data["response"]["body"]["totalCount"], 1);
}

#[tokio::test]
async fn second_strategy_is_tried_when_the_first_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/areaBasedList2"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/areaBasedList2"))
        .and(header("user-agent", MINIMAL_USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(nested_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let data = client_for(&server).fetch(SourceKind::BarrierFree).await.unwrap();
    assert_eq!(data["response"]["body"]["totalCount"], 1);
}

#[tokio::test]
async fn exhausted_chain_surfaces_the_first_error() {
    let server = MockServer::start().await;

    // First strategy sees a 503; later strategies fail differently.
    Mock::given(method("GET"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("user-agent", MINIMAL_USER_AGENT))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("user-agent", FALLBACK_USER_AGENT))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch(SourceKind::Greentour).await.unwrap_err();
    assert!(matches!(err, FetchError::Http { status: 503 }), "got {:?}", err);
}

#[tokio::test]
async fn non_json_body_is_a_parse_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>blocked</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch(SourceKind::Greentour).await.unwrap_err();
    assert!(matches!(err, FetchError::Parse(_)), "got {:?}", err);
}

#[tokio::test]
async fn portal_error_code_is_an_api_error() {
    let server = MockServer::start().await;

    let body = json!({
        "response": {
            "header": {"resultCode": "22", "resultMsg": "LIMITED NUMBER OF SERVICE REQUESTS EXCEEDS"},
            "body": {}
        }
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    match client_for(&server).fetch(SourceKind::BarrierFree).await {
        Err(FetchError::Api { code, .. }) => assert_eq!(code, "22"),
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn base_tour_accepts_a_flat_envelope() {
    let server = MockServer::start().await;

    let body = json!({
        "items": [{"hubTatsCd": "H1", "baseYm": "202506", "hubTatsNm": "Beach"}],
        "totalCount": 1
    });
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let data = client_for(&server).fetch(SourceKind::BaseTour).await.unwrap();
    assert_eq!(data["items"][0]["hubTatsCd"], "H1");
}

#[tokio::test]
async fn probe_requests_a_single_row_without_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/areaBasedList1"))
        .and(query_param("numOfRows", "1"))
        .and(header("user-agent", FALLBACK_USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(nested_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let report = client_for(&server).probe(SourceKind::Greentour).await;
    assert!(report.success);
    assert_eq!(report.status, Some(200));
    assert!(report.detail.is_some());
    assert!(report.error.is_none());
}

#[tokio::test]
async fn probe_reports_an_error_status_without_panicking() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let report = client_for(&server).probe(SourceKind::BaseTour).await;
    assert!(!report.success);
    assert_eq!(report.status, Some(503));
    assert_eq!(report.error.as_deref(), Some("maintenance"));
}
