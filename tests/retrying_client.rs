//! Integration tests for the retrying GraphQL client against a mock server.

mod support;
use support::socket_guard::{should_skip_socket_bound_test, start_mock_server_or_skip};

use std::time::Duration;

use dashboard_export_core::graphql::{
    ApiKey, ClientSettings, GraphQlClient, GraphQlPayload, RetryPolicy,
};
use reqwest::Method;
use reqwest::header::HeaderMap;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

fn client_for(uri: &str) -> GraphQlClient {
    let mut settings = ClientSettings::new(format!("{uri}/graphql"), ApiKey::new("NRAK-TEST"));
    settings.retry_policy = RetryPolicy::new(3, Duration::from_millis(10));
    GraphQlClient::new(&settings).unwrap()
}

#[tokio::test]
async fn test_success_first_attempt_sends_fixed_headers() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("api-key", "NRAK-TEST"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(serde_json::json!({"variables": {"guid": "g-1"}})))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{}}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server.uri());
    let body = client
        .fetch_graphql(&GraphQlPayload::dashboard_detail("g-1"))
        .await;
    assert_eq!(body, br#"{"data":{}}"#);
}

#[tokio::test]
async fn test_accepted_status_counts_as_success() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server.uri());
    let body = client
        .fetch_graphql(&GraphQlPayload::dashboard_detail("g-1"))
        .await;
    assert_eq!(body, b"accepted");
}

#[tokio::test]
async fn test_persistent_server_error_makes_exactly_three_attempts() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    for (priority, body) in [(1, "first"), (2, "second"), (3, "third")] {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string(body))
            .up_to_n_times(1)
            .with_priority(priority)
            .expect(1)
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("fourth"))
        .with_priority(4)
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server.uri());
    let body = client
        .fetch_graphql(&GraphQlPayload::dashboard_detail("g-1"))
        .await;

    // Body of the third and last response, not an earlier one.
    assert_eq!(body, b"third");
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server.uri());
    let body = client
        .fetch(
            Method::POST,
            &format!("{}/graphql", mock_server.uri()),
            "{}",
            &HeaderMap::new(),
        )
        .await;
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_unreachable_endpoint_returns_empty_body() {
    if should_skip_socket_bound_test() {
        return;
    }
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = client_for(&format!("http://127.0.0.1:{port}"));
    let body = client
        .fetch_graphql(&GraphQlPayload::dashboard_detail("g-1"))
        .await;
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_hung_upstream_fails_each_attempt_after_request_timeout() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let mut settings = ClientSettings::new(
        format!("{}/graphql", mock_server.uri()),
        ApiKey::new("NRAK-TEST"),
    );
    settings.retry_policy = RetryPolicy::new(2, Duration::from_millis(10));
    settings.request_timeout = Duration::from_millis(100);
    let client = GraphQlClient::new(&settings).unwrap();

    let started = std::time::Instant::now();
    let body = client
        .fetch_graphql(&GraphQlPayload::dashboard_detail("g-1"))
        .await;
    assert!(body.is_empty());
    assert!(started.elapsed() < Duration::from_secs(4));
}
