//! Request executor integration tests
//!
//! Tests retry bounds, non-retryable statuses, Retry-After handling and
//! rate-limit blocking against a mocked marketplace.

mod common;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{create_test_database, fast_retry, mount_token_endpoint, test_clock, test_credential, test_target};
use marketplace_sync::config::{RateBudgetConfig, RateLimitConfig};
use marketplace_sync::error::SyncError;
use marketplace_sync::models::{MarketplaceKind, SyncAction, SyncTarget};
use marketplace_sync::plugins::marketplace::{ApiRequest, CLASS_ORDERS};
use marketplace_sync::sync::ApiClient;

const ORDERS_PATH: &str = "/sell/fulfillment/v1/order";

fn fetch_orders() -> ApiRequest {
    ApiRequest::get(SyncAction::FetchOrders, CLASS_ORDERS, ORDERS_PATH)
}

async fn client(target: SyncTarget) -> (ApiClient, std::sync::Arc<dyn marketplace_sync::database::Database>) {
    let db = create_test_database().await;
    let api = ApiClient::connect(
        target,
        test_credential(MarketplaceKind::Ebay),
        db.clone(),
        test_clock(),
    );
    (api, db)
}

/// Test 1: A persistent 503 is attempted exactly max_retries times
#[tokio::test]
async fn test_server_error_attempt_bound() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let mut target = test_target(MarketplaceKind::Ebay, &server);
    target.retry = fast_retry(4);
    let (api, db) = client(target).await;

    let err = api.request(&fetch_orders()).await.unwrap_err();
    assert_eq!(err, SyncError::Server { status: 503, attempts: 4 });

    let logs = db.get_sync_logs(10, 0).await.unwrap();
    let entry = logs
        .iter()
        .find(|e| e.action == "fetch_orders")
        .expect("executor log entry");
    assert_eq!(entry.http_status, Some(503));
    assert_eq!(entry.details["attempts"], 4);
}

/// Test 2: Client errors are returned after one attempt
#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"errors": [{"message": "bad filter"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (api, _db) = client(test_target(MarketplaceKind::Ebay, &server)).await;

    match api.request(&fetch_orders()).await {
        Err(SyncError::Client { status, message }) => {
            assert_eq!(status, 422);
            assert!(message.contains("bad filter"));
        }
        other => panic!("Expected client error, got {:?}", other),
    }
}

/// Test 3: A 429 with Retry-After is retried and then succeeds
#[tokio::test]
async fn test_rate_limited_then_success() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": [], "total": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let (api, _db) = client(test_target(MarketplaceKind::Ebay, &server)).await;

    let response = api.request(&fetch_orders()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body["total"], 0);
}

/// Test 4: Persistent 429 exhausts attempts as a rate-limit error
#[tokio::test]
async fn test_rate_limit_exhausted() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let (api, _db) = client(test_target(MarketplaceKind::Ebay, &server)).await;

    assert_eq!(
        api.request(&fetch_orders()).await,
        Err(SyncError::RateLimited { attempts: 3 })
    );
}

/// Test 5: The call past the budget waits for the next window
#[tokio::test]
async fn test_rate_limit_blocks_over_budget() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(ORDERS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": []})))
        .expect(3)
        .mount(&server)
        .await;

    let mut target = test_target(MarketplaceKind::Ebay, &server);
    target.rate_limits = RateLimitConfig {
        default: RateBudgetConfig::per_second(2),
        classes: HashMap::new(),
    };
    let (api, _db) = client(target).await;

    let started = Instant::now();
    api.request(&fetch_orders()).await.unwrap();
    api.request(&fetch_orders()).await.unwrap();
    let within_budget = started.elapsed();
    api.request(&fetch_orders()).await.unwrap();
    let total = started.elapsed();

    assert!(within_budget < Duration::from_millis(500));
    assert!(total >= Duration::from_millis(500));
    assert!(total < Duration::from_secs(3));
}
