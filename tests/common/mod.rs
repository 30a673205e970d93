//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marketplace_sync::clock::ManualClock;
use marketplace_sync::config::RetryConfig;
use marketplace_sync::database::{Database, SqliteDatabase};
use marketplace_sync::models::{Credential, MarketplaceKind, SyncTarget};
use marketplace_sync::sync::{ApiClient, MarketplaceSynchronizer};

/// Path the mock token endpoint is mounted on
pub const TOKEN_PATH: &str = "/oauth/token";

/// Parse an RFC 3339 timestamp
pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Create an in-memory database for testing
pub async fn create_test_database() -> Arc<dyn Database> {
    Arc::new(
        SqliteDatabase::in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// Clock frozen at 2024-03-10T00:00:00Z
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(at("2024-03-10T00:00:00Z")))
}

/// Mount a token endpoint issuing `tok` for an hour
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Fast retry settings so tests do not sleep
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_delay_ms: 1,
        max_delay_ms: 10,
        rate_limit_multiplier: 2,
    }
}

/// Target pointing every URL at the mock server
pub fn test_target(kind: MarketplaceKind, server: &MockServer) -> SyncTarget {
    let mut target = SyncTarget::new(kind);
    target.api_base_url = server.uri();
    target.token_url = format!("{}{}", server.uri(), TOKEN_PATH);
    target.retry = fast_retry(3);
    match kind {
        MarketplaceKind::Ebay => {
            target.marketplace_id = Some("EBAY_US".to_string());
            for key in ["fulfillment_policy_id", "payment_policy_id", "return_policy_id"] {
                target.options.insert(key.to_string(), "POLICY".to_string());
            }
        }
        MarketplaceKind::Etsy => {
            target.shop_id = Some("555".to_string());
        }
        MarketplaceKind::Amazon => {
            target.seller_id = Some("A1SELLER".to_string());
            target.marketplace_id = Some("ATVPDKIKX0DER".to_string());
        }
    }
    target
}

/// Credentials matching the target's auth mode
pub fn test_credential(kind: MarketplaceKind) -> Credential {
    match kind {
        MarketplaceKind::Etsy => Credential::new("keystring", None, "refresh-1"),
        _ => Credential::new("id", Some("secret".to_string()), "refresh-1"),
    }
}

/// Build a synchronizer for a target
pub fn create_synchronizer(
    target: SyncTarget,
    db: Arc<dyn Database>,
    clock: Arc<ManualClock>,
) -> MarketplaceSynchronizer {
    let credential = test_credential(target.kind);
    let api = ApiClient::connect(target, credential, db.clone(), clock.clone());
    MarketplaceSynchronizer::new(api, db, clock)
}
