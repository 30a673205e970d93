//! OAuth2 access token cache
//!
//! A [`TokenManager`] owns one marketplace [`Credential`]. It hands out the
//! cached access token while it is valid and performs a refresh-token grant
//! otherwise. Refreshes are serialized behind an async mutex, so concurrent
//! callers sharing a manager trigger at most one grant per validity window.
//!
//! A refresh token rotated by the endpoint is written to the settings store
//! under `<marketplace>.refresh_token` before the new access token is used,
//! and that stored value takes precedence over the configured one on the
//! next start.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::database::Database;
use crate::error::AuthError;
use crate::models::{Credential, LogStatus, SyncAction};
use crate::plugins::marketplace::{MarketplaceAdapter, TokenGrant};
use crate::sync::log::{redact_excerpt, SyncLogger};

/// Settings key holding the current refresh token of a marketplace
pub fn refresh_token_key(marketplace: &str) -> String {
    format!("{}.refresh_token", marketplace)
}

/// A bearer token and the instant after which it must not be used
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    /// Token value
    pub value: String,
    /// Expiry with the safety buffer already subtracted
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

struct TokenState {
    credential: Credential,
    stored_token_checked: bool,
}

/// Access token provider for one marketplace connection
pub struct TokenManager {
    adapter: Arc<dyn MarketplaceAdapter>,
    client: Client,
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    logger: SyncLogger,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Create a manager for the adapter's target
    pub fn new(
        adapter: Arc<dyn MarketplaceAdapter>,
        credential: Credential,
        client: Client,
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            adapter,
            client,
            logger: SyncLogger::new(db.clone()),
            db,
            clock,
            state: Mutex::new(TokenState {
                credential,
                stored_token_checked: false,
            }),
        }
    }

    /// Marketplace this manager authenticates against
    pub fn marketplace(&self) -> &'static str {
        self.adapter.target().name()
    }

    /// Return a valid access token, refreshing it when needed
    ///
    /// On failure the cached token is left untouched and nothing is retried.
    pub async fn access_token(&self) -> Result<AccessToken, AuthError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        if let (Some(value), Some(expires_at)) =
            (&state.credential.access_token, state.credential.expires_at)
        {
            if now < expires_at {
                return Ok(AccessToken {
                    value: value.clone(),
                    expires_at,
                });
            }
        }

        self.load_stored_refresh_token(&mut state).await;

        let request_id = uuid::Uuid::new_v4().to_string();
        let grant = match self.request_grant(&state.credential).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(
                    marketplace = %self.marketplace(),
                    request_id = %request_id,
                    error = %e,
                    "Access token refresh failed"
                );
                self.logger
                    .record(
                        &request_id,
                        self.marketplace(),
                        SyncAction::TokenRefresh,
                        LogStatus::Error,
                        e.to_string(),
                        Value::Null,
                    )
                    .await;
                return Err(e);
            }
        };

        let buffer = self.adapter.target().token_expiry_buffer_secs as i64;
        let expires_at = now + Duration::seconds((grant.expires_in - buffer).max(0));
        state.credential.access_token = Some(grant.access_token.clone());
        state.credential.expires_at = Some(expires_at);

        let token = AccessToken {
            value: grant.access_token,
            expires_at,
        };

        match grant.refresh_token {
            Some(rotated) if rotated != state.credential.refresh_token => {
                state.credential.refresh_token = rotated.clone();
                self.persist_rotated(&request_id, &rotated).await?;
            }
            _ => {}
        }

        Ok(token)
    }

    /// Drop the cached access token so the next call refreshes
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.credential.access_token = None;
        state.credential.expires_at = None;
    }

    /// Current credential with secrets intact
    pub async fn credential(&self) -> Credential {
        self.state.lock().await.credential.clone()
    }

    async fn load_stored_refresh_token(&self, state: &mut TokenState) {
        if state.stored_token_checked {
            return;
        }
        match self.db.get_setting(&refresh_token_key(self.marketplace())).await {
            Ok(Some(stored)) if !stored.is_empty() => {
                state.credential.refresh_token = stored;
                state.stored_token_checked = true;
            }
            Ok(_) => state.stored_token_checked = true,
            Err(e) => {
                // Retried on the next refresh
                tracing::warn!(
                    marketplace = %self.marketplace(),
                    error = %e,
                    "Failed to read stored refresh token, using configured value"
                );
            }
        }
    }

    async fn request_grant(&self, credential: &Credential) -> Result<TokenGrant, AuthError> {
        let request = self.adapter.build_auth_request(credential);

        let mut builder = self
            .client
            .post(&request.url)
            .timeout(self.adapter.target().token_timeout)
            .header("Accept", "application/json")
            .form(&request.form);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: redact_excerpt(&body),
            });
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        self.adapter.parse_auth_response(&json)
    }

    async fn persist_rotated(&self, request_id: &str, refresh_token: &str) -> Result<(), AuthError> {
        let key = refresh_token_key(self.marketplace());
        match self.db.set_setting(&key, refresh_token).await {
            Ok(()) => {
                tracing::info!(
                    marketplace = %self.marketplace(),
                    request_id = %request_id,
                    "Refresh token rotated and persisted"
                );
                self.logger
                    .record(
                        request_id,
                        self.marketplace(),
                        SyncAction::TokenRefresh,
                        LogStatus::Success,
                        "Refresh token rotated",
                        json!({ "setting": key }),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    marketplace = %self.marketplace(),
                    request_id = %request_id,
                    error = %e,
                    "Rotated refresh token could not be persisted"
                );
                self.logger
                    .record(
                        request_id,
                        self.marketplace(),
                        SyncAction::TokenRefresh,
                        LogStatus::Error,
                        format!("Rotated refresh token not persisted: {}", e),
                        json!({ "setting": key }),
                    )
                    .await;
                Err(AuthError::Persist(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::{MockDatabase, SqliteDatabase};
    use crate::error::DbError;
    use crate::models::{MarketplaceKind, SyncTarget};
    use crate::plugins::marketplace::adapter_for;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(kind: MarketplaceKind, server: &MockServer) -> SyncTarget {
        let mut target = SyncTarget::new(kind);
        target.token_url = format!("{}/oauth/token", server.uri());
        target.api_base_url = server.uri();
        target.shop_id = Some("1".to_string());
        target
    }

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn manager(
        kind: MarketplaceKind,
        server: &MockServer,
        db: Arc<dyn Database>,
        clock: Arc<ManualClock>,
    ) -> TokenManager {
        let credential = Credential::new("id", Some("secret".to_string()), "refresh-1");
        TokenManager::new(
            adapter_for(target(kind, server)),
            credential,
            Client::new(),
            db,
            clock,
        )
    }

    async fn memory_db() -> Arc<dyn Database> {
        Arc::new(SqliteDatabase::in_memory().await.unwrap())
    }

    // Test 1: Token is reused inside its window and refreshed once after it
    #[tokio::test]
    async fn test_token_reuse_then_single_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Ebay, &server, memory_db().await, clock.clone()).await;

        let first = manager.access_token().await.unwrap();
        assert_eq!(first.value, "tok");
        assert_eq!(first.expires_at, start() + Duration::seconds(3540));

        clock.set(start() + Duration::seconds(3000));
        let second = manager.access_token().await.unwrap();
        assert_eq!(second, first);

        clock.set(start() + Duration::seconds(3601));
        let third = manager.access_token().await.unwrap();
        assert_eq!(third.expires_at, start() + Duration::seconds(3601 + 3540));

        let fourth = manager.access_token().await.unwrap();
        assert_eq!(fourth, third);
    }

    // Test 2: Basic client credentials are sent to eBay's endpoint
    #[tokio::test]
    async fn test_refresh_sends_basic_auth_and_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("Authorization", "Basic aWQ6c2VjcmV0"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Ebay, &server, memory_db().await, clock).await;
        manager.access_token().await.unwrap();
    }

    // Test 3: Non-200 leaves the cache untouched
    #[tokio::test]
    async fn test_rejected_refresh_keeps_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let db = memory_db().await;
        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Ebay, &server, db.clone(), clock).await;

        match manager.access_token().await {
            Err(AuthError::Rejected { status, message }) => {
                assert_eq!(status, 400);
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let credential = manager.credential().await;
        assert!(credential.access_token.is_none());
        assert!(credential.expires_at.is_none());

        let logs = db.get_sync_logs(10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "token_refresh");
        assert_eq!(logs[0].status, LogStatus::Error);
    }

    // Test 4: Missing access_token is an error
    #[tokio::test]
    async fn test_missing_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"expires_in": 3600})))
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Ebay, &server, memory_db().await, clock).await;
        assert!(matches!(
            manager.access_token().await,
            Err(AuthError::MissingAccessToken)
        ));
    }

    // Test 5: Unreachable endpoint is a transport error
    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let server = MockServer::start().await;
        let mut target = target(MarketplaceKind::Ebay, &server);
        target.token_url = "http://127.0.0.1:1/oauth/token".to_string();
        let manager = TokenManager::new(
            adapter_for(target),
            Credential::new("id", Some("secret".to_string()), "r"),
            Client::new(),
            memory_db().await,
            Arc::new(ManualClock::new(start())),
        );
        assert!(matches!(
            manager.access_token().await,
            Err(AuthError::Transport(_))
        ));
    }

    // Test 6: Rotated refresh token is persisted and used next time
    #[tokio::test]
    async fn test_rotated_refresh_token_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-1",
                "expires_in": 3600,
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=refresh-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-2",
                "expires_in": 3600,
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let db = memory_db().await;
        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Etsy, &server, db.clone(), clock.clone()).await;

        assert_eq!(manager.access_token().await.unwrap().value, "tok-1");
        assert_eq!(
            db.get_setting("etsy.refresh_token").await.unwrap(),
            Some("refresh-2".to_string())
        );

        clock.advance(Duration::seconds(3600));
        assert_eq!(manager.access_token().await.unwrap().value, "tok-2");
    }

    // Test 7: Stored refresh token overrides the configured one
    #[tokio::test]
    async fn test_stored_refresh_token_takes_precedence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("refresh_token=from-store"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let db = memory_db().await;
        db.set_setting("etsy.refresh_token", "from-store").await.unwrap();

        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Etsy, &server, db, clock).await;
        assert_eq!(manager.access_token().await.unwrap().value, "tok");
    }

    // Test 8: Persist failure is surfaced but the new token stays cached
    #[tokio::test]
    async fn test_rotation_persist_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600,
                "refresh_token": "refresh-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut mock = MockDatabase::new();
        mock.expect_get_setting().returning(|_| Ok(None));
        mock.expect_set_setting()
            .returning(|_, _| Err(DbError::ConstraintViolation("read-only".to_string())));
        mock.expect_append_sync_log().returning(|_| Ok(1));

        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Etsy, &server, Arc::new(mock), clock).await;

        assert!(matches!(
            manager.access_token().await,
            Err(AuthError::Persist(_))
        ));
        let credential = manager.credential().await;
        assert_eq!(credential.refresh_token, "refresh-2");
        assert_eq!(manager.access_token().await.unwrap().value, "tok");
    }

    // Test 9: Invalidate forces a refresh
    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(start()));
        let manager = manager(MarketplaceKind::Amazon, &server, memory_db().await, clock).await;

        manager.access_token().await.unwrap();
        manager.invalidate().await;
        manager.access_token().await.unwrap();
    }

    // Test 10: Concurrent callers share one refresh
    #[tokio::test]
    async fn test_concurrent_callers_single_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let clock = Arc::new(ManualClock::new(start()));
        let manager = Arc::new(
            manager(MarketplaceKind::Ebay, &server, memory_db().await, clock).await,
        );

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.access_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().value, "tok");
        }
    }

    // Test 11: Debug output hides the token
    #[test]
    fn test_access_token_debug_redacts() {
        let token = AccessToken {
            value: "secret-token".to_string(),
            expires_at: start(),
        };
        assert!(!format!("{:?}", token).contains("secret-token"));
    }
}
