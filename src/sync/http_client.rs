//! Authenticated, rate-limited, retrying marketplace HTTP client
//!
//! [`ApiClient`] runs one [`ApiRequest`] to a terminal outcome. Each attempt
//! acquires the endpoint class budget, obtains an access token and sends the
//! call with auth, marketplace and request-id headers. The response is then
//! classified:
//!
//! - 2xx: done
//! - 429: backoff (rate-limit multiplier or `Retry-After`) and retry
//! - 5xx, transport failure: backoff and retry
//! - any other 4xx: terminal client error; 401 also drops the cached token
//!
//! Every terminal outcome is appended to the sync log.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::{AccessToken, RateLimiter, TokenManager};
use crate::clock::Clock;
use crate::database::Database;
use crate::error::SyncError;
use crate::models::{Credential, LogStatus, SyncLogEntry, SyncTarget};
use crate::otel::SyncMetrics;
use crate::plugins::marketplace::{adapter_for, ApiRequest, MarketplaceAdapter};
use crate::sync::log::{redact_excerpt, SyncLogger};
use crate::sync::retry::{RetryPolicy, RetryReason};

/// Successful (or accepted 404) response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status
    pub status: u16,
    /// Parsed JSON body; `Null` when empty, a string when not JSON
    pub body: Value,
    /// Request id sent with the call
    pub request_id: String,
}

impl ApiResponse {
    /// Whether the resource was absent (only with `accept_not_found`)
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND.as_u16()
    }
}

/// Classified result of a single attempt
enum Attempt {
    Done(ApiResponse),
    Retry {
        reason: RetryReason,
        status: Option<u16>,
        retry_after: Option<u64>,
        excerpt: String,
    },
    Fail {
        error: SyncError,
        excerpt: String,
    },
}

/// Request executor for one marketplace connection
pub struct ApiClient {
    adapter: Arc<dyn MarketplaceAdapter>,
    tokens: Arc<TokenManager>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    client: Client,
    logger: SyncLogger,
    metrics: Option<Arc<SyncMetrics>>,
}

impl ApiClient {
    /// Create an executor from its parts
    pub fn new(
        adapter: Arc<dyn MarketplaceAdapter>,
        tokens: Arc<TokenManager>,
        limiter: Arc<RateLimiter>,
        client: Client,
        db: Arc<dyn Database>,
    ) -> Self {
        let retry = RetryPolicy::new(adapter.target().retry.clone());
        Self {
            adapter,
            tokens,
            limiter,
            retry,
            client,
            logger: SyncLogger::new(db),
            metrics: None,
        }
    }

    /// Build the adapter, token manager and limiter for a configured target
    pub fn connect(
        target: SyncTarget,
        credential: Credential,
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let client = Client::new();
        let limiter = Arc::new(RateLimiter::new(target.rate_limits.clone()));
        let adapter = adapter_for(target);
        let tokens = Arc::new(TokenManager::new(
            adapter.clone(),
            credential,
            client.clone(),
            db.clone(),
            clock,
        ));
        Self::new(adapter, tokens, limiter, client, db)
    }

    /// Record into shared metrics
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Adapter requests are built with
    pub fn adapter(&self) -> &Arc<dyn MarketplaceAdapter> {
        &self.adapter
    }

    /// Token manager used for every attempt
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Marketplace name
    pub fn marketplace(&self) -> &'static str {
        self.adapter.target().name()
    }

    /// Run a request to its terminal outcome
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse, SyncError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            self.limiter.acquire(request.class).await;

            let token = match self.tokens.access_token().await {
                Ok(token) => token,
                Err(e) => {
                    let error = SyncError::Auth(e);
                    self.finish_error(request, &request_id, attempt + 1, &error, String::new(), started)
                        .await;
                    return Err(error);
                }
            };

            match self.attempt(request, &token, &request_id).await {
                Attempt::Done(response) => {
                    self.finish_ok(request, &response, attempt + 1, started).await;
                    return Ok(response);
                }
                Attempt::Fail { error, excerpt } => {
                    self.finish_error(request, &request_id, attempt + 1, &error, excerpt, started)
                        .await;
                    return Err(error);
                }
                Attempt::Retry {
                    reason,
                    status,
                    retry_after,
                    excerpt,
                } => {
                    if !self.retry.can_retry(attempt) {
                        let attempts = attempt + 1;
                        let error = match reason {
                            RetryReason::RateLimited => SyncError::RateLimited { attempts },
                            RetryReason::ServerError => SyncError::Server {
                                status: status.unwrap_or(500),
                                attempts,
                            },
                            RetryReason::Transport => SyncError::Transport(excerpt.clone()),
                        };
                        warn!(
                            marketplace = %self.marketplace(),
                            request_id = %request_id,
                            action = %request.action,
                            attempts,
                            "Retries exhausted"
                        );
                        self.finish_error(request, &request_id, attempts, &error, excerpt, started)
                            .await;
                        return Err(error);
                    }

                    let delay = match (reason, retry_after) {
                        (RetryReason::RateLimited, Some(secs)) => self.retry.retry_after(secs),
                        _ => self.retry.backoff(attempt, reason),
                    };
                    debug!(
                        marketplace = %self.marketplace(),
                        request_id = %request_id,
                        action = %request.action,
                        attempt = attempt + 1,
                        reason = reason.as_str(),
                        status = ?status,
                        backoff_ms = delay.as_millis() as u64,
                        "Retrying after transient failure"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry(self.marketplace(), reason.as_str());
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest, token: &AccessToken, request_id: &str) -> Attempt {
        let target = self.adapter.target();
        let credential = self.tokens.credential().await;
        let timeout = if request.heavy {
            target.upload_timeout
        } else {
            target.request_timeout
        };

        let mut builder = self
            .client
            .request(request.method.clone(), target.url(&request.path))
            .timeout(timeout)
            .header("Accept", "application/json")
            .header(self.adapter.request_id_header(), request_id);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in self
            .adapter
            .default_headers()
            .into_iter()
            .chain(self.adapter.auth_headers(&token.value, &credential))
        {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        debug!(
            marketplace = %self.marketplace(),
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            "Sending marketplace request"
        );

        match builder.send().await {
            Ok(response) => self.classify(request, response, request_id).await,
            Err(e) => Attempt::Retry {
                reason: RetryReason::Transport,
                status: None,
                retry_after: None,
                excerpt: e.to_string(),
            },
        }
    }

    async fn classify(&self, request: &ApiRequest, response: Response, request_id: &str) -> Attempt {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Attempt::Retry {
                    reason: RetryReason::Transport,
                    status: Some(status.as_u16()),
                    retry_after: None,
                    excerpt: e.to_string(),
                }
            }
        };

        if status.is_success() || (status == StatusCode::NOT_FOUND && request.accept_not_found) {
            return Attempt::Done(ApiResponse {
                status: status.as_u16(),
                body: parse_body(&text),
                request_id: request_id.to_string(),
            });
        }

        let excerpt = redact_excerpt(&text);
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(
                marketplace = %self.marketplace(),
                request_id = %request_id,
                retry_after = ?retry_after,
                "Rate limited by marketplace"
            );
            return Attempt::Retry {
                reason: RetryReason::RateLimited,
                status: Some(status.as_u16()),
                retry_after,
                excerpt,
            };
        }
        if status.is_server_error() {
            return Attempt::Retry {
                reason: RetryReason::ServerError,
                status: Some(status.as_u16()),
                retry_after: None,
                excerpt,
            };
        }
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }

        Attempt::Fail {
            error: SyncError::Client {
                status: status.as_u16(),
                message: excerpt.clone(),
            },
            excerpt,
        }
    }

    async fn finish_ok(&self, request: &ApiRequest, response: &ApiResponse, attempts: u32, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(
                self.marketplace(),
                "success",
                started.elapsed().as_secs_f64(),
            );
        }

        let entry = SyncLogEntry::new(
            &response.request_id,
            self.marketplace(),
            request.action,
            LogStatus::Success,
            format!("{} {} -> {}", request.method, request.path, response.status),
        )
        .with_http_status(response.status)
        .with_details(json!({
            "method": request.method.as_str(),
            "path": request.path,
            "attempts": attempts,
        }));
        self.logger.append(entry).await;
    }

    async fn finish_error(
        &self,
        request: &ApiRequest,
        request_id: &str,
        attempts: u32,
        error: &SyncError,
        excerpt: String,
        started: Instant,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(
                self.marketplace(),
                error_label(error),
                started.elapsed().as_secs_f64(),
            );
        }

        let mut entry = SyncLogEntry::new(
            request_id,
            self.marketplace(),
            request.action,
            LogStatus::Error,
            error.to_string(),
        )
        .with_details(json!({
            "method": request.method.as_str(),
            "path": request.path,
            "attempts": attempts,
            "excerpt": excerpt,
        }));
        if let Some(status) = error.http_status() {
            entry = entry.with_http_status(status);
        }
        self.logger.append(entry).await;
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn error_label(error: &SyncError) -> &'static str {
    match error {
        SyncError::Auth(_) => "auth_error",
        SyncError::RateLimited { .. } => "rate_limited",
        SyncError::Client { .. } => "client_error",
        SyncError::Server { .. } => "server_error",
        SyncError::Transport(_) => "transport_error",
        _ => "error",
    }
}
