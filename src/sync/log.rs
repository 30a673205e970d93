//! Best-effort audit trail writer
//!
//! Entries go to the `sync_logs` table through the [`Database`] trait. A
//! storage failure never fails the operation being logged; it is reported
//! through `tracing` instead.

use std::sync::{Arc, OnceLock};

use regex_lite::Regex;

use crate::database::Database;
use crate::models::{LogStatus, SyncAction, SyncLogEntry};

/// Maximum length of a response excerpt stored in log details
pub const EXCERPT_LIMIT: usize = 512;

/// Writes [`SyncLogEntry`] rows without ever failing the caller
#[derive(Clone)]
pub struct SyncLogger {
    db: Arc<dyn Database>,
}

impl SyncLogger {
    /// Create a logger backed by the given store
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Append an entry; returns the stored id, or `None` if storage failed
    pub async fn append(&self, entry: SyncLogEntry) -> Option<i64> {
        match self.db.append_sync_log(&entry).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    marketplace = %entry.marketplace,
                    action = %entry.action,
                    request_id = %entry.request_id,
                    "Failed to write sync log entry"
                );
                None
            }
        }
    }

    /// Convenience wrapper building the entry from its parts
    pub async fn record(
        &self,
        request_id: &str,
        marketplace: &str,
        action: SyncAction,
        status: LogStatus,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Option<i64> {
        let entry = SyncLogEntry::new(request_id, marketplace, action, status, message)
            .with_details(details);
        self.append(entry).await
    }
}

fn secret_field_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?i)"?(access_token|refresh_token|client_secret|id_token|password|authorization)"?\s*[:=]\s*"?[^",&\s}]+"?"#,
            )
            .ok()
        })
        .as_ref()
}

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").ok())
        .as_ref()
}

/// De-identify and truncate a response body for storage
///
/// Token and secret fields are masked, email addresses replaced, and the
/// result cut to [`EXCERPT_LIMIT`] characters.
pub fn redact_excerpt(body: &str) -> String {
    let (Some(secrets), Some(emails)) = (secret_field_pattern(), email_pattern()) else {
        return "[REDACTED]".to_string();
    };
    let masked = secrets.replace_all(body, "$1=[REDACTED]");
    let masked = emails.replace_all(&masked, "[EMAIL]");

    if masked.chars().count() <= EXCERPT_LIMIT {
        masked.into_owned()
    } else {
        let mut cut: String = masked.chars().take(EXCERPT_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MockDatabase;
    use crate::error::DbError;
    use serde_json::json;

    // Test 1: Stored entries return their id
    #[tokio::test]
    async fn test_append_returns_id() {
        let mut mock = MockDatabase::new();
        mock.expect_append_sync_log()
            .withf(|entry| entry.action == "create_listing" && entry.status == LogStatus::Success)
            .returning(|_| Ok(12));

        let logger = SyncLogger::new(Arc::new(mock));
        let id = logger
            .record(
                "req-1",
                "ebay",
                SyncAction::CreateListing,
                LogStatus::Success,
                "created",
                json!({"local_id": 1}),
            )
            .await;
        assert_eq!(id, Some(12));
    }

    // Test 2: Storage failures are swallowed
    #[tokio::test]
    async fn test_append_swallows_storage_failure() {
        let mut mock = MockDatabase::new();
        mock.expect_append_sync_log()
            .returning(|_| Err(DbError::ConstraintViolation("disk full".to_string())));

        let logger = SyncLogger::new(Arc::new(mock));
        let entry = SyncLogEntry::new(
            "req-2",
            "etsy",
            SyncAction::FetchOrders,
            LogStatus::Error,
            "HTTP 500",
        );
        assert_eq!(logger.append(entry).await, None);
    }

    // Test 3: Secrets are masked in excerpts
    #[test]
    fn test_redact_excerpt_masks_tokens() {
        let body = r#"{"error":"invalid_grant","refresh_token":"r-123","access_token":"a-456"}"#;
        let excerpt = redact_excerpt(body);
        assert!(!excerpt.contains("r-123"));
        assert!(!excerpt.contains("a-456"));
        assert!(excerpt.contains("invalid_grant"));
    }

    // Test 4: Email addresses are replaced
    #[test]
    fn test_redact_excerpt_masks_emails() {
        let excerpt = redact_excerpt("buyer jane.doe@example.com rejected");
        assert_eq!(excerpt, "buyer [EMAIL] rejected");
    }

    // Test 5: Long bodies are truncated
    #[test]
    fn test_redact_excerpt_truncates() {
        let body = "x".repeat(2000);
        let excerpt = redact_excerpt(&body);
        assert_eq!(excerpt.chars().count(), EXCERPT_LIMIT + 3);
        assert!(excerpt.ends_with("..."));
    }
}
