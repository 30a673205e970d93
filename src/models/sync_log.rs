//! Sync audit log models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome recorded in a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Action completed
    Success,
    /// Action failed
    Error,
    /// Action completed with a caveat, or was refused locally
    Warning,
}

impl LogStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Warning => "warning",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            "warning" => Ok(LogStatus::Warning),
            _ => Err(format!("Unknown log status: {}", s)),
        }
    }
}

/// Named actions written to the sync log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// OAuth refresh-token grant
    TokenRefresh,
    /// Search for an existing remote listing
    FindListing,
    /// Create or replace the inventory item / product data
    PrepareListing,
    /// Create a remote listing
    CreateListing,
    /// Update a remote listing
    UpdateListing,
    /// Make a listing live
    PublishListing,
    /// Quantity-only update
    UpdateInventory,
    /// Fetch one page of orders
    FetchOrders,
    /// Fetch line items of one order
    FetchOrderItems,
    /// Whole `sync_product` call
    SyncProduct,
    /// Whole `sync_inventory` call
    SyncInventory,
    /// One imported order
    ImportOrder,
    /// Whole `import_orders` call
    ImportOrders,
    /// Explicit unlink
    Unlink,
}

impl SyncAction {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::TokenRefresh => "token_refresh",
            SyncAction::FindListing => "find_listing",
            SyncAction::PrepareListing => "prepare_listing",
            SyncAction::CreateListing => "create_listing",
            SyncAction::UpdateListing => "update_listing",
            SyncAction::PublishListing => "publish_listing",
            SyncAction::UpdateInventory => "update_inventory",
            SyncAction::FetchOrders => "fetch_orders",
            SyncAction::FetchOrderItems => "fetch_order_items",
            SyncAction::SyncProduct => "sync_product",
            SyncAction::SyncInventory => "sync_inventory",
            SyncAction::ImportOrder => "import_order",
            SyncAction::ImportOrders => "import_orders",
            SyncAction::Unlink => "unlink",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Database ID (0 until stored)
    pub id: i64,

    /// Request id correlating the entry with the HTTP call
    pub request_id: String,

    /// Marketplace name
    pub marketplace: String,

    /// Action name
    pub action: String,

    /// Outcome
    pub status: LogStatus,

    /// Human-readable message
    pub message: String,

    /// HTTP status of the terminal response, if any
    pub http_status: Option<u16>,

    /// Structured details
    pub details: serde_json::Value,

    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

impl SyncLogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        request_id: impl Into<String>,
        marketplace: impl Into<String>,
        action: SyncAction,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            request_id: request_id.into(),
            marketplace: marketplace.into(),
            action: action.as_str().to_string(),
            status,
            message: message.into(),
            http_status: None,
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Attach the HTTP status
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_status_parse() {
        assert_eq!("success".parse::<LogStatus>(), Ok(LogStatus::Success));
        assert_eq!("WARNING".parse::<LogStatus>(), Ok(LogStatus::Warning));
        assert!("ok".parse::<LogStatus>().is_err());
    }

    #[test]
    fn test_entry_builder() {
        let entry = SyncLogEntry::new(
            "req-1",
            "etsy",
            SyncAction::CreateListing,
            LogStatus::Error,
            "HTTP 400",
        )
        .with_http_status(400)
        .with_details(serde_json::json!({"sku": "SKU-1"}));

        assert_eq!(entry.action, "create_listing");
        assert_eq!(entry.http_status, Some(400));
        assert_eq!(entry.details["sku"], "SKU-1");
    }
}
