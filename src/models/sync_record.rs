//! Per-resource sync state
//!
//! A [`SyncRecord`] links one local entity (and variant) to its remote
//! counterpart on one marketplace. The synchronizer returns a [`SyncResult`]
//! or [`ImportResult`] describing what happened on each call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Kind of local entity being synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Catalog product mapped to a remote listing
    Product,
    /// Remote order imported into the local store
    Order,
}

impl ResourceType {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Product => "product",
            ResourceType::Order => "order",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" => Ok(ResourceType::Product),
            "order" => Ok(ResourceType::Order),
            _ => Err(format!("Unknown resource type: {}", s)),
        }
    }
}

/// Sync state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// An attempt is in flight or has not completed
    Pending,
    /// Last attempt succeeded
    Synced,
    /// Last attempt failed
    Error,
}

impl SyncStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            _ => Err(format!("Unknown sync status: {}", s)),
        }
    }
}

/// Mapping between a local entity and its remote counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Database ID (0 until stored)
    pub id: i64,

    /// Marketplace name
    pub marketplace: String,

    /// Resource type
    pub resource_type: ResourceType,

    /// Local entity id
    pub local_id: i64,

    /// Variant key, empty for the base resource
    pub variant: String,

    /// Primary remote id (listing id, order id)
    pub remote_id: Option<String>,

    /// Secondary remote id (eBay offer id, Amazon SKU)
    pub remote_secondary_id: Option<String>,

    /// Current status
    pub status: SyncStatus,

    /// Last error message, cleared on success
    pub error_message: Option<String>,

    /// When the last successful sync completed
    pub last_synced_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl SyncRecord {
    /// Create a pending record for the base variant
    pub fn new(marketplace: impl Into<String>, resource_type: ResourceType, local_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            marketplace: marketplace.into(),
            resource_type,
            local_id,
            variant: String::new(),
            remote_id: None,
            remote_secondary_id: None,
            status: SyncStatus::Pending,
            error_message: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the variant key
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    /// Set the primary remote id
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Set the secondary remote id
    pub fn with_remote_secondary_id(mut self, id: impl Into<String>) -> Self {
        self.remote_secondary_id = Some(id.into());
        self
    }

    /// Mark the record as successfully synced at `at`
    pub fn synced(mut self, at: DateTime<Utc>) -> Self {
        self.status = SyncStatus::Synced;
        self.error_message = None;
        self.last_synced_at = Some(at);
        self
    }

    /// Mark the record as failed with a message
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = SyncStatus::Error;
        self.error_message = Some(message.into());
        self
    }

    /// A record is linked once it has a remote id and has synced at least once
    pub fn is_linked(&self) -> bool {
        self.remote_id.is_some() && self.last_synced_at.is_some()
    }
}

/// Outcome of a single-resource sync call
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    /// Marketplace name
    pub marketplace: String,
    /// Local entity id
    pub local_id: i64,
    /// Status the record was left in
    pub status: SyncStatus,
    /// Remote id after the call (retained on failure)
    pub remote_id: Option<String>,
    /// Whether a new remote listing was created
    pub created: bool,
    /// Failure cause
    pub error: Option<SyncError>,
}

impl SyncResult {
    /// Successful outcome
    pub fn synced(
        marketplace: impl Into<String>,
        local_id: i64,
        remote_id: Option<String>,
        created: bool,
    ) -> Self {
        Self {
            marketplace: marketplace.into(),
            local_id,
            status: SyncStatus::Synced,
            remote_id,
            created,
            error: None,
        }
    }

    /// Failed outcome
    pub fn failed(
        marketplace: impl Into<String>,
        local_id: i64,
        remote_id: Option<String>,
        error: SyncError,
    ) -> Self {
        Self {
            marketplace: marketplace.into(),
            local_id,
            status: SyncStatus::Error,
            remote_id,
            created: false,
            error: Some(error),
        }
    }

    /// Whether the call succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl std::fmt::Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} {}", self.marketplace, self.local_id, self.status)?;
        if let Some(remote_id) = &self.remote_id {
            write!(f, " remote={}", remote_id)?;
        }
        if self.created {
            f.write_str(" (created)")?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

/// One order that could not be imported
#[derive(Debug, Clone, PartialEq)]
pub struct ImportFailure {
    /// Remote order id, when known
    pub remote_id: Option<String>,
    /// Failure cause
    pub error: SyncError,
}

/// Outcome of an order import pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportResult {
    /// Orders created locally
    pub imported: u32,
    /// Orders skipped because they were already recorded
    pub skipped: u32,
    /// Per-order and per-page failures
    pub errors: Vec<ImportFailure>,
    /// Watermark stored for the next pass
    pub watermark: Option<DateTime<Utc>>,
}

impl ImportResult {
    /// Record a failure
    pub fn push_error(&mut self, remote_id: Option<String>, error: SyncError) {
        self.errors.push(ImportFailure { remote_id, error });
    }
}

impl std::fmt::Display for ImportResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "imported={} skipped={} errors={}",
            self.imported,
            self.skipped,
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Error] {
            assert_eq!(status.to_string().parse::<SyncStatus>(), Ok(status));
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("Product".parse::<ResourceType>(), Ok(ResourceType::Product));
        assert_eq!("order".parse::<ResourceType>(), Ok(ResourceType::Order));
        assert!("listing".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_record_builders() {
        let now = Utc::now();
        let record = SyncRecord::new("ebay", ResourceType::Product, 42)
            .with_variant("red")
            .with_remote_id("L-1")
            .synced(now);

        assert_eq!(record.variant, "red");
        assert_eq!(record.status, SyncStatus::Synced);
        assert_eq!(record.last_synced_at, Some(now));
        assert!(record.is_linked());

        let failed = record.failed("boom");
        assert_eq!(failed.status, SyncStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(failed.remote_id.as_deref(), Some("L-1"));
    }

    #[test]
    fn test_unsynced_record_is_not_linked() {
        let record = SyncRecord::new("etsy", ResourceType::Product, 1).with_remote_id("123");
        assert!(!record.is_linked());
    }

    #[test]
    fn test_sync_result_display() {
        let ok = SyncResult::synced("ebay", 5, Some("L-9".to_string()), true);
        assert_eq!(ok.to_string(), "[ebay] 5 synced remote=L-9 (created)");

        let err = SyncResult::failed("ebay", 5, None, SyncError::NotLinked { local_id: 5 });
        assert!(!err.is_success());
        assert_eq!(
            err.to_string(),
            "[ebay] 5 error: Resource 5 is not linked to a remote listing"
        );
    }
}
