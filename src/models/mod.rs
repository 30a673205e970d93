//! Domain models for marketplace-sync
//!
//! This module contains the core domain models used throughout the application.

pub mod catalog;
pub mod marketplace;
pub mod sync_log;
pub mod sync_record;

// Re-export commonly used types
pub use catalog::{LocalOrder, LocalOrderStatus, LocalProduct, Money, NewOrder, NewOrderItem};
pub use marketplace::{AuthMode, Credential, MarketplaceKind, SyncTarget};
pub use sync_log::{LogStatus, SyncAction, SyncLogEntry};
pub use sync_record::{
    ImportFailure, ImportResult, ResourceType, SyncRecord, SyncResult, SyncStatus,
};
