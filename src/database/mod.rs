//! Database layer for marketplace-sync
//!
//! This module defines the database trait and SQLite implementation. The
//! trait covers sync state, the audit log, the settings store and the local
//! catalog/order repository the worker reads from and writes into.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{
    LocalOrder, LocalProduct, NewOrder, ResourceType, SyncLogEntry, SyncRecord, SyncStatus,
};

/// Filter for listing sync records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncRecordFilter {
    /// Restrict to one marketplace
    pub marketplace: Option<String>,
    /// Restrict to one resource type
    pub resource_type: Option<ResourceType>,
    /// Restrict to one status
    pub status: Option<SyncStatus>,
    /// Maximum rows returned (0 = unlimited)
    pub limit: u32,
}

/// Database trait for data persistence
///
/// This trait defines all database operations needed by the application.
/// It uses `async_trait` for async methods and `mockall::automock` for testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    // =========================================================================
    // Sync record operations
    // =========================================================================

    /// Insert or update the record for `(marketplace, resource_type, local_id, variant)`
    ///
    /// Remote ids and `last_synced_at` are only overwritten by non-null values,
    /// so a failed attempt keeps the previously stored links. Returns the
    /// stored row.
    async fn upsert_sync_record(&self, record: &SyncRecord) -> Result<SyncRecord, DbError>;

    /// Get the record for a local entity
    async fn get_sync_record(
        &self,
        marketplace: &str,
        resource_type: ResourceType,
        local_id: i64,
        variant: &str,
    ) -> Result<Option<SyncRecord>, DbError>;

    /// Find the record linked to a remote id
    async fn find_sync_record_by_remote_id(
        &self,
        marketplace: &str,
        resource_type: ResourceType,
        remote_id: &str,
    ) -> Result<Option<SyncRecord>, DbError>;

    /// List records matching a filter, most recently updated first
    async fn list_sync_records(&self, filter: &SyncRecordFilter)
        -> Result<Vec<SyncRecord>, DbError>;

    /// Remove a record
    ///
    /// Returns `DbError::NotFound` when no record matched.
    async fn unlink_sync_record(
        &self,
        marketplace: &str,
        resource_type: ResourceType,
        local_id: i64,
        variant: &str,
    ) -> Result<(), DbError>;

    // =========================================================================
    // Sync log operations
    // =========================================================================

    /// Append an audit entry, returning its ID
    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<i64, DbError>;

    /// Get log entries with pagination, newest first
    async fn get_sync_logs(&self, limit: u32, offset: u32) -> Result<Vec<SyncLogEntry>, DbError>;

    /// Get total count of log entries
    async fn get_sync_logs_count(&self) -> Result<u64, DbError>;

    // =========================================================================
    // Settings operations
    // =========================================================================

    /// Read a setting
    async fn get_setting(&self, key: &str) -> Result<Option<String>, DbError>;

    /// Write a setting, replacing any previous value
    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError>;

    /// Remove a setting; removing a missing key is not an error
    async fn delete_setting(&self, key: &str) -> Result<(), DbError>;

    // =========================================================================
    // Catalog and order operations
    // =========================================================================

    /// Get a local product
    async fn get_product(&self, id: i64) -> Result<Option<LocalProduct>, DbError>;

    /// Insert or replace a local product
    async fn upsert_product(&self, product: &LocalProduct) -> Result<(), DbError>;

    /// Insert an imported order with its items and its synced order record
    ///
    /// All rows are written in one transaction. Returns the local order ID.
    async fn insert_imported_order(
        &self,
        order: &NewOrder,
        synced_at: DateTime<Utc>,
    ) -> Result<i64, DbError>;

    /// Get a local order with its items
    async fn get_order(&self, id: i64) -> Result<Option<LocalOrder>, DbError>;
}
