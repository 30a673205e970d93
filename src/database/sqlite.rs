//! SQLite implementation of the Database trait
//!
//! This module provides a SQLite-based implementation of the Database trait
//! using rusqlite and tokio-rusqlite for async operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::OptionalExtension;
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::{Database, SyncRecordFilter};
use crate::error::DbError;
use crate::models::{
    LocalOrder, LocalProduct, NewOrder, NewOrderItem, ResourceType, SyncLogEntry, SyncRecord,
};

const SYNC_RECORD_COLUMNS: &str = "id, marketplace, resource_type, local_id, variant, remote_id, \
     remote_secondary_id, status, error_message, last_synced_at, created_at, updated_at";

/// SQLite database implementation
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Create a new SQLite database connection
    ///
    /// Use `:memory:` for in-memory database or a file path for persistent storage.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self, DbError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    // =========================================================================
    // Sync record operations
    // =========================================================================

    async fn upsert_sync_record(&self, record: &SyncRecord) -> Result<SyncRecord, DbError> {
        let marketplace = record.marketplace.clone();
        let resource_type = record.resource_type.to_string();
        let local_id = record.local_id;
        let variant = record.variant.clone();
        let remote_id = record.remote_id.clone();
        let remote_secondary_id = record.remote_secondary_id.clone();
        let status = record.status.to_string();
        let error_message = record.error_message.clone();
        let last_synced_at = record.last_synced_at.map(|dt| dt.to_rfc3339());
        let created_at = record.created_at.to_rfc3339();
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_records
                    (marketplace, resource_type, local_id, variant, remote_id, remote_secondary_id,
                     status, error_message, last_synced_at, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(marketplace, resource_type, local_id, variant) DO UPDATE SET
                        remote_id = COALESCE(excluded.remote_id, sync_records.remote_id),
                        remote_secondary_id = COALESCE(excluded.remote_secondary_id, sync_records.remote_secondary_id),
                        status = excluded.status,
                        error_message = excluded.error_message,
                        last_synced_at = COALESCE(excluded.last_synced_at, sync_records.last_synced_at),
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![
                        marketplace,
                        resource_type,
                        local_id,
                        variant,
                        remote_id,
                        remote_secondary_id,
                        status,
                        error_message,
                        last_synced_at,
                        created_at,
                        updated_at
                    ],
                )?;

                let stored = conn.query_row(
                    &format!(
                        "SELECT {} FROM sync_records
                         WHERE marketplace = ?1 AND resource_type = ?2 AND local_id = ?3 AND variant = ?4",
                        SYNC_RECORD_COLUMNS
                    ),
                    rusqlite::params![marketplace, resource_type, local_id, variant],
                    row_to_sync_record,
                )?;

                Ok(stored)
            })
            .await
            .map_err(map_constraint)
    }

    async fn get_sync_record(
        &self,
        marketplace: &str,
        resource_type: ResourceType,
        local_id: i64,
        variant: &str,
    ) -> Result<Option<SyncRecord>, DbError> {
        let marketplace = marketplace.to_string();
        let resource_type = resource_type.to_string();
        let variant = variant.to_string();

        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM sync_records
                             WHERE marketplace = ?1 AND resource_type = ?2 AND local_id = ?3 AND variant = ?4",
                            SYNC_RECORD_COLUMNS
                        ),
                        rusqlite::params![marketplace, resource_type, local_id, variant],
                        row_to_sync_record,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn find_sync_record_by_remote_id(
        &self,
        marketplace: &str,
        resource_type: ResourceType,
        remote_id: &str,
    ) -> Result<Option<SyncRecord>, DbError> {
        let marketplace = marketplace.to_string();
        let resource_type = resource_type.to_string();
        let remote_id = remote_id.to_string();

        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM sync_records
                             WHERE marketplace = ?1 AND resource_type = ?2 AND remote_id = ?3",
                            SYNC_RECORD_COLUMNS
                        ),
                        rusqlite::params![marketplace, resource_type, remote_id],
                        row_to_sync_record,
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn list_sync_records(
        &self,
        filter: &SyncRecordFilter,
    ) -> Result<Vec<SyncRecord>, DbError> {
        let marketplace = filter.marketplace.clone();
        let resource_type = filter.resource_type.map(|rt| rt.to_string());
        let status = filter.status.map(|s| s.to_string());
        let limit = if filter.limit == 0 {
            -1
        } else {
            i64::from(filter.limit)
        };

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sync_records
                     WHERE (?1 IS NULL OR marketplace = ?1)
                       AND (?2 IS NULL OR resource_type = ?2)
                       AND (?3 IS NULL OR status = ?3)
                     ORDER BY updated_at DESC, id DESC
                     LIMIT ?4",
                    SYNC_RECORD_COLUMNS
                ))?;

                let records = stmt
                    .query_map(
                        rusqlite::params![marketplace, resource_type, status, limit],
                        row_to_sync_record,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(records)
            })
            .await
            .map_err(Into::into)
    }

    async fn unlink_sync_record(
        &self,
        marketplace: &str,
        resource_type: ResourceType,
        local_id: i64,
        variant: &str,
    ) -> Result<(), DbError> {
        let marketplace = marketplace.to_string();
        let resource_type = resource_type.to_string();
        let variant = variant.to_string();

        let rows_affected = self
            .conn
            .call(move |conn| {
                let count = conn.execute(
                    r#"
                    DELETE FROM sync_records
                    WHERE marketplace = ?1 AND resource_type = ?2 AND local_id = ?3 AND variant = ?4
                    "#,
                    rusqlite::params![marketplace, resource_type, local_id, variant],
                )?;
                Ok(count)
            })
            .await?;

        if rows_affected == 0 {
            return Err(DbError::NotFound);
        }

        Ok(())
    }

    // =========================================================================
    // Sync log operations
    // =========================================================================

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<i64, DbError> {
        let request_id = entry.request_id.clone();
        let marketplace = entry.marketplace.clone();
        let action = entry.action.clone();
        let status = entry.status.to_string();
        let message = entry.message.clone();
        let http_status = entry.http_status;
        let details = if entry.details.is_null() {
            None
        } else {
            Some(entry.details.to_string())
        };
        let created_at = entry.created_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO sync_logs
                    (request_id, marketplace, action, status, message, http_status, details, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        request_id,
                        marketplace,
                        action,
                        status,
                        message,
                        http_status,
                        details,
                        created_at
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Into::into)
    }

    async fn get_sync_logs(&self, limit: u32, offset: u32) -> Result<Vec<SyncLogEntry>, DbError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, request_id, marketplace, action, status, message, http_status, details, created_at
                    FROM sync_logs
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?1 OFFSET ?2
                    "#,
                )?;

                let logs = stmt
                    .query_map(rusqlite::params![limit, offset], |row| {
                        Ok(SyncLogEntry {
                            id: row.get(0)?,
                            request_id: row.get(1)?,
                            marketplace: row.get(2)?,
                            action: row.get(3)?,
                            status: parse_enum(4, row.get(4)?)?,
                            message: row.get(5)?,
                            http_status: row.get(6)?,
                            details: row
                                .get::<_, Option<String>>(7)?
                                .and_then(|s| serde_json::from_str(&s).ok())
                                .unwrap_or(serde_json::Value::Null),
                            created_at: parse_datetime(row.get::<_, Option<String>>(8)?)
                                .unwrap_or_else(Utc::now),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(logs)
            })
            .await
            .map_err(Into::into)
    }

    async fn get_sync_logs_count(&self) -> Result<u64, DbError> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM sync_logs", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Into::into)
    }

    // =========================================================================
    // Settings operations
    // =========================================================================

    async fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let key = key.to_string();

        self.conn
            .call(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM settings WHERE key = ?1", [&key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Into::into)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let key = key.to_string();
        let value = value.to_string();
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![key, value, updated_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<(), DbError> {
        let key = key.to_string();

        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM settings WHERE key = ?1", [&key])?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // =========================================================================
    // Catalog and order operations
    // =========================================================================

    async fn get_product(&self, id: i64) -> Result<Option<LocalProduct>, DbError> {
        self.conn
            .call(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, sku, title, description, price, quantity, image_urls, updated_at
                        FROM products
                        WHERE id = ?1
                        "#,
                        [id],
                        |row| {
                            Ok(LocalProduct {
                                id: row.get(0)?,
                                sku: row.get(1)?,
                                title: row.get(2)?,
                                description: row.get(3)?,
                                price: parse_decimal(4, row.get(4)?)?,
                                quantity: row.get(5)?,
                                image_urls: serde_json::from_str(&row.get::<_, String>(6)?)
                                    .unwrap_or_default(),
                                updated_at: parse_datetime(row.get::<_, Option<String>>(7)?)
                                    .unwrap_or_else(Utc::now),
                            })
                        },
                    )
                    .optional()?;
                Ok(result)
            })
            .await
            .map_err(Into::into)
    }

    async fn upsert_product(&self, product: &LocalProduct) -> Result<(), DbError> {
        let id = product.id;
        let sku = product.sku.clone();
        let title = product.title.clone();
        let description = product.description.clone();
        let price = product.price.to_string();
        let quantity = product.quantity;
        let image_urls = serde_json::to_string(&product.image_urls)
            .map_err(|e| DbError::InvalidValue(e.to_string()))?;
        let updated_at = product.updated_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO products
                    (id, sku, title, description, price, quantity, image_urls, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    rusqlite::params![
                        id,
                        sku,
                        title,
                        description,
                        price,
                        quantity,
                        image_urls,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn insert_imported_order(
        &self,
        order: &NewOrder,
        synced_at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let order = order.clone();
        let synced_at = synced_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                tx.execute(
                    r#"
                    INSERT INTO orders
                    (marketplace, remote_id, status, remote_status, buyer_name, buyer_email, currency,
                     subtotal, shipping, tax, total, placed_at, imported_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                    rusqlite::params![
                        order.marketplace,
                        order.remote_id,
                        order.status.to_string(),
                        order.remote_status,
                        order.buyer_name,
                        order.buyer_email,
                        order.currency,
                        order.subtotal.to_string(),
                        order.shipping.to_string(),
                        order.tax.to_string(),
                        order.total.to_string(),
                        order.placed_at.to_rfc3339(),
                        synced_at
                    ],
                )?;
                let order_id = tx.last_insert_rowid();

                for item in &order.items {
                    tx.execute(
                        r#"
                        INSERT INTO order_items
                        (order_id, remote_item_id, sku, title, quantity, unit_price)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                        rusqlite::params![
                            order_id,
                            item.remote_item_id,
                            item.sku,
                            item.title,
                            item.quantity,
                            item.unit_price.to_string()
                        ],
                    )?;
                }

                tx.execute(
                    r#"
                    INSERT INTO sync_records
                    (marketplace, resource_type, local_id, variant, remote_id, status,
                     last_synced_at, created_at, updated_at)
                    VALUES (?1, ?2, ?3, '', ?4, 'synced', ?5, ?5, ?5)
                    "#,
                    rusqlite::params![
                        order.marketplace,
                        ResourceType::Order.to_string(),
                        order_id,
                        order.remote_id,
                        synced_at
                    ],
                )?;

                tx.commit()?;
                Ok(order_id)
            })
            .await
            .map_err(map_constraint)
    }

    async fn get_order(&self, id: i64) -> Result<Option<LocalOrder>, DbError> {
        self.conn
            .call(move |conn| {
                let order = conn
                    .query_row(
                        r#"
                        SELECT id, marketplace, remote_id, status, buyer_name, buyer_email, currency,
                               subtotal, shipping, tax, total, placed_at, imported_at
                        FROM orders
                        WHERE id = ?1
                        "#,
                        [id],
                        |row| {
                            Ok(LocalOrder {
                                id: row.get(0)?,
                                marketplace: row.get(1)?,
                                remote_id: row.get(2)?,
                                status: parse_enum(3, row.get(3)?)?,
                                buyer_name: row.get(4)?,
                                buyer_email: row.get(5)?,
                                currency: row.get(6)?,
                                subtotal: parse_decimal(7, row.get(7)?)?,
                                shipping: parse_decimal(8, row.get(8)?)?,
                                tax: parse_decimal(9, row.get(9)?)?,
                                total: parse_decimal(10, row.get(10)?)?,
                                placed_at: parse_datetime(row.get::<_, Option<String>>(11)?)
                                    .unwrap_or_else(Utc::now),
                                imported_at: parse_datetime(row.get::<_, Option<String>>(12)?)
                                    .unwrap_or_else(Utc::now),
                                items: Vec::new(),
                            })
                        },
                    )
                    .optional()?;

                let Some(mut order) = order else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    r#"
                    SELECT remote_item_id, sku, title, quantity, unit_price
                    FROM order_items
                    WHERE order_id = ?1
                    ORDER BY id
                    "#,
                )?;
                order.items = stmt
                    .query_map([id], |row| {
                        Ok(NewOrderItem {
                            remote_item_id: row.get(0)?,
                            sku: row.get(1)?,
                            title: row.get(2)?,
                            quantity: row.get(3)?,
                            unit_price: parse_decimal(4, row.get(4)?)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Some(order))
            })
            .await
            .map_err(Into::into)
    }
}

fn row_to_sync_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
    Ok(SyncRecord {
        id: row.get(0)?,
        marketplace: row.get(1)?,
        resource_type: parse_enum(2, row.get(2)?)?,
        local_id: row.get(3)?,
        variant: row.get(4)?,
        remote_id: row.get(5)?,
        remote_secondary_id: row.get(6)?,
        status: parse_enum(7, row.get(7)?)?,
        error_message: row.get(8)?,
        last_synced_at: parse_datetime(row.get::<_, Option<String>>(9)?),
        created_at: parse_datetime(row.get::<_, Option<String>>(10)?).unwrap_or_else(Utc::now),
        updated_at: parse_datetime(row.get::<_, Option<String>>(11)?).unwrap_or_else(Utc::now),
    })
}

/// Map a unique-constraint failure to `DbError::ConstraintViolation`
fn map_constraint(err: tokio_rusqlite::Error) -> DbError {
    match &err {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => err.into(),
    }
}

/// Parse a stored enum column
fn parse_enum<T>(idx: usize, s: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    s.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Parse a stored decimal column
fn parse_decimal(idx: usize, s: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a datetime string to DateTime<Utc>
fn parse_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| {
                // SQLite's CURRENT_TIMESTAMP format
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                    .ok()
                    .map(|dt| dt.and_utc())
            })
    })
}
