//! Database migrations for marketplace-sync
//!
//! This module contains SQL migrations for the SQLite database schema.
//! Timestamps are stored as RFC 3339 text and money as decimal text.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
-- Per-resource sync state
CREATE TABLE IF NOT EXISTS sync_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    marketplace TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    local_id INTEGER NOT NULL,
    variant TEXT NOT NULL DEFAULT '',
    remote_id TEXT,
    remote_secondary_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(marketplace, resource_type, local_id, variant)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_records_remote
    ON sync_records(marketplace, resource_type, remote_id)
    WHERE remote_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_sync_records_status ON sync_records(marketplace, status);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    marketplace TEXT NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT NOT NULL,
    http_status INTEGER,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_logs_time ON sync_logs(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_sync_logs_request ON sync_logs(request_id);

-- Flat key/value settings (rotated tokens, watermarks)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Local catalog
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY,
    sku TEXT,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    price TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 0,
    image_urls TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

-- Imported orders
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    marketplace TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    status TEXT NOT NULL,
    remote_status TEXT NOT NULL,
    buyer_name TEXT,
    buyer_email TEXT,
    currency TEXT NOT NULL,
    subtotal TEXT NOT NULL,
    shipping TEXT NOT NULL,
    tax TEXT NOT NULL,
    total TEXT NOT NULL,
    placed_at TEXT NOT NULL,
    imported_at TEXT NOT NULL,
    UNIQUE(marketplace, remote_id)
);

CREATE TABLE IF NOT EXISTS order_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
    remote_item_id TEXT,
    sku TEXT,
    title TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    unit_price TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
"#;

/// Get the migration version
pub fn migration_version() -> i32 {
    1
}
