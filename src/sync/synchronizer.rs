//! Reconciliation of local products and remote orders
//!
//! [`MarketplaceSynchronizer`] drives one marketplace connection. Products
//! are pushed as listings (looked up, created or updated, then published if
//! needed) and their link is kept in `sync_records`. Orders are pulled page by
//! page after a stored watermark, deduplicated against the order records and
//! inserted together with their line items.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::database::Database;
use crate::error::{DbError, RetryableError, SyncError};
use crate::models::{
    ImportResult, LocalProduct, LogStatus, NewOrder, ResourceType, SyncAction, SyncLogEntry,
    SyncRecord, SyncResult,
};
use crate::otel::SyncMetrics;
use crate::plugins::marketplace::{MarketplaceAdapter, PageCursor, RemoteListing};
use crate::sync::http_client::ApiClient;
use crate::sync::log::SyncLogger;

/// Settings key holding the order import watermark of a marketplace
pub fn watermark_key(marketplace: &str) -> String {
    format!("{}.orders_watermark", marketplace)
}

/// Settings key holding the position of an unfinished order import
pub fn checkpoint_key(marketplace: &str) -> String {
    format!("{}.orders_checkpoint", marketplace)
}

/// Progress of an order import that stopped before the last page
///
/// Only valid for passes starting at the same `since`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ImportCheckpoint {
    since: DateTime<Utc>,
    cursor: PageCursor,
    newest: Option<DateTime<Utc>>,
    earliest_failure: Option<DateTime<Utc>>,
    unplaced_failure: bool,
}

/// Result of importing one raw order
enum OrderOutcome {
    Imported(DateTime<Utc>),
    Skipped(DateTime<Utc>),
}

/// Failure importing one raw order
struct OrderFailure {
    placed_at: Option<DateTime<Utc>>,
    error: SyncError,
}

/// Failure pushing a listing, with the remote id if one is already known
struct ListingFailure {
    remote_id: Option<String>,
    error: SyncError,
}

impl ListingFailure {
    fn linked(listing: &RemoteListing, error: SyncError) -> Self {
        Self {
            remote_id: Some(listing.remote_id.clone()),
            error,
        }
    }
}

impl From<SyncError> for ListingFailure {
    fn from(error: SyncError) -> Self {
        Self {
            remote_id: None,
            error,
        }
    }
}

/// Synchronizer for one marketplace connection
pub struct MarketplaceSynchronizer {
    api: ApiClient,
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    logger: SyncLogger,
    metrics: Option<Arc<SyncMetrics>>,
}

impl MarketplaceSynchronizer {
    /// Create a synchronizer around an executor
    pub fn new(api: ApiClient, db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            logger: SyncLogger::new(db.clone()),
            db,
            clock,
            metrics: None,
        }
    }

    /// Record operation outcomes into shared metrics
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.api = self.api.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Marketplace name
    pub fn marketplace(&self) -> &'static str {
        self.api.marketplace()
    }

    /// Interval between scheduled order imports
    pub fn order_import_interval(&self) -> std::time::Duration {
        self.adapter().target().order_import_interval
    }

    fn adapter(&self) -> &dyn MarketplaceAdapter {
        self.api.adapter().as_ref()
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Create or update the remote listing of a local product
    ///
    /// Re-running for an unchanged product is safe: the existing listing is
    /// found and updated in place. On failure the record is marked `error` and
    /// previously stored remote ids are kept.
    pub async fn sync_product(&self, local_id: i64) -> SyncResult {
        let mp = self.marketplace();
        let request_id = uuid::Uuid::new_v4().to_string();

        let product = match self.db.get_product(local_id).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                let error = SyncError::InvalidData(format!("product {} not found", local_id));
                return self
                    .finish(SyncAction::SyncProduct, &request_id, SyncResult::failed(mp, local_id, None, error))
                    .await;
            }
            Err(e) => {
                return self
                    .finish(SyncAction::SyncProduct, &request_id, SyncResult::failed(mp, local_id, None, e.into()))
                    .await;
            }
        };

        let existing = match self
            .db
            .get_sync_record(mp, ResourceType::Product, local_id, "")
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                return self
                    .finish(SyncAction::SyncProduct, &request_id, SyncResult::failed(mp, local_id, None, e.into()))
                    .await;
            }
        };
        let known_remote_id = existing.as_ref().and_then(|r| r.remote_id.clone());

        if let Err(e) = self
            .db
            .upsert_sync_record(&SyncRecord::new(mp, ResourceType::Product, local_id))
            .await
        {
            return self
                .finish(
                    SyncAction::SyncProduct,
                    &request_id,
                    SyncResult::failed(mp, local_id, known_remote_id, e.into()),
                )
                .await;
        }

        let sku = product.effective_sku(&self.adapter().target().sku_prefix);
        let outcome = self
            .push_listing(local_id, &product, &sku, existing.as_ref())
            .await;

        let result = match outcome {
            Ok((listing, created)) => {
                let mut record = SyncRecord::new(mp, ResourceType::Product, local_id)
                    .with_remote_id(listing.remote_id.clone())
                    .synced(self.clock.now());
                record.remote_secondary_id = listing.secondary_id.clone();

                match self.db.upsert_sync_record(&record).await {
                    Ok(_) => SyncResult::synced(mp, local_id, Some(listing.remote_id), created),
                    Err(e) => {
                        let error = SyncError::from(e);
                        self.mark_failed(
                            ResourceType::Product,
                            local_id,
                            Some(listing.remote_id.as_str()),
                            &error,
                        )
                        .await;
                        SyncResult::failed(mp, local_id, Some(listing.remote_id), error)
                    }
                }
            }
            Err(failure) => {
                let remote_id = failure.remote_id.or(known_remote_id);
                self.mark_failed(ResourceType::Product, local_id, remote_id.as_deref(), &failure.error)
                    .await;
                SyncResult::failed(mp, local_id, remote_id, failure.error)
            }
        };

        self.finish(SyncAction::SyncProduct, &request_id, result).await
    }

    async fn push_listing(
        &self,
        local_id: i64,
        product: &LocalProduct,
        sku: &str,
        existing: Option<&SyncRecord>,
    ) -> Result<(RemoteListing, bool), ListingFailure> {
        let adapter = self.adapter();

        let found = match adapter.find_listing_request(sku, existing) {
            Some(request) => {
                let response = self.api.request(&request).await?;
                if response.is_not_found() {
                    None
                } else {
                    adapter.parse_found_listing(&response.body)?
                }
            }
            None => None,
        };

        if let Some(request) = adapter.prepare_listing_request(product, sku) {
            self.api.request(&request).await?;
        }

        let (mut listing, created) = match found {
            Some(listing) => {
                let updated = async {
                    let request = adapter.update_listing_request(product, sku, &listing)?;
                    let response = self.api.request(&request).await?;
                    adapter.validate_listing_response(&response.body)
                }
                .await;
                updated.map_err(|error| ListingFailure::linked(&listing, error))?;
                (listing, false)
            }
            None => {
                let request = adapter.create_listing_request(product, sku)?;
                let response = self.api.request(&request).await?;
                let listing = adapter.parse_created_listing(&response.body, sku)?;

                // Link before anything else can fail, so a retry finds this listing
                let mut record = SyncRecord::new(self.marketplace(), ResourceType::Product, local_id)
                    .with_remote_id(listing.remote_id.clone());
                record.remote_secondary_id = listing.secondary_id.clone();
                self.db
                    .upsert_sync_record(&record)
                    .await
                    .map_err(|e| ListingFailure::linked(&listing, e.into()))?;
                (listing, true)
            }
        };

        if !listing.published {
            if let Some(request) = adapter.publish_request(&listing) {
                let response = self
                    .api
                    .request(&request)
                    .await
                    .map_err(|error| ListingFailure::linked(&listing, error))?;
                listing = adapter.parse_published(&response.body, &listing);
            }
        }

        if listing.secondary_id.is_none() {
            listing.secondary_id = existing.and_then(|r| r.remote_secondary_id.clone());
        }

        Ok((listing, created))
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Push a new quantity for an already linked product
    ///
    /// Returns a `NotLinked` failure, without touching the record, when the
    /// product has never been synced.
    pub async fn sync_inventory(&self, local_id: i64, quantity: i64) -> SyncResult {
        let mp = self.marketplace();
        let request_id = uuid::Uuid::new_v4().to_string();

        let record = match self
            .db
            .get_sync_record(mp, ResourceType::Product, local_id, "")
            .await
        {
            Ok(Some(record)) if record.is_linked() => record,
            Ok(other) => {
                let remote_id = other.and_then(|r| r.remote_id);
                let error = SyncError::NotLinked { local_id };
                return self
                    .finish(SyncAction::SyncInventory, &request_id, SyncResult::failed(mp, local_id, remote_id, error))
                    .await;
            }
            Err(e) => {
                return self
                    .finish(SyncAction::SyncInventory, &request_id, SyncResult::failed(mp, local_id, None, e.into()))
                    .await;
            }
        };

        let prefix = &self.adapter().target().sku_prefix;
        let product = match self.db.get_product(local_id).await {
            Ok(product) => product,
            Err(e) => {
                warn!(marketplace = %mp, local_id, error = %e, "Product lookup failed, using fallback SKU");
                None
            }
        };
        let (sku, price) = match &product {
            Some(product) => (product.effective_sku(prefix), Some(product.price)),
            None => (format!("{}{}", prefix, local_id), None),
        };

        let outcome = async {
            let request = self
                .adapter()
                .inventory_request(&record, &sku, quantity, price)?;
            self.api.request(&request).await
        }
        .await;

        let result = match outcome {
            Ok(_) => match self
                .db
                .upsert_sync_record(&record.clone().synced(self.clock.now()))
                .await
            {
                Ok(_) => SyncResult::synced(mp, local_id, record.remote_id.clone(), false),
                Err(e) => SyncResult::failed(mp, local_id, record.remote_id.clone(), e.into()),
            },
            Err(error) => {
                self.mark_failed(ResourceType::Product, local_id, None, &error).await;
                SyncResult::failed(mp, local_id, record.remote_id.clone(), error)
            }
        };

        self.finish(SyncAction::SyncInventory, &request_id, result).await
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Import orders created after `since`, or after the stored watermark
    ///
    /// Pages are fetched in sequence. A failing order is reported in the
    /// result and never stops the pass; a failing page ends it. A pass that
    /// stops early stores its position and the next pass with the same start
    /// resumes from there. The watermark only advances once the last page
    /// was read.
    pub async fn import_orders(&self, since: Option<DateTime<Utc>>) -> Result<ImportResult, SyncError> {
        let mp = self.marketplace();
        let request_id = uuid::Uuid::new_v4().to_string();
        let checkpoint = self.stored_checkpoint().await;
        let since = match (since, &checkpoint) {
            (Some(since), _) => since,
            (None, Some(checkpoint)) => checkpoint.since,
            (None, None) => self.stored_watermark().await?,
        };
        let checkpoint = checkpoint.filter(|c| c.since == since);
        let resumed = checkpoint.is_some();

        info!(marketplace = %mp, since = %since.to_rfc3339(), resumed, "Importing orders");

        let mut result = ImportResult::default();
        let mut newest: Option<DateTime<Utc>> = None;
        let mut earliest_failure: Option<DateTime<Utc>> = None;
        let mut unplaced_failure = false;
        let mut cursor: Option<PageCursor> = None;
        if let Some(checkpoint) = checkpoint {
            newest = checkpoint.newest;
            earliest_failure = checkpoint.earliest_failure;
            unplaced_failure = checkpoint.unplaced_failure;
            cursor = Some(checkpoint.cursor);
        }
        let mut complete = false;
        let mut page_failed = false;
        let mut stale_cursor = false;
        let max_pages = self.adapter().target().max_pages.max(1);

        for page_number in 0..max_pages {
            let request = self.adapter().order_page_request(since, cursor.as_ref());
            let page = match self.api.request(&request).await.and_then(|response| {
                self.adapter()
                    .parse_order_page(&response.body, cursor.as_ref())
            }) {
                Ok(page) => page,
                Err(error) => {
                    warn!(marketplace = %mp, page = page_number, error = %error, "Order page failed");
                    // A stored cursor the marketplace no longer accepts
                    stale_cursor = resumed && page_number == 0 && !error.is_retryable();
                    result.push_error(None, error);
                    page_failed = true;
                    break;
                }
            };

            for raw in &page.orders {
                match self.import_order(raw).await {
                    Ok(OrderOutcome::Imported(placed_at)) => {
                        result.imported += 1;
                        newest = newest.max(Some(placed_at));
                    }
                    Ok(OrderOutcome::Skipped(placed_at)) => {
                        result.skipped += 1;
                        newest = newest.max(Some(placed_at));
                    }
                    Err(failure) => {
                        let remote_id = self.adapter().order_remote_id(raw);
                        warn!(
                            marketplace = %mp,
                            remote_id = ?remote_id,
                            error = %failure.error,
                            "Order import failed"
                        );
                        match failure.placed_at {
                            Some(at) => {
                                earliest_failure =
                                    Some(earliest_failure.map_or(at, |e| e.min(at)));
                            }
                            None => unplaced_failure = true,
                        }
                        result.push_error(remote_id, failure.error);
                    }
                }
            }

            match page.next {
                Some(next) if !page.orders.is_empty() => cursor = Some(next),
                _ => {
                    complete = true;
                    break;
                }
            }
        }

        if !complete && !page_failed {
            warn!(marketplace = %mp, max_pages, "Page limit reached, remaining orders deferred");
        }

        let deferred = !complete && !stale_cursor && cursor.is_some();
        let checkpoint_update = if deferred {
            cursor.clone().map(|cursor| ImportCheckpoint {
                since,
                cursor,
                newest,
                earliest_failure,
                unplaced_failure,
            })
        } else {
            None
        };
        if deferred || complete || stale_cursor {
            self.store_checkpoint(checkpoint_update.as_ref()).await;
        }

        let watermark = next_watermark(since, newest, earliest_failure, complete && !unplaced_failure);
        if watermark > since {
            if let Err(e) = self
                .db
                .set_setting(&watermark_key(mp), &watermark.to_rfc3339())
                .await
            {
                warn!(marketplace = %mp, error = %e, "Failed to store order watermark");
            }
        }
        result.watermark = Some(watermark);

        let status = if result.errors.is_empty() {
            LogStatus::Success
        } else if result.imported + result.skipped > 0 {
            LogStatus::Warning
        } else {
            LogStatus::Error
        };
        let failures: Vec<_> = result
            .errors
            .iter()
            .map(|f| json!({ "remote_id": f.remote_id, "error": f.error.to_string() }))
            .collect();
        self.logger
            .append(
                SyncLogEntry::new(&request_id, mp, SyncAction::ImportOrders, status, result.to_string())
                    .with_details(json!({
                        "since": since.to_rfc3339(),
                        "imported": result.imported,
                        "skipped": result.skipped,
                        "failures": failures,
                        "watermark": watermark.to_rfc3339(),
                        "resumed": resumed,
                        "deferred": deferred,
                    })),
            )
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(mp, SyncAction::ImportOrders.as_str(), status.as_str());
        }

        info!(
            marketplace = %mp,
            imported = result.imported,
            skipped = result.skipped,
            errors = result.errors.len(),
            "Order import finished"
        );
        Ok(result)
    }

    async fn import_order(&self, raw: &serde_json::Value) -> Result<OrderOutcome, OrderFailure> {
        let adapter = self.adapter();
        let mp = self.marketplace();

        let mut order = adapter.parse_order(raw).map_err(|error| OrderFailure {
            placed_at: None,
            error,
        })?;
        let placed_at = order.placed_at;
        let fail = |error: SyncError| OrderFailure {
            placed_at: Some(placed_at),
            error,
        };

        let known = self
            .db
            .find_sync_record_by_remote_id(mp, ResourceType::Order, &order.remote_id)
            .await
            .map_err(|e| fail(e.into()))?;
        if known.is_some() {
            return Ok(OrderOutcome::Skipped(placed_at));
        }

        if order.items.is_none() {
            if let Some(request) = adapter.order_items_request(&order) {
                let response = self.api.request(&request).await.map_err(fail)?;
                adapter
                    .apply_order_items(&mut order, &response.body)
                    .map_err(fail)?;
            }
        }

        let new_order = NewOrder {
            marketplace: mp.to_string(),
            status: adapter.map_order_status(&order.status),
            remote_id: order.remote_id,
            remote_status: order.status,
            buyer_name: order.buyer_name,
            buyer_email: order.buyer_email,
            currency: order.currency,
            subtotal: order.subtotal,
            shipping: order.shipping,
            tax: order.tax,
            total: order.total,
            placed_at,
            items: order.items.unwrap_or_default(),
        };

        match self
            .db
            .insert_imported_order(&new_order, self.clock.now())
            .await
        {
            Ok(_) => Ok(OrderOutcome::Imported(placed_at)),
            // Recorded concurrently by another pass
            Err(DbError::ConstraintViolation(_)) => Ok(OrderOutcome::Skipped(placed_at)),
            Err(e) => Err(fail(e.into())),
        }
    }

    async fn stored_checkpoint(&self) -> Option<ImportCheckpoint> {
        let mp = self.marketplace();
        let raw = match self.db.get_setting(&checkpoint_key(mp)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(marketplace = %mp, error = %e, "Failed to read order import checkpoint");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(marketplace = %mp, error = %e, "Ignoring unparsable order import checkpoint");
                None
            }
        }
    }

    /// Store or clear the resume position of the order import
    async fn store_checkpoint(&self, checkpoint: Option<&ImportCheckpoint>) {
        let mp = self.marketplace();
        let key = checkpoint_key(mp);
        let stored = match checkpoint {
            Some(checkpoint) => match serde_json::to_string(checkpoint) {
                Ok(raw) => self.db.set_setting(&key, &raw).await,
                Err(e) => {
                    warn!(marketplace = %mp, error = %e, "Failed to encode order import checkpoint");
                    return;
                }
            },
            None => self.db.delete_setting(&key).await,
        };
        if let Err(e) = stored {
            warn!(marketplace = %mp, error = %e, "Failed to store order import checkpoint");
        }
    }

    async fn stored_watermark(&self) -> Result<DateTime<Utc>, SyncError> {
        let fallback = self.clock.now()
            - Duration::days(self.adapter().target().order_lookback_days.max(0));

        match self.db.get_setting(&watermark_key(self.marketplace())).await? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Ok(at.with_timezone(&Utc)),
                Err(e) => {
                    warn!(
                        marketplace = %self.marketplace(),
                        value = %raw,
                        error = %e,
                        "Ignoring unparsable order watermark"
                    );
                    Ok(fallback)
                }
            },
            None => Ok(fallback),
        }
    }

    // =========================================================================
    // Unlink
    // =========================================================================

    /// Remove the link between a local entity and its remote counterpart
    pub async fn unlink(&self, resource_type: ResourceType, local_id: i64) -> Result<(), SyncError> {
        let mp = self.marketplace();
        match self
            .db
            .unlink_sync_record(mp, resource_type, local_id, "")
            .await
        {
            Ok(()) => {
                let request_id = uuid::Uuid::new_v4().to_string();
                self.logger
                    .record(
                        &request_id,
                        mp,
                        SyncAction::Unlink,
                        LogStatus::Success,
                        format!("{} {} unlinked", resource_type, local_id),
                        json!({ "resource_type": resource_type.as_str(), "local_id": local_id }),
                    )
                    .await;
                Ok(())
            }
            Err(DbError::NotFound) => Err(SyncError::NotLinked { local_id }),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn mark_failed(
        &self,
        resource_type: ResourceType,
        local_id: i64,
        remote_id: Option<&str>,
        error: &SyncError,
    ) {
        let mut record =
            SyncRecord::new(self.marketplace(), resource_type, local_id).failed(error.to_string());
        record.remote_id = remote_id.map(str::to_string);
        if let Err(e) = self.db.upsert_sync_record(&record).await {
            warn!(
                marketplace = %self.marketplace(),
                local_id,
                error = %e,
                "Failed to store sync error status"
            );
        }
    }

    async fn finish(&self, action: SyncAction, request_id: &str, result: SyncResult) -> SyncResult {
        let status = if result.is_success() {
            LogStatus::Success
        } else {
            LogStatus::Error
        };

        match &result.error {
            None => info!(
                marketplace = %result.marketplace,
                local_id = result.local_id,
                remote_id = ?result.remote_id,
                created = result.created,
                action = %action,
                "Sync succeeded"
            ),
            Some(error) => warn!(
                marketplace = %result.marketplace,
                local_id = result.local_id,
                action = %action,
                error = %error,
                "Sync failed"
            ),
        }

        self.logger
            .append(
                SyncLogEntry::new(request_id, &result.marketplace, action, status, result.to_string())
                    .with_details(json!({
                        "local_id": result.local_id,
                        "remote_id": result.remote_id,
                        "created": result.created,
                    })),
            )
            .await;
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(&result.marketplace, action.as_str(), result.status.as_str());
        }

        result
    }
}

/// Watermark for the next pass
///
/// Advances to the newest order seen, but never past an order that failed,
/// and not at all when the pass did not read every page.
fn next_watermark(
    since: DateTime<Utc>,
    newest: Option<DateTime<Utc>>,
    earliest_failure: Option<DateTime<Utc>>,
    complete: bool,
) -> DateTime<Utc> {
    if !complete {
        return since;
    }
    let mut candidate = match newest {
        Some(newest) => newest,
        None => return since,
    };
    if let Some(failed_at) = earliest_failure {
        candidate = candidate.min(failed_at - Duration::seconds(1));
    }
    candidate.max(since)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RetryConfig;
    use crate::database::SqliteDatabase;
    use crate::models::{Credential, LocalProduct, MarketplaceKind, SyncStatus, SyncTarget};
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn setup(server: &MockServer) -> (MarketplaceSynchronizer, Arc<dyn Database>) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 7200
            })))
            .mount(server)
            .await;

        let mut target = SyncTarget::new(MarketplaceKind::Ebay);
        target.api_base_url = server.uri();
        target.token_url = format!("{}/oauth/token", server.uri());
        target.retry = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
            rate_limit_multiplier: 2,
        };
        for key in ["fulfillment_policy_id", "payment_policy_id", "return_policy_id"] {
            target.options.insert(key.to_string(), "P".to_string());
        }
        target.options.insert("category_id".to_string(), "1".to_string());
        target
            .options
            .insert("merchant_location_key".to_string(), "WH".to_string());

        let db: Arc<dyn Database> = Arc::new(SqliteDatabase::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(at("2024-03-10T00:00:00Z")));
        let api = ApiClient::connect(
            target,
            Credential::new("id", Some("secret".to_string()), "refresh"),
            db.clone(),
            clock.clone(),
        );
        (MarketplaceSynchronizer::new(api, db.clone(), clock), db)
    }

    // Test 1: Watermark stays before the earliest failure
    #[test]
    fn test_next_watermark() {
        let since = at("2024-03-01T00:00:00Z");
        let newest = Some(at("2024-03-05T00:00:00Z"));

        assert_eq!(next_watermark(since, newest, None, true), at("2024-03-05T00:00:00Z"));
        assert_eq!(
            next_watermark(since, newest, Some(at("2024-03-03T00:00:00Z")), true),
            at("2024-03-02T23:59:59Z")
        );
        assert_eq!(next_watermark(since, newest, None, false), since);
        assert_eq!(next_watermark(since, None, None, true), since);
        assert_eq!(
            next_watermark(since, newest, Some(since), true),
            since
        );
    }

    // Test 2: Missing product fails without creating a record
    #[tokio::test]
    async fn test_sync_product_missing_product() {
        let server = MockServer::start().await;
        let (sync, db) = setup(&server).await;

        let result = sync.sync_product(99).await;
        assert!(matches!(result.error, Some(SyncError::InvalidData(_))));
        assert!(db
            .get_sync_record("ebay", ResourceType::Product, 99, "")
            .await
            .unwrap()
            .is_none());
    }

    // Test 3: Inventory sync requires a linked record
    #[tokio::test]
    async fn test_sync_inventory_not_linked() {
        let server = MockServer::start().await;
        let (sync, db) = setup(&server).await;

        let result = sync.sync_inventory(5, 3).await;
        assert_eq!(result.error, Some(SyncError::NotLinked { local_id: 5 }));
        assert_eq!(result.status, SyncStatus::Error);
        assert!(db
            .get_sync_record("ebay", ResourceType::Product, 5, "")
            .await
            .unwrap()
            .is_none());
    }

    // Test 4: Inventory sync for a linked product
    #[tokio::test]
    async fn test_sync_inventory_linked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sell/inventory/v1/bulk_update_price_quantity"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"responses": []})))
            .expect(1)
            .mount(&server)
            .await;
        let (sync, db) = setup(&server).await;

        db.upsert_product(&LocalProduct::new(5, "Mug", dec!(9.99)).with_sku("MUG"))
            .await
            .unwrap();
        db.upsert_sync_record(
            &SyncRecord::new("ebay", ResourceType::Product, 5)
                .with_remote_id("O-5")
                .synced(at("2024-03-01T00:00:00Z")),
        )
        .await
        .unwrap();

        let result = sync.sync_inventory(5, 7).await;
        assert!(result.is_success(), "{}", result);
        assert_eq!(result.remote_id.as_deref(), Some("O-5"));

        let record = db
            .get_sync_record("ebay", ResourceType::Product, 5, "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.last_synced_at, Some(at("2024-03-10T00:00:00Z")));
    }

    // Test 5: Unlink removes the record; unlinking again is NotLinked
    #[tokio::test]
    async fn test_unlink() {
        let server = MockServer::start().await;
        let (sync, db) = setup(&server).await;
        db.upsert_sync_record(&SyncRecord::new("ebay", ResourceType::Product, 8).with_remote_id("O-8"))
            .await
            .unwrap();

        sync.unlink(ResourceType::Product, 8).await.unwrap();
        assert_eq!(
            sync.unlink(ResourceType::Product, 8).await,
            Err(SyncError::NotLinked { local_id: 8 })
        );
    }

    // Test 6: Stored watermark is used when no start is given
    #[tokio::test]
    async fn test_import_uses_stored_watermark() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/sell/fulfillment/v1/order$"))
            .and(wiremock::matchers::query_param(
                "filter",
                "creationdate:[2024-03-05T00:00:00.000Z..]",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": [], "total": 0})))
            .expect(1)
            .mount(&server)
            .await;
        let (sync, db) = setup(&server).await;
        db.set_setting("ebay.orders_watermark", "2024-03-05T00:00:00+00:00")
            .await
            .unwrap();

        let result = sync.import_orders(None).await.unwrap();
        assert_eq!(result.imported, 0);
        assert_eq!(result.watermark, Some(at("2024-03-05T00:00:00Z")));
    }

    // Test 7: A failing first page is reported, not raised
    #[tokio::test]
    async fn test_import_page_failure_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sell/fulfillment/v1/order"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;
        let (sync, _db) = setup(&server).await;

        let since = at("2024-03-01T00:00:00Z");
        let result = sync.import_orders(Some(since)).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].remote_id.is_none());
        assert_eq!(result.watermark, Some(since));
    }

    // Test 8: A stored cursor the marketplace rejects is discarded
    #[tokio::test]
    async fn test_import_discards_rejected_checkpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sell/fulfillment/v1/order"))
            .and(wiremock::matchers::query_param("offset", "40"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"errors": []})))
            .expect(1)
            .mount(&server)
            .await;
        let (sync, db) = setup(&server).await;

        let since = at("2024-03-01T00:00:00Z");
        let checkpoint = ImportCheckpoint {
            since,
            cursor: PageCursor::Offset(40),
            newest: Some(at("2024-03-02T00:00:00Z")),
            earliest_failure: None,
            unplaced_failure: false,
        };
        db.set_setting(
            &checkpoint_key("ebay"),
            &serde_json::to_string(&checkpoint).unwrap(),
        )
        .await
        .unwrap();

        let result = sync.import_orders(None).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.watermark, Some(since));
        assert!(db.get_setting(&checkpoint_key("ebay")).await.unwrap().is_none());
    }
}
