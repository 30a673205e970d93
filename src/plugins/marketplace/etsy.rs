//! Etsy Open API v3 adapter
//!
//! Etsy is a public OAuth client: the refresh grant carries only the
//! keystring, and every grant returns a new refresh token that replaces the
//! old one. Listings are created as drafts and activated in a second call.
//! Receipts are paged by offset and carry money as `{amount, divisor}`.
//!
//! Options read from the target:
//! - `taxonomy_id` (default `1`)
//! - `who_made` (default `i_did`), `when_made` (default `made_to_order`)
//! - `shipping_profile_id`

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{
    json_string, ApiRequest, MarketplaceAdapter, OrderPage, PageCursor, RemoteListing,
    RemoteOrder, CLASS_INVENTORY, CLASS_LISTINGS, CLASS_ORDERS,
};
use crate::error::SyncError;
use crate::models::{
    Credential, LocalOrderStatus, LocalProduct, Money, NewOrderItem, SyncAction, SyncRecord,
    SyncTarget,
};

const API_BASE: &str = "/v3/application";

/// Etsy adapter
#[derive(Debug, Clone)]
pub struct EtsyAdapter {
    target: SyncTarget,
}

impl EtsyAdapter {
    /// Create an adapter for the given target
    pub fn new(target: SyncTarget) -> Self {
        Self { target }
    }

    fn shop_id(&self) -> &str {
        self.target.shop_id.as_deref().unwrap_or_default()
    }

    fn listing_path(&self, listing_id: &str) -> String {
        format!(
            "{}/shops/{}/listings/{}",
            API_BASE,
            self.shop_id(),
            urlencoding::encode(listing_id)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ReceiptList {
    #[serde(default)]
    count: Option<u32>,
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    receipt_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "created_timestamp")]
    create_timestamp: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    buyer_email: Option<String>,
    #[serde(default)]
    subtotal: Option<Value>,
    #[serde(default)]
    total_shipping_cost: Option<Value>,
    #[serde(default)]
    total_tax_cost: Option<Value>,
    #[serde(default)]
    grandtotal: Option<Value>,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(default)]
    transaction_id: Option<u64>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "one")]
    quantity: i64,
    #[serde(default)]
    price: Option<Value>,
}

fn one() -> i64 {
    1
}

impl MarketplaceAdapter for EtsyAdapter {
    fn target(&self) -> &SyncTarget {
        &self.target
    }

    fn auth_headers(&self, access_token: &str, credential: &Credential) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", access_token),
            ),
            ("x-api-key".to_string(), credential.client_id.clone()),
        ]
    }

    fn parse_money(&self, value: Option<&Value>) -> Result<Decimal, SyncError> {
        let value = match value {
            None | Some(Value::Null) => return Ok(Decimal::ZERO),
            Some(v) => v,
        };
        let amount = value.get("amount").and_then(Value::as_i64).unwrap_or(0);
        let divisor = value.get("divisor").and_then(Value::as_i64).unwrap_or(100);
        Money::new(amount, divisor).to_decimal()
    }

    fn map_order_status(&self, remote_status: &str) -> LocalOrderStatus {
        match remote_status.to_lowercase().as_str() {
            "open" | "payment processing" | "unpaid" => LocalOrderStatus::Pending,
            "paid" | "partially refunded" => LocalOrderStatus::Processing,
            "completed" => LocalOrderStatus::Shipped,
            "canceled" => LocalOrderStatus::Cancelled,
            "fully refunded" => LocalOrderStatus::Refunded,
            _ => LocalOrderStatus::Pending,
        }
    }

    fn find_listing_request(&self, _sku: &str, existing: Option<&SyncRecord>) -> Option<ApiRequest> {
        // Etsy has no SKU search; only a stored link can be looked up
        let listing_id = existing.and_then(|r| r.remote_id.as_deref())?;
        Some(
            ApiRequest::get(
                SyncAction::FindListing,
                CLASS_LISTINGS,
                format!("{}/listings/{}", API_BASE, urlencoding::encode(listing_id)),
            )
            .accept_not_found(),
        )
    }

    fn parse_found_listing(&self, body: &Value) -> Result<Option<RemoteListing>, SyncError> {
        let Some(listing_id) = json_string(body, "listing_id") else {
            return Ok(None);
        };
        let state = body.get("state").and_then(Value::as_str).unwrap_or("draft");
        if state == "removed" {
            return Ok(None);
        }
        Ok(Some(RemoteListing {
            remote_id: listing_id,
            secondary_id: None,
            published: state == "active",
        }))
    }

    fn create_listing_request(&self, product: &LocalProduct, sku: &str) -> Result<ApiRequest, SyncError> {
        if product.quantity < 1 {
            return Err(SyncError::InvalidData(
                "Etsy listings require a quantity of at least 1".to_string(),
            ));
        }

        let taxonomy_id: i64 = self
            .target
            .option("taxonomy_id")
            .unwrap_or("1")
            .parse()
            .map_err(|_| SyncError::InvalidData("taxonomy_id option must be numeric".to_string()))?;

        let mut body = json!({
            "quantity": product.quantity,
            "title": product.title,
            "description": product.description,
            "price": product.price.round_dp(2).to_string(),
            "who_made": self.target.option("who_made").unwrap_or("i_did"),
            "when_made": self.target.option("when_made").unwrap_or("made_to_order"),
            "taxonomy_id": taxonomy_id,
            "skus": [sku],
        });
        if let Some(profile) = self.target.option("shipping_profile_id") {
            body["shipping_profile_id"] = json!(profile);
        }

        Ok(ApiRequest::post(
            SyncAction::CreateListing,
            CLASS_LISTINGS,
            format!("{}/shops/{}/listings", API_BASE, self.shop_id()),
        )
        .with_body(body))
    }

    fn parse_created_listing(&self, body: &Value, _sku: &str) -> Result<RemoteListing, SyncError> {
        let listing_id = json_string(body, "listing_id").ok_or_else(|| {
            SyncError::InvalidData("create listing response missing listing_id".to_string())
        })?;
        Ok(RemoteListing {
            remote_id: listing_id,
            secondary_id: None,
            published: body.get("state").and_then(Value::as_str) == Some("active"),
        })
    }

    fn update_listing_request(
        &self,
        product: &LocalProduct,
        _sku: &str,
        listing: &RemoteListing,
    ) -> Result<ApiRequest, SyncError> {
        Ok(ApiRequest::patch(
            SyncAction::UpdateListing,
            CLASS_LISTINGS,
            self.listing_path(&listing.remote_id),
        )
        .with_body(json!({
            "title": product.title,
            "description": product.description,
        })))
    }

    fn publish_request(&self, listing: &RemoteListing) -> Option<ApiRequest> {
        Some(
            ApiRequest::patch(
                SyncAction::PublishListing,
                CLASS_LISTINGS,
                self.listing_path(&listing.remote_id),
            )
            .with_body(json!({ "state": "active" })),
        )
    }

    fn inventory_request(
        &self,
        record: &SyncRecord,
        sku: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<ApiRequest, SyncError> {
        let listing_id = record.remote_id.as_deref().ok_or(SyncError::NotLinked {
            local_id: record.local_id,
        })?;
        let price = price.ok_or_else(|| {
            SyncError::InvalidData(format!(
                "Etsy inventory updates need the product price; product {} not found",
                record.local_id
            ))
        })?;

        Ok(ApiRequest::put(
            SyncAction::UpdateInventory,
            CLASS_INVENTORY,
            format!("{}/listings/{}/inventory", API_BASE, urlencoding::encode(listing_id)),
        )
        .with_body(json!({
            "products": [{
                "sku": sku,
                "property_values": [],
                "offerings": [{
                    "price": price.round_dp(2).to_string(),
                    "quantity": quantity.max(0),
                    "is_enabled": quantity > 0,
                }]
            }]
        })))
    }

    fn order_page_request(&self, since: DateTime<Utc>, cursor: Option<&PageCursor>) -> ApiRequest {
        let offset = match cursor {
            Some(PageCursor::Offset(offset)) => *offset,
            _ => 0,
        };
        ApiRequest::get(
            SyncAction::FetchOrders,
            CLASS_ORDERS,
            format!("{}/shops/{}/receipts", API_BASE, self.shop_id()),
        )
        .with_query("min_created", since.timestamp().to_string())
        .with_query("sort_on", "created")
        .with_query("sort_order", "asc")
        .with_query("limit", self.target.page_size.to_string())
        .with_query("offset", offset.to_string())
    }

    fn parse_order_page(&self, body: &Value, cursor: Option<&PageCursor>) -> Result<OrderPage, SyncError> {
        let list: ReceiptList = serde_json::from_value(body.clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid receipt page: {}", e)))?;

        let offset = match cursor {
            Some(PageCursor::Offset(offset)) => *offset,
            _ => 0,
        };
        let fetched = offset + list.results.len() as u32;
        let next = match list.count {
            Some(count) if !list.results.is_empty() && fetched < count => {
                Some(PageCursor::Offset(fetched))
            }
            _ => None,
        };

        Ok(OrderPage {
            orders: list.results,
            next,
        })
    }

    fn order_remote_id(&self, raw: &Value) -> Option<String> {
        json_string(raw, "receipt_id")
    }

    fn parse_order(&self, raw: &Value) -> Result<RemoteOrder, SyncError> {
        let receipt: Receipt = serde_json::from_value(raw.clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid receipt: {}", e)))?;

        let created = receipt
            .create_timestamp
            .ok_or_else(|| SyncError::InvalidData("receipt missing create_timestamp".to_string()))?;
        let placed_at = Utc
            .timestamp_opt(created, 0)
            .single()
            .ok_or_else(|| SyncError::InvalidData(format!("invalid timestamp {}", created)))?;

        let currency = receipt
            .grandtotal
            .as_ref()
            .and_then(|t| t.get("currency_code"))
            .and_then(Value::as_str)
            .unwrap_or(self.target.currency.as_str())
            .to_string();

        let mut items = Vec::with_capacity(receipt.transactions.len());
        for tx in &receipt.transactions {
            items.push(NewOrderItem {
                remote_item_id: tx.transaction_id.map(|id| id.to_string()),
                sku: tx.sku.clone().filter(|s| !s.is_empty()),
                title: tx.title.clone().unwrap_or_default(),
                quantity: tx.quantity.max(1),
                unit_price: self.parse_money(tx.price.as_ref())?,
            });
        }

        Ok(RemoteOrder {
            remote_id: receipt.receipt_id.to_string(),
            status: receipt.status.unwrap_or_else(|| "open".to_string()),
            placed_at,
            buyer_name: receipt.name,
            buyer_email: receipt.buyer_email,
            currency,
            subtotal: self.parse_money(receipt.subtotal.as_ref())?,
            shipping: self.parse_money(receipt.total_shipping_cost.as_ref())?,
            tax: self.parse_money(receipt.total_tax_cost.as_ref())?,
            total: self.parse_money(receipt.grandtotal.as_ref())?,
            items: Some(items),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketplaceKind, ResourceType};
    use rust_decimal_macros::dec;

    fn adapter() -> EtsyAdapter {
        let mut target = SyncTarget::new(MarketplaceKind::Etsy);
        target.shop_id = Some("555".to_string());
        EtsyAdapter::new(target)
    }

    fn sample_receipt() -> Value {
        json!({
            "receipt_id": 9001,
            "status": "Paid",
            "create_timestamp": 1709287200,
            "name": "Grace Hopper",
            "buyer_email": "grace@example.com",
            "subtotal": { "amount": 1999, "divisor": 100, "currency_code": "USD" },
            "total_shipping_cost": { "amount": 450, "divisor": 100, "currency_code": "USD" },
            "grandtotal": { "amount": 2449, "divisor": 100, "currency_code": "USD" },
            "transactions": [{
                "transaction_id": 77,
                "sku": "SKU-1",
                "title": "Mug",
                "quantity": 1,
                "price": { "amount": 1999, "divisor": 100, "currency_code": "USD" }
            }]
        })
    }

    // Test 1: Public client grant carries client_id only
    #[test]
    fn test_build_auth_request_public_client() {
        let credential = Credential::new("keystring", None, "refresh");
        let request = adapter().build_auth_request(&credential);

        assert!(request.headers.is_empty());
        assert!(request
            .form
            .contains(&("client_id".to_string(), "keystring".to_string())));
        assert!(!request.form.iter().any(|(k, _)| k == "client_secret"));
        assert_eq!(request.url, "https://api.etsy.com/v3/public/oauth/token");
    }

    // Test 2: x-api-key is sent alongside the bearer token
    #[test]
    fn test_auth_headers_include_api_key() {
        let credential = Credential::new("keystring", None, "refresh");
        let headers = adapter().auth_headers("tok", &credential);
        assert!(headers.contains(&("Authorization".to_string(), "Bearer tok".to_string())));
        assert!(headers.contains(&("x-api-key".to_string(), "keystring".to_string())));
    }

    // Test 3: amount / divisor is exact
    #[test]
    fn test_parse_money_divisor() {
        let adapter = adapter();
        assert_eq!(
            adapter
                .parse_money(Some(&json!({"amount": 1999, "divisor": 100})))
                .unwrap(),
            dec!(19.99)
        );
        assert_eq!(adapter.parse_money(None).unwrap(), Decimal::ZERO);
        assert!(adapter
            .parse_money(Some(&json!({"amount": 1, "divisor": 0})))
            .is_err());
    }

    // Test 4: Lookup only with a stored link
    #[test]
    fn test_find_listing_requires_stored_link() {
        let adapter = adapter();
        assert!(adapter.find_listing_request("SKU-1", None).is_none());

        let record = SyncRecord::new("etsy", ResourceType::Product, 1).with_remote_id("123");
        let request = adapter.find_listing_request("SKU-1", Some(&record)).unwrap();
        assert_eq!(request.path, "/v3/application/listings/123");
        assert!(request.accept_not_found);
    }

    // Test 5: Draft listings are unpublished
    #[test]
    fn test_parse_created_listing_draft() {
        let listing = adapter()
            .parse_created_listing(&json!({"listing_id": 321, "state": "draft"}), "SKU-1")
            .unwrap();
        assert_eq!(listing.remote_id, "321");
        assert!(!listing.published);
    }

    // Test 6: Receipt parsing
    #[test]
    fn test_parse_order() {
        let adapter = adapter();
        let order = adapter.parse_order(&sample_receipt()).unwrap();

        assert_eq!(order.remote_id, "9001");
        assert_eq!(adapter.map_order_status(&order.status), LocalOrderStatus::Processing);
        assert_eq!(order.subtotal, dec!(19.99));
        assert_eq!(order.shipping, dec!(4.5));
        assert_eq!(order.tax, Decimal::ZERO);
        assert_eq!(order.total, dec!(24.49));
        assert_eq!(order.placed_at.timestamp(), 1709287200);
        assert_eq!(order.items.unwrap()[0].unit_price, dec!(19.99));
    }

    // Test 7: Receipts without a timestamp are rejected
    #[test]
    fn test_parse_order_missing_timestamp() {
        let mut raw = sample_receipt();
        raw.as_object_mut().unwrap().remove("create_timestamp");
        assert!(matches!(
            adapter().parse_order(&raw),
            Err(SyncError::InvalidData(_))
        ));
    }

    // Test 8: Inventory update needs a price
    #[test]
    fn test_inventory_request_needs_price() {
        let adapter = adapter();
        let record = SyncRecord::new("etsy", ResourceType::Product, 1).with_remote_id("123");

        assert!(matches!(
            adapter.inventory_request(&record, "SKU-1", 5, None),
            Err(SyncError::InvalidData(_))
        ));

        let request = adapter
            .inventory_request(&record, "SKU-1", 5, Some(dec!(19.99)))
            .unwrap();
        assert_eq!(request.path, "/v3/application/listings/123/inventory");
        assert_eq!(request.body.unwrap()["products"][0]["offerings"][0]["quantity"], 5);
    }

    // Test 9: Status table
    #[test]
    fn test_map_order_status() {
        let adapter = adapter();
        assert_eq!(adapter.map_order_status("completed"), LocalOrderStatus::Shipped);
        assert_eq!(adapter.map_order_status("Canceled"), LocalOrderStatus::Cancelled);
        assert_eq!(adapter.map_order_status("fully refunded"), LocalOrderStatus::Refunded);
        assert_eq!(adapter.map_order_status("open"), LocalOrderStatus::Pending);
    }
}
