//! Amazon Selling Partner API adapter
//!
//! Listings are keyed by the seller SKU, so create and update are the same
//! `PUT` on the Listings Items API and there is no publish step. Orders are
//! paged with an opaque `NextToken` and their line items live behind a second
//! endpoint, from which the totals are derived.
//!
//! Options read from the target:
//! - `product_type` (default `PRODUCT`)
//! - `condition_type` (default `new_new`)

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{
    json_datetime, json_decimal, json_string, ApiRequest, MarketplaceAdapter, OrderPage,
    PageCursor, RemoteListing, RemoteOrder, CLASS_INVENTORY, CLASS_LISTINGS, CLASS_ORDERS,
};
use crate::error::SyncError;
use crate::models::{
    Credential, LocalOrderStatus, LocalProduct, NewOrderItem, SyncAction, SyncRecord, SyncTarget,
};

const LISTINGS_PATH: &str = "/listings/2021-08-01/items";
const ORDERS_PATH: &str = "/orders/v0/orders";

/// Amazon adapter
#[derive(Debug, Clone)]
pub struct AmazonAdapter {
    target: SyncTarget,
}

impl AmazonAdapter {
    /// Create an adapter for the given target
    pub fn new(target: SyncTarget) -> Self {
        Self { target }
    }

    fn marketplace_id(&self) -> &str {
        self.target.marketplace_id.as_deref().unwrap_or_default()
    }

    fn item_path(&self, sku: &str) -> String {
        format!(
            "{}/{}/{}",
            LISTINGS_PATH,
            urlencoding::encode(self.target.seller_id.as_deref().unwrap_or_default()),
            urlencoding::encode(sku)
        )
    }

    fn product_type(&self) -> &str {
        self.target.option("product_type").unwrap_or("PRODUCT")
    }

    fn listing_body(&self, product: &LocalProduct) -> Value {
        let marketplace_id = self.marketplace_id();
        json!({
            "productType": self.product_type(),
            "requirements": "LISTING",
            "attributes": {
                "condition_type": [{
                    "value": self.target.option("condition_type").unwrap_or("new_new"),
                    "marketplace_id": marketplace_id,
                }],
                "item_name": [{
                    "value": product.title,
                    "language_tag": self.target.content_language.replace('-', "_"),
                    "marketplace_id": marketplace_id,
                }],
                "product_description": [{
                    "value": product.description,
                    "marketplace_id": marketplace_id,
                }],
                "purchasable_offer": [{
                    "currency": self.target.currency,
                    "marketplace_id": marketplace_id,
                    "our_price": [{
                        "schedule": [{ "value_with_tax": product.price.round_dp(2).to_string() }]
                    }],
                }],
                "fulfillment_availability": [{
                    "fulfillment_channel_code": "DEFAULT",
                    "quantity": product.quantity.max(0),
                }],
            }
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrdersPayload {
    #[serde(default)]
    orders: Vec<Value>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderItemsPayload {
    #[serde(default)]
    order_items: Vec<AmazonOrderItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmazonOrderItem {
    #[serde(default)]
    order_item_id: Option<String>,
    #[serde(default, rename = "SellerSKU")]
    seller_sku: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quantity_ordered: i64,
    #[serde(default)]
    item_price: Option<Value>,
    #[serde(default)]
    shipping_price: Option<Value>,
    #[serde(default)]
    item_tax: Option<Value>,
    #[serde(default)]
    shipping_tax: Option<Value>,
}

/// Amazon wraps responses in `{"payload": ...}`
fn payload(body: &Value) -> &Value {
    body.get("payload").unwrap_or(body)
}

impl MarketplaceAdapter for AmazonAdapter {
    fn target(&self) -> &SyncTarget {
        &self.target
    }

    fn auth_headers(&self, access_token: &str, _credential: &Credential) -> Vec<(String, String)> {
        vec![("x-amz-access-token".to_string(), access_token.to_string())]
    }

    fn parse_money(&self, value: Option<&Value>) -> Result<Decimal, SyncError> {
        match value {
            None | Some(Value::Null) => Ok(Decimal::ZERO),
            Some(v) => json_decimal(v.get("Amount").unwrap_or(&Value::Null)),
        }
    }

    fn map_order_status(&self, remote_status: &str) -> LocalOrderStatus {
        match remote_status {
            "Pending" | "PendingAvailability" => LocalOrderStatus::Pending,
            "Unshipped" | "PartiallyShipped" => LocalOrderStatus::Processing,
            "Shipped" | "InvoiceUnconfirmed" => LocalOrderStatus::Shipped,
            "Canceled" => LocalOrderStatus::Cancelled,
            _ => LocalOrderStatus::Pending,
        }
    }

    fn find_listing_request(&self, sku: &str, existing: Option<&SyncRecord>) -> Option<ApiRequest> {
        let sku = existing
            .and_then(|r| r.remote_id.as_deref())
            .unwrap_or(sku);
        Some(
            ApiRequest::get(SyncAction::FindListing, CLASS_LISTINGS, self.item_path(sku))
                .with_query("marketplaceIds", self.marketplace_id())
                .with_query("includedData", "summaries")
                .accept_not_found(),
        )
    }

    fn parse_found_listing(&self, body: &Value) -> Result<Option<RemoteListing>, SyncError> {
        let Some(sku) = json_string(body, "sku") else {
            return Ok(None);
        };
        let summary = body
            .get("summaries")
            .and_then(Value::as_array)
            .and_then(|s| s.first());
        let asin = summary.and_then(|s| json_string(s, "asin"));
        let buyable = summary
            .and_then(|s| s.get("status"))
            .and_then(Value::as_array)
            .map(|statuses| statuses.iter().any(|s| s.as_str() == Some("BUYABLE")))
            .unwrap_or(false);

        Ok(Some(RemoteListing {
            remote_id: sku,
            secondary_id: asin,
            published: buyable,
        }))
    }

    fn create_listing_request(&self, product: &LocalProduct, sku: &str) -> Result<ApiRequest, SyncError> {
        Ok(
            ApiRequest::put(SyncAction::CreateListing, CLASS_LISTINGS, self.item_path(sku))
                .with_query("marketplaceIds", self.marketplace_id())
                .with_body(self.listing_body(product)),
        )
    }

    fn parse_created_listing(&self, body: &Value, sku: &str) -> Result<RemoteListing, SyncError> {
        self.validate_listing_response(body)?;
        Ok(RemoteListing {
            remote_id: json_string(body, "sku").unwrap_or_else(|| sku.to_string()),
            secondary_id: None,
            published: true,
        })
    }

    fn validate_listing_response(&self, body: &Value) -> Result<(), SyncError> {
        if body.get("status").and_then(Value::as_str) != Some("INVALID") {
            return Ok(());
        }
        let issues: Vec<String> = body
            .get("issues")
            .and_then(Value::as_array)
            .map(|issues| {
                issues
                    .iter()
                    .filter_map(|i| i.get("message").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Err(SyncError::InvalidData(format!(
            "listing submission rejected: {}",
            if issues.is_empty() {
                "no details".to_string()
            } else {
                issues.join("; ")
            }
        )))
    }

    fn update_listing_request(
        &self,
        product: &LocalProduct,
        _sku: &str,
        listing: &RemoteListing,
    ) -> Result<ApiRequest, SyncError> {
        Ok(ApiRequest::put(
            SyncAction::UpdateListing,
            CLASS_LISTINGS,
            self.item_path(&listing.remote_id),
        )
        .with_query("marketplaceIds", self.marketplace_id())
        .with_body(self.listing_body(product)))
    }

    fn inventory_request(
        &self,
        record: &SyncRecord,
        sku: &str,
        quantity: i64,
        _price: Option<Decimal>,
    ) -> Result<ApiRequest, SyncError> {
        if record.remote_id.is_none() {
            return Err(SyncError::NotLinked {
                local_id: record.local_id,
            });
        }
        let sku = record.remote_id.as_deref().unwrap_or(sku);

        Ok(
            ApiRequest::patch(SyncAction::UpdateInventory, CLASS_INVENTORY, self.item_path(sku))
                .with_query("marketplaceIds", self.marketplace_id())
                .with_body(json!({
                    "productType": self.product_type(),
                    "patches": [{
                        "op": "replace",
                        "path": "/attributes/fulfillment_availability",
                        "value": [{
                            "fulfillment_channel_code": "DEFAULT",
                            "quantity": quantity.max(0),
                        }]
                    }]
                })),
        )
    }

    fn order_page_request(&self, since: DateTime<Utc>, cursor: Option<&PageCursor>) -> ApiRequest {
        let request = ApiRequest::get(SyncAction::FetchOrders, CLASS_ORDERS, ORDERS_PATH)
            .with_query("MarketplaceIds", self.marketplace_id());

        match cursor {
            Some(PageCursor::Token(token)) => request.with_query("NextToken", token.clone()),
            _ => request
                .with_query(
                    "CreatedAfter",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true),
                )
                .with_query("MaxResultsPerPage", self.target.page_size.min(100).to_string()),
        }
    }

    fn parse_order_page(&self, body: &Value, _cursor: Option<&PageCursor>) -> Result<OrderPage, SyncError> {
        let page: OrdersPayload = serde_json::from_value(payload(body).clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid orders payload: {}", e)))?;

        Ok(OrderPage {
            orders: page.orders,
            next: page
                .next_token
                .filter(|t| !t.is_empty())
                .map(PageCursor::Token),
        })
    }

    fn order_remote_id(&self, raw: &Value) -> Option<String> {
        json_string(raw, "AmazonOrderId")
    }

    fn parse_order(&self, raw: &Value) -> Result<RemoteOrder, SyncError> {
        let remote_id = self
            .order_remote_id(raw)
            .ok_or_else(|| SyncError::InvalidData("order missing AmazonOrderId".to_string()))?;
        let placed_at = json_datetime(raw, "PurchaseDate")?;
        let order_total = raw.get("OrderTotal");
        let buyer = raw.get("BuyerInfo");

        Ok(RemoteOrder {
            remote_id,
            status: json_string(raw, "OrderStatus").unwrap_or_else(|| "Pending".to_string()),
            placed_at,
            buyer_name: buyer.and_then(|b| json_string(b, "BuyerName")),
            buyer_email: buyer.and_then(|b| json_string(b, "BuyerEmail")),
            currency: order_total
                .and_then(|t| json_string(t, "CurrencyCode"))
                .unwrap_or_else(|| self.target.currency.clone()),
            subtotal: Decimal::ZERO,
            shipping: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: self.parse_money(order_total)?,
            items: None,
        })
    }

    fn order_items_request(&self, order: &RemoteOrder) -> Option<ApiRequest> {
        Some(ApiRequest::get(
            SyncAction::FetchOrderItems,
            CLASS_ORDERS,
            format!("{}/{}/orderItems", ORDERS_PATH, urlencoding::encode(&order.remote_id)),
        ))
    }

    fn apply_order_items(&self, order: &mut RemoteOrder, body: &Value) -> Result<(), SyncError> {
        let payload: OrderItemsPayload = serde_json::from_value(payload(body).clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid order items payload: {}", e)))?;

        let mut subtotal = Decimal::ZERO;
        let mut shipping = Decimal::ZERO;
        let mut tax = Decimal::ZERO;
        let mut items = Vec::with_capacity(payload.order_items.len());

        for item in payload.order_items {
            // ItemPrice is the line total, not the unit price
            let line_total = self.parse_money(item.item_price.as_ref())?;
            let quantity = item.quantity_ordered.max(1);
            subtotal += line_total;
            shipping += self.parse_money(item.shipping_price.as_ref())?;
            tax += self.parse_money(item.item_tax.as_ref())?;
            tax += self.parse_money(item.shipping_tax.as_ref())?;

            items.push(NewOrderItem {
                remote_item_id: item.order_item_id,
                sku: item.seller_sku.filter(|s| !s.is_empty()),
                title: item.title.unwrap_or_default(),
                quantity,
                unit_price: (line_total / Decimal::from(quantity)).round_dp(2),
            });
        }

        order.subtotal = subtotal;
        order.shipping = shipping;
        order.tax = tax;
        if order.total.is_zero() {
            order.total = subtotal + shipping + tax;
        }
        order.items = Some(items);
        Ok(())
    }
}
