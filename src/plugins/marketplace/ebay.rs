//! eBay Sell API adapter
//!
//! Listings go through the Inventory API: an inventory item keyed by SKU,
//! an offer for that item, then a publish call that creates the live
//! listing. Orders come from the Fulfillment API with offset paging.
//!
//! Options read from the target:
//! - `category_id`
//! - `fulfillment_policy_id`, `payment_policy_id`, `return_policy_id`
//! - `merchant_location_key`
//! - `condition` (default `NEW`)

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use super::traits::{
    json_decimal, ApiRequest, MarketplaceAdapter, OrderPage, PageCursor, RemoteListing,
    RemoteOrder, CLASS_INVENTORY, CLASS_LISTINGS, CLASS_ORDERS,
};
use crate::error::SyncError;
use crate::models::{LocalOrderStatus, LocalProduct, NewOrderItem, SyncAction, SyncRecord, SyncTarget};

const INVENTORY_BASE: &str = "/sell/inventory/v1";
const FULFILLMENT_BASE: &str = "/sell/fulfillment/v1";

/// eBay adapter
#[derive(Debug, Clone)]
pub struct EbayAdapter {
    target: SyncTarget,
}

impl EbayAdapter {
    /// Create an adapter for the given target
    pub fn new(target: SyncTarget) -> Self {
        Self { target }
    }

    fn marketplace_id(&self) -> &str {
        self.target.marketplace_id.as_deref().unwrap_or("EBAY_US")
    }

    fn offer_body(&self, product: &LocalProduct, sku: &str) -> Value {
        let mut body = json!({
            "sku": sku,
            "marketplaceId": self.marketplace_id(),
            "format": "FIXED_PRICE",
            "availableQuantity": product.quantity.max(0),
            "listingDescription": product.description,
            "pricingSummary": {
                "price": {
                    "value": product.price.round_dp(2).to_string(),
                    "currency": self.target.currency,
                }
            },
        });

        if let Some(category) = self.target.option("category_id") {
            body["categoryId"] = json!(category);
        }
        if let Some(location) = self.target.option("merchant_location_key") {
            body["merchantLocationKey"] = json!(location);
        }

        let mut policies = serde_json::Map::new();
        for (option, field) in [
            ("fulfillment_policy_id", "fulfillmentPolicyId"),
            ("payment_policy_id", "paymentPolicyId"),
            ("return_policy_id", "returnPolicyId"),
        ] {
            if let Some(id) = self.target.option(option) {
                policies.insert(field.to_string(), json!(id));
            }
        }
        if !policies.is_empty() {
            body["listingPolicies"] = Value::Object(policies);
        }

        body
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferList {
    #[serde(default)]
    offers: Vec<Offer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Offer {
    offer_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    listing: Option<OfferListing>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferListing {
    #[serde(default)]
    listing_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderList {
    #[serde(default)]
    orders: Vec<Value>,
    #[serde(default)]
    total: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EbayOrder {
    order_id: String,
    creation_date: DateTime<Utc>,
    #[serde(default)]
    order_fulfillment_status: Option<String>,
    #[serde(default)]
    order_payment_status: Option<String>,
    #[serde(default)]
    cancel_status: Option<CancelStatus>,
    #[serde(default)]
    buyer: Option<Buyer>,
    #[serde(default)]
    pricing_summary: Option<PricingSummary>,
    #[serde(default)]
    line_items: Vec<LineItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelStatus {
    #[serde(default)]
    cancel_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Buyer {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    buyer_registration_address: Option<RegistrationAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationAddress {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PricingSummary {
    #[serde(default)]
    price_subtotal: Option<Value>,
    #[serde(default)]
    delivery_cost: Option<Value>,
    #[serde(default)]
    tax: Option<Value>,
    #[serde(default)]
    total: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineItem {
    #[serde(default)]
    line_item_id: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default = "one")]
    quantity: i64,
    #[serde(default)]
    line_item_cost: Option<Value>,
}

fn one() -> i64 {
    1
}

impl MarketplaceAdapter for EbayAdapter {
    fn target(&self) -> &SyncTarget {
        &self.target
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        vec![
            (
                "Content-Language".to_string(),
                self.target.content_language.clone(),
            ),
            (
                "X-EBAY-C-MARKETPLACE-ID".to_string(),
                self.marketplace_id().to_string(),
            ),
        ]
    }

    fn parse_money(&self, value: Option<&Value>) -> Result<Decimal, SyncError> {
        match value {
            None | Some(Value::Null) => Ok(Decimal::ZERO),
            Some(v) => json_decimal(v.get("value").unwrap_or(&Value::Null)),
        }
    }

    fn map_order_status(&self, remote_status: &str) -> LocalOrderStatus {
        match remote_status {
            "PENDING" => LocalOrderStatus::Pending,
            "NOT_STARTED" | "IN_PROGRESS" => LocalOrderStatus::Processing,
            "FULFILLED" => LocalOrderStatus::Shipped,
            "CANCELED" => LocalOrderStatus::Cancelled,
            "FULLY_REFUNDED" => LocalOrderStatus::Refunded,
            _ => LocalOrderStatus::Pending,
        }
    }

    fn find_listing_request(&self, sku: &str, _existing: Option<&SyncRecord>) -> Option<ApiRequest> {
        Some(
            ApiRequest::get(
                SyncAction::FindListing,
                CLASS_LISTINGS,
                format!("{}/offer", INVENTORY_BASE),
            )
            .with_query("sku", sku)
            .with_query("marketplace_id", self.marketplace_id())
            .accept_not_found(),
        )
    }

    fn parse_found_listing(&self, body: &Value) -> Result<Option<RemoteListing>, SyncError> {
        let list: OfferList = serde_json::from_value(body.clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid offer list: {}", e)))?;

        Ok(list.offers.into_iter().next().map(|offer| {
            let listing_id = offer.listing.and_then(|l| l.listing_id);
            RemoteListing {
                remote_id: offer.offer_id,
                published: offer.status.as_deref() == Some("PUBLISHED") || listing_id.is_some(),
                secondary_id: listing_id,
            }
        }))
    }

    fn prepare_listing_request(&self, product: &LocalProduct, sku: &str) -> Option<ApiRequest> {
        let condition = self.target.option("condition").unwrap_or("NEW");
        Some(
            ApiRequest::put(
                SyncAction::PrepareListing,
                CLASS_LISTINGS,
                format!(
                    "{}/inventory_item/{}",
                    INVENTORY_BASE,
                    urlencoding::encode(sku)
                ),
            )
            .with_body(json!({
                "availability": {
                    "shipToLocationAvailability": { "quantity": product.quantity.max(0) }
                },
                "condition": condition,
                "product": {
                    "title": product.title,
                    "description": product.description,
                    "imageUrls": product.image_urls,
                }
            })),
        )
    }

    fn create_listing_request(&self, product: &LocalProduct, sku: &str) -> Result<ApiRequest, SyncError> {
        Ok(ApiRequest::post(
            SyncAction::CreateListing,
            CLASS_LISTINGS,
            format!("{}/offer", INVENTORY_BASE),
        )
        .with_body(self.offer_body(product, sku)))
    }

    fn parse_created_listing(&self, body: &Value, _sku: &str) -> Result<RemoteListing, SyncError> {
        let offer_id = body
            .get("offerId")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::InvalidData("create offer response missing offerId".to_string()))?;

        Ok(RemoteListing {
            remote_id: offer_id.to_string(),
            secondary_id: None,
            published: false,
        })
    }

    fn update_listing_request(
        &self,
        product: &LocalProduct,
        sku: &str,
        listing: &RemoteListing,
    ) -> Result<ApiRequest, SyncError> {
        Ok(ApiRequest::put(
            SyncAction::UpdateListing,
            CLASS_LISTINGS,
            format!("{}/offer/{}", INVENTORY_BASE, urlencoding::encode(&listing.remote_id)),
        )
        .with_body(self.offer_body(product, sku)))
    }

    fn publish_request(&self, listing: &RemoteListing) -> Option<ApiRequest> {
        Some(
            ApiRequest::post(
                SyncAction::PublishListing,
                CLASS_LISTINGS,
                format!(
                    "{}/offer/{}/publish",
                    INVENTORY_BASE,
                    urlencoding::encode(&listing.remote_id)
                ),
            )
            .heavy(),
        )
    }

    fn parse_published(&self, body: &Value, listing: &RemoteListing) -> RemoteListing {
        RemoteListing {
            remote_id: listing.remote_id.clone(),
            secondary_id: body
                .get("listingId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| listing.secondary_id.clone()),
            published: true,
        }
    }

    fn inventory_request(
        &self,
        record: &SyncRecord,
        sku: &str,
        quantity: i64,
        _price: Option<Decimal>,
    ) -> Result<ApiRequest, SyncError> {
        let offer_id = record
            .remote_id
            .as_deref()
            .ok_or(SyncError::NotLinked {
                local_id: record.local_id,
            })?;

        Ok(ApiRequest::post(
            SyncAction::UpdateInventory,
            CLASS_INVENTORY,
            format!("{}/bulk_update_price_quantity", INVENTORY_BASE),
        )
        .with_body(json!({
            "requests": [{
                "sku": sku,
                "shipToLocationAvailability": { "quantity": quantity.max(0) },
                "offers": [{ "offerId": offer_id, "availableQuantity": quantity.max(0) }]
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
            format!("{}/order", FULFILLMENT_BASE),
        )
        .with_query(
            "filter",
            format!(
                "creationdate:[{}..]",
                since.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        )
        .with_query("limit", self.target.page_size.to_string())
        .with_query("offset", offset.to_string())
    }

    fn parse_order_page(&self, body: &Value, cursor: Option<&PageCursor>) -> Result<OrderPage, SyncError> {
        let list: OrderList = serde_json::from_value(body.clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid order page: {}", e)))?;

        let offset = match cursor {
            Some(PageCursor::Offset(offset)) => *offset,
            _ => 0,
        };
        let fetched = offset + list.orders.len() as u32;
        let next = match list.total {
            Some(total) if !list.orders.is_empty() && fetched < total => {
                Some(PageCursor::Offset(fetched))
            }
            _ => None,
        };

        Ok(OrderPage {
            orders: list.orders,
            next,
        })
    }

    fn order_remote_id(&self, raw: &Value) -> Option<String> {
        raw.get("orderId").and_then(Value::as_str).map(str::to_string)
    }

    fn parse_order(&self, raw: &Value) -> Result<RemoteOrder, SyncError> {
        let order: EbayOrder = serde_json::from_value(raw.clone())
            .map_err(|e| SyncError::InvalidData(format!("invalid order: {}", e)))?;

        let status = if order
            .cancel_status
            .as_ref()
            .and_then(|c| c.cancel_state.as_deref())
            == Some("CANCELED")
        {
            "CANCELED".to_string()
        } else if order.order_payment_status.as_deref() == Some("FULLY_REFUNDED") {
            "FULLY_REFUNDED".to_string()
        } else if order.order_payment_status.as_deref() == Some("PENDING") {
            "PENDING".to_string()
        } else {
            order
                .order_fulfillment_status
                .clone()
                .unwrap_or_else(|| "NOT_STARTED".to_string())
        };

        let pricing = order.pricing_summary.unwrap_or_default();
        let currency = pricing
            .total
            .as_ref()
            .and_then(|t| t.get("currency"))
            .and_then(Value::as_str)
            .unwrap_or(self.target.currency.as_str())
            .to_string();

        let mut items = Vec::with_capacity(order.line_items.len());
        for item in &order.line_items {
            let quantity = item.quantity.max(1);
            let line_total = self.parse_money(item.line_item_cost.as_ref())?;
            items.push(NewOrderItem {
                remote_item_id: item.line_item_id.clone(),
                sku: item.sku.clone(),
                title: item.title.clone(),
                quantity,
                unit_price: line_total / Decimal::from(quantity),
            });
        }

        let (buyer_name, buyer_email) = match order.buyer {
            Some(buyer) => {
                let address = buyer.buyer_registration_address;
                (
                    address
                        .as_ref()
                        .and_then(|a| a.full_name.clone())
                        .or(buyer.username),
                    address.and_then(|a| a.email),
                )
            }
            None => (None, None),
        };

        Ok(RemoteOrder {
            remote_id: order.order_id,
            status,
            placed_at: order.creation_date,
            buyer_name,
            buyer_email,
            currency,
            subtotal: self.parse_money(pricing.price_subtotal.as_ref())?,
            shipping: self.parse_money(pricing.delivery_cost.as_ref())?,
            tax: self.parse_money(pricing.tax.as_ref())?,
            total: self.parse_money(pricing.total.as_ref())?,
            items: Some(items),
        })
    }
}
