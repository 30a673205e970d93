//! Order import integration tests
//!
//! Tests paginated order import end to end:
//! - Pagination, deduplication and watermark persistence
//! - Partial failures that do not abort the pass
//! - Split line-item endpoints and money conversion

mod common;

use rust_decimal_macros::dec;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{at, create_synchronizer, create_test_database, mount_token_endpoint, test_clock, test_target};
use marketplace_sync::database::Database;
use marketplace_sync::error::SyncError;
use marketplace_sync::models::{LocalOrderStatus, MarketplaceKind, ResourceType};
use marketplace_sync::sync::{checkpoint_key, watermark_key};

const EBAY_ORDERS: &str = "/sell/fulfillment/v1/order";

fn ebay_order(id: &str, created: &str) -> Value {
    json!({
        "orderId": id,
        "creationDate": created,
        "orderFulfillmentStatus": "NOT_STARTED",
        "orderPaymentStatus": "PAID",
        "pricingSummary": {
            "priceSubtotal": { "value": "10.00", "currency": "USD" },
            "total": { "value": "10.00", "currency": "USD" }
        },
        "lineItems": [{
            "lineItemId": format!("{}-1", id),
            "sku": "MUG-1",
            "title": "Mug",
            "quantity": 1,
            "lineItemCost": { "value": "10.00", "currency": "USD" }
        }]
    })
}

async fn mount_ebay_page(server: &MockServer, offset: u32, orders: Vec<Value>, total: u32) {
    Mock::given(method("GET"))
        .and(path(EBAY_ORDERS))
        .and(query_param("offset", offset.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": orders,
            "total": total
        })))
        .mount(server)
        .await;
}

async fn local_order_id(db: &dyn Database, marketplace: &str, remote_id: &str) -> i64 {
    db.find_sync_record_by_remote_id(marketplace, ResourceType::Order, remote_id)
        .await
        .unwrap()
        .expect("order record")
        .local_id
}

/// Test 1: Paginated import, then a second pass skips everything
#[tokio::test]
async fn test_import_paginates_and_deduplicates() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    mount_ebay_page(
        &server,
        0,
        vec![
            ebay_order("A", "2024-03-01T10:00:00.000Z"),
            ebay_order("B", "2024-03-02T10:00:00.000Z"),
        ],
        3,
    )
    .await;
    mount_ebay_page(&server, 2, vec![ebay_order("C", "2024-03-03T10:00:00.000Z")], 3).await;

    let db = create_test_database().await;
    let sync = create_synchronizer(test_target(MarketplaceKind::Ebay, &server), db.clone(), test_clock());
    let since = at("2024-02-28T00:00:00Z");

    let first = sync.import_orders(Some(since)).await.unwrap();
    assert_eq!(first.imported, 3);
    assert_eq!(first.skipped, 0);
    assert!(first.errors.is_empty());
    assert_eq!(first.watermark, Some(at("2024-03-03T10:00:00Z")));
    assert_eq!(
        db.get_setting(&watermark_key("ebay")).await.unwrap().as_deref(),
        Some("2024-03-03T10:00:00+00:00")
    );

    let second = sync.import_orders(Some(since)).await.unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped, 3);

    let id = local_order_id(db.as_ref(), "ebay", "B").await;
    let order = db.get_order(id).await.unwrap().unwrap();
    assert_eq!(order.remote_id, "B");
    assert_eq!(order.status, LocalOrderStatus::Processing);
    assert_eq!(order.total, dec!(10.00));
}

/// Test 2: A malformed order is reported while the rest are imported
#[tokio::test]
async fn test_partial_failure_does_not_abort() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    mount_ebay_page(
        &server,
        0,
        vec![
            ebay_order("A", "2024-03-01T10:00:00.000Z"),
            json!({ "orderId": "BROKEN", "orderPaymentStatus": "PAID" }),
            ebay_order("C", "2024-03-03T10:00:00.000Z"),
        ],
        3,
    )
    .await;

    let db = create_test_database().await;
    let sync = create_synchronizer(test_target(MarketplaceKind::Ebay, &server), db.clone(), test_clock());
    let since = at("2024-02-28T00:00:00Z");

    let result = sync.import_orders(Some(since)).await.unwrap();
    assert_eq!(result.imported, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].remote_id.as_deref(), Some("BROKEN"));
    assert!(matches!(result.errors[0].error, SyncError::InvalidData(_)));

    // The failed order has no timestamp, so the watermark stays put
    assert_eq!(result.watermark, Some(since));
    assert!(db.get_setting(&watermark_key("ebay")).await.unwrap().is_none());

    let logs = db.get_sync_logs(10, 0).await.unwrap();
    let summary = logs
        .iter()
        .find(|e| e.action == "import_orders")
        .expect("summary entry");
    assert_eq!(summary.status.as_str(), "warning");
}

/// Test 3: A failing page ends the pass without advancing the watermark
#[tokio::test]
async fn test_page_failure_keeps_watermark() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    mount_ebay_page(
        &server,
        0,
        vec![
            ebay_order("A", "2024-03-01T10:00:00.000Z"),
            ebay_order("B", "2024-03-02T10:00:00.000Z"),
        ],
        4,
    )
    .await;
    Mock::given(method("GET"))
        .and(path(EBAY_ORDERS))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let db = create_test_database().await;
    let sync = create_synchronizer(test_target(MarketplaceKind::Ebay, &server), db.clone(), test_clock());
    let since = at("2024-02-28T00:00:00Z");

    let result = sync.import_orders(Some(since)).await.unwrap();
    assert_eq!(result.imported, 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].remote_id.is_none());
    assert_eq!(
        result.errors[0].error,
        SyncError::Server { status: 503, attempts: 3 }
    );
    assert_eq!(result.watermark, Some(since));
}

/// Test 4: Hitting the page limit defers the rest to the next pass
#[tokio::test]
async fn test_page_limit_defers_remaining_orders() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path(EBAY_ORDERS))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [ebay_order("A", "2024-03-01T10:00:00.000Z")],
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EBAY_ORDERS))
        .and(query_param("offset", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "orders": [ebay_order("B", "2024-03-02T10:00:00.000Z")],
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let db = create_test_database().await;
    let mut target = test_target(MarketplaceKind::Ebay, &server);
    target.max_pages = 1;
    let sync = create_synchronizer(target, db.clone(), test_clock());
    let since = at("2024-02-28T00:00:00Z");

    let first = sync.import_orders(Some(since)).await.unwrap();
    assert_eq!(first.imported, 1);
    assert!(first.errors.is_empty());
    assert_eq!(first.watermark, Some(since));
    assert!(db.get_setting(&checkpoint_key("ebay")).await.unwrap().is_some());

    // Resumes at offset 1 instead of re-reading the first page
    let second = sync.import_orders(None).await.unwrap();
    assert_eq!(second.imported, 1);
    assert_eq!(second.skipped, 0);
    assert_eq!(second.watermark, Some(at("2024-03-02T10:00:00Z")));
    assert!(db.get_setting(&checkpoint_key("ebay")).await.unwrap().is_none());
    assert_eq!(
        db.get_setting(&watermark_key("ebay")).await.unwrap().as_deref(),
        Some("2024-03-02T10:00:00+00:00")
    );
    local_order_id(db.as_ref(), "ebay", "B").await;
}

/// Test 5: Amazon token paging, split items and a failed item fetch
#[tokio::test]
async fn test_amazon_items_and_failure_watermark() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let order = |id: &str, purchased: &str| {
        json!({
            "AmazonOrderId": id,
            "PurchaseDate": purchased,
            "OrderStatus": "Unshipped",
            "OrderTotal": { "CurrencyCode": "USD", "Amount": "25.00" },
            "BuyerInfo": { "BuyerEmail": "buyer@example.com" }
        })
    };

    Mock::given(method("GET"))
        .and(path("/orders/v0/orders"))
        .and(query_param("CreatedAfter", "2024-02-28T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payload": { "Orders": [order("X", "2024-03-01T10:00:00Z")], "NextToken": "T2" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/v0/orders"))
        .and(query_param("NextToken", "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payload": {
                "Orders": [order("Y", "2024-03-02T10:00:00Z"), order("Z", "2024-03-03T10:00:00Z")]
            }
        })))
        .mount(&server)
        .await;

    let items = json!({
        "payload": {
            "OrderItems": [{
                "OrderItemId": "1",
                "SellerSKU": "MUG-1",
                "Title": "Mug",
                "QuantityOrdered": 2,
                "ItemPrice": { "CurrencyCode": "USD", "Amount": "20.00" },
                "ShippingPrice": { "CurrencyCode": "USD", "Amount": "5.00" }
            }]
        }
    });
    for id in ["X", "Z"] {
        Mock::given(method("GET"))
            .and(path(format!("/orders/v0/orders/{}/orderItems", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(items.clone()))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/orders/v0/orders/Y/orderItems"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"errors": []})))
        .expect(1)
        .mount(&server)
        .await;

    let db = create_test_database().await;
    let sync = create_synchronizer(test_target(MarketplaceKind::Amazon, &server), db.clone(), test_clock());

    let result = sync
        .import_orders(Some(at("2024-02-28T00:00:00Z")))
        .await
        .unwrap();
    assert_eq!(result.imported, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].remote_id.as_deref(), Some("Y"));
    assert!(matches!(result.errors[0].error, SyncError::Client { status: 403, .. }));

    // Never past the failed order, so it is retried on the next pass
    assert_eq!(result.watermark, Some(at("2024-03-02T09:59:59Z")));

    let id = local_order_id(db.as_ref(), "amazon", "Z").await;
    let stored = db.get_order(id).await.unwrap().unwrap();
    assert_eq!(stored.subtotal, dec!(20.00));
    assert_eq!(stored.shipping, dec!(5.00));
    assert_eq!(stored.total, dec!(25.00));
    assert_eq!(stored.status, LocalOrderStatus::Processing);
    assert_eq!(stored.buyer_email.as_deref(), Some("buyer@example.com"));
}

/// Test 6: Etsy money objects convert exactly
#[tokio::test]
async fn test_etsy_money_conversion() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path("/v3/application/shops/555/receipts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "results": [{
                "receipt_id": 9001,
                "status": "Paid",
                "create_timestamp": 1709287200,
                "subtotal": { "amount": 1999, "divisor": 100, "currency_code": "USD" },
                "total_shipping_cost": { "amount": 450, "divisor": 100, "currency_code": "USD" },
                "grandtotal": { "amount": 2449, "divisor": 100, "currency_code": "USD" },
                "transactions": [{
                    "transaction_id": 77,
                    "title": "Scarf",
                    "quantity": 1,
                    "price": { "amount": 1999, "divisor": 100, "currency_code": "USD" }
                }]
            }]
        })))
        .mount(&server)
        .await;

    let db = create_test_database().await;
    let sync = create_synchronizer(test_target(MarketplaceKind::Etsy, &server), db.clone(), test_clock());

    let result = sync
        .import_orders(Some(at("2024-02-28T00:00:00Z")))
        .await
        .unwrap();
    assert_eq!(result.imported, 1);

    let id = local_order_id(db.as_ref(), "etsy", "9001").await;
    let stored = db.get_order(id).await.unwrap().unwrap();
    assert_eq!(stored.subtotal, dec!(19.99));
    assert_eq!(stored.shipping, dec!(4.50));
    assert_eq!(stored.total, dec!(24.49));
}
