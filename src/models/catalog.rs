//! Local catalog and order models
//!
//! Products are read from the local repository and pushed to marketplaces.
//! Orders flow the other way: remote orders are mapped into [`NewOrder`] and
//! inserted together with their sync record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Minor-unit money amount as returned by several marketplace APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units
    pub amount: i64,
    /// Divisor to reach major units (100 for cents)
    pub divisor: i64,
}

impl Money {
    /// Create a money value
    pub fn new(amount: i64, divisor: i64) -> Self {
        Self { amount, divisor }
    }

    /// Exact decimal value of `amount / divisor`
    pub fn to_decimal(&self) -> Result<Decimal, SyncError> {
        if self.divisor <= 0 {
            return Err(SyncError::InvalidData(format!(
                "money divisor must be positive, got {}",
                self.divisor
            )));
        }
        Decimal::from(self.amount)
            .checked_div(Decimal::from(self.divisor))
            .map(|d| d.normalize())
            .ok_or_else(|| SyncError::InvalidData("money amount out of range".to_string()))
    }
}

/// Local catalog product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalProduct {
    /// Local product id
    pub id: i64,
    /// Merchant SKU, if assigned
    pub sku: Option<String>,
    /// Title
    pub title: String,
    /// Description (may contain HTML)
    pub description: String,
    /// Unit price in major units
    pub price: Decimal,
    /// Available quantity
    pub quantity: i64,
    /// Image URLs
    pub image_urls: Vec<String>,
    /// Last local modification
    pub updated_at: DateTime<Utc>,
}

impl LocalProduct {
    /// Create a product with the given id, title and price
    pub fn new(id: i64, title: impl Into<String>, price: Decimal) -> Self {
        Self {
            id,
            sku: None,
            title: title.into(),
            description: String::new(),
            price,
            quantity: 0,
            image_urls: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Set the SKU
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the quantity
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Add an image URL
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_urls.push(url.into());
        self
    }

    /// SKU sent to the marketplace, falling back to `prefix + id`
    pub fn effective_sku(&self, prefix: &str) -> String {
        match self.sku.as_deref().map(str::trim) {
            Some(sku) if !sku.is_empty() => sku.to_string(),
            _ => format!("{}{}", prefix, self.id),
        }
    }
}

/// Local order lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalOrderStatus {
    /// Awaiting payment
    Pending,
    /// Paid, not yet shipped
    Processing,
    /// Shipped
    Shipped,
    /// Delivered or otherwise closed
    Completed,
    /// Cancelled
    Cancelled,
    /// Refunded
    Refunded,
}

impl LocalOrderStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalOrderStatus::Pending => "pending",
            LocalOrderStatus::Processing => "processing",
            LocalOrderStatus::Shipped => "shipped",
            LocalOrderStatus::Completed => "completed",
            LocalOrderStatus::Cancelled => "cancelled",
            LocalOrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for LocalOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LocalOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(LocalOrderStatus::Pending),
            "processing" => Ok(LocalOrderStatus::Processing),
            "shipped" => Ok(LocalOrderStatus::Shipped),
            "completed" => Ok(LocalOrderStatus::Completed),
            "cancelled" => Ok(LocalOrderStatus::Cancelled),
            "refunded" => Ok(LocalOrderStatus::Refunded),
            _ => Err(format!("Unknown order status: {}", s)),
        }
    }
}

/// Line item of an imported order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    /// Remote line item id
    pub remote_item_id: Option<String>,
    /// SKU as reported by the marketplace
    pub sku: Option<String>,
    /// Item title
    pub title: String,
    /// Quantity ordered
    pub quantity: i64,
    /// Unit price in major units
    pub unit_price: Decimal,
}

/// Order mapped from a marketplace, ready to insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Marketplace name
    pub marketplace: String,
    /// Remote order id
    pub remote_id: String,
    /// Mapped local status
    pub status: LocalOrderStatus,
    /// Status string as reported remotely
    pub remote_status: String,
    /// Buyer display name
    pub buyer_name: Option<String>,
    /// Buyer email
    pub buyer_email: Option<String>,
    /// ISO currency code
    pub currency: String,
    /// Sum of line items
    pub subtotal: Decimal,
    /// Shipping charged
    pub shipping: Decimal,
    /// Tax charged
    pub tax: Decimal,
    /// Order total
    pub total: Decimal,
    /// When the order was placed on the marketplace
    pub placed_at: DateTime<Utc>,
    /// Line items
    pub items: Vec<NewOrderItem>,
}

/// Order stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOrder {
    /// Local order id
    pub id: i64,
    /// Marketplace name
    pub marketplace: String,
    /// Remote order id
    pub remote_id: String,
    /// Local status
    pub status: LocalOrderStatus,
    /// Buyer display name
    pub buyer_name: Option<String>,
    /// Buyer email
    pub buyer_email: Option<String>,
    /// ISO currency code
    pub currency: String,
    /// Sum of line items
    pub subtotal: Decimal,
    /// Shipping charged
    pub shipping: Decimal,
    /// Tax charged
    pub tax: Decimal,
    /// Order total
    pub total: Decimal,
    /// When the order was placed on the marketplace
    pub placed_at: DateTime<Utc>,
    /// When the order was imported
    pub imported_at: DateTime<Utc>,
    /// Line items
    pub items: Vec<NewOrderItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // Test 1: Minor units convert exactly
    #[test]
    fn test_money_to_decimal_exact() {
        assert_eq!(Money::new(1999, 100).to_decimal().unwrap(), dec!(19.99));
        assert_eq!(Money::new(1999, 100).to_decimal().unwrap().to_string(), "19.99");
        assert_eq!(Money::new(500, 100).to_decimal().unwrap(), dec!(5));
        assert_eq!(Money::new(0, 100).to_decimal().unwrap(), Decimal::ZERO);
        assert_eq!(Money::new(12345, 1000).to_decimal().unwrap(), dec!(12.345));
    }

    // Test 2: Zero divisor is rejected
    #[test]
    fn test_money_zero_divisor() {
        assert!(matches!(
            Money::new(100, 0).to_decimal(),
            Err(SyncError::InvalidData(_))
        ));
    }

    // Test 3: SKU fallback uses prefix + id
    #[test]
    fn test_effective_sku() {
        let product = LocalProduct::new(42, "Mug", dec!(9.50));
        assert_eq!(product.effective_sku("SKU-"), "SKU-42");

        let product = product.with_sku("MUG-BLUE");
        assert_eq!(product.effective_sku("SKU-"), "MUG-BLUE");

        let blank = LocalProduct::new(7, "Cup", dec!(1)).with_sku("   ");
        assert_eq!(blank.effective_sku("SHOP-"), "SHOP-7");
    }

    // Test 4: Order status parsing
    #[test]
    fn test_local_order_status_roundtrip() {
        for status in [
            LocalOrderStatus::Pending,
            LocalOrderStatus::Processing,
            LocalOrderStatus::Shipped,
            LocalOrderStatus::Completed,
            LocalOrderStatus::Cancelled,
            LocalOrderStatus::Refunded,
        ] {
            assert_eq!(status.to_string().parse::<LocalOrderStatus>(), Ok(status));
        }
    }
}
