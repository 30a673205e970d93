//! Marketplace adapters
//!
//! One adapter per supported marketplace:
//! - eBay (Sell Inventory + Fulfillment APIs)
//! - Etsy (Open API v3)
//! - Amazon (Selling Partner API)

pub mod traits;

// Marketplace adapter implementations
pub mod amazon;
pub mod ebay;
pub mod etsy;

use std::sync::Arc;

use crate::models::{MarketplaceKind, SyncTarget};

pub use amazon::AmazonAdapter;
pub use ebay::EbayAdapter;
pub use etsy::EtsyAdapter;
pub use traits::{
    ApiRequest, MarketplaceAdapter, OrderPage, PageCursor, RemoteListing, RemoteOrder,
    TokenGrant, TokenRequest, CLASS_INVENTORY, CLASS_LISTINGS, CLASS_ORDERS,
};

/// Build the adapter for a target's marketplace
pub fn adapter_for(target: SyncTarget) -> Arc<dyn MarketplaceAdapter> {
    match target.kind {
        MarketplaceKind::Ebay => Arc::new(EbayAdapter::new(target)),
        MarketplaceKind::Etsy => Arc::new(EtsyAdapter::new(target)),
        MarketplaceKind::Amazon => Arc::new(AmazonAdapter::new(target)),
    }
}
