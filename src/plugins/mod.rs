//! Marketplace plugins
//!
//! Each supported marketplace is a [`marketplace::MarketplaceAdapter`]
//! that knows its endpoints, payload shapes and value mappings.

pub mod marketplace;

pub use marketplace::{adapter_for, MarketplaceAdapter};
