//! marketplace-sync - Keeps a local catalog in sync with online marketplaces
//!
//! This crate pushes local products to eBay, Etsy and Amazon as listings,
//! keeps their inventory in step and imports remote orders into the local
//! store, with token caching, rate limiting, retries and an audit log.

pub mod auth;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod otel;
pub mod plugins;
pub mod sync;
