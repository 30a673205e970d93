//! Marketplace authentication and request budgeting
//!
//! This module provides:
//! - OAuth2 access token caching with refresh-token rotation
//! - Per-endpoint-class rate limiting

pub mod ratelimit;
pub mod token;

pub use ratelimit::RateLimiter;
pub use token::{refresh_token_key, AccessToken, TokenManager};
