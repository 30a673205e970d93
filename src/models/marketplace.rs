//! Marketplace connection models
//!
//! This module defines the marketplace kinds, the immutable [`SyncTarget`]
//! describing one configured connection, and the [`Credential`] owned by a
//! token manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::{RateLimitConfig, RetryConfig};

/// Supported marketplaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketplaceKind {
    /// eBay Sell APIs
    Ebay,
    /// Etsy Open API v3
    Etsy,
    /// Amazon Selling Partner API
    Amazon,
}

impl MarketplaceKind {
    /// All supported marketplaces
    pub const ALL: [MarketplaceKind; 3] = [
        MarketplaceKind::Ebay,
        MarketplaceKind::Etsy,
        MarketplaceKind::Amazon,
    ];

    /// Stable lowercase name used as the storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketplaceKind::Ebay => "ebay",
            MarketplaceKind::Etsy => "etsy",
            MarketplaceKind::Amazon => "amazon",
        }
    }

    /// Production API base URL
    pub fn default_api_base_url(&self) -> &'static str {
        match self {
            MarketplaceKind::Ebay => "https://api.ebay.com",
            MarketplaceKind::Etsy => "https://openapi.etsy.com",
            MarketplaceKind::Amazon => "https://sellingpartnerapi-na.amazon.com",
        }
    }

    /// Production OAuth2 token endpoint
    pub fn default_token_url(&self) -> &'static str {
        match self {
            MarketplaceKind::Ebay => "https://api.ebay.com/identity/v1/oauth2/token",
            MarketplaceKind::Etsy => "https://api.etsy.com/v3/public/oauth/token",
            MarketplaceKind::Amazon => "https://api.amazon.com/auth/o2/token",
        }
    }

    /// How client credentials are presented to the token endpoint
    pub fn auth_mode(&self) -> AuthMode {
        match self {
            MarketplaceKind::Ebay => AuthMode::BasicClientCredentials,
            MarketplaceKind::Etsy => AuthMode::PublicClient,
            MarketplaceKind::Amazon => AuthMode::FormClientCredentials,
        }
    }

    /// Whether the client secret is required
    pub fn requires_client_secret(&self) -> bool {
        self.auth_mode() != AuthMode::PublicClient
    }
}

impl std::fmt::Display for MarketplaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MarketplaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ebay" => Ok(MarketplaceKind::Ebay),
            "etsy" => Ok(MarketplaceKind::Etsy),
            "amazon" => Ok(MarketplaceKind::Amazon),
            _ => Err(format!("Unknown marketplace: {}", s)),
        }
    }
}

/// How the token endpoint authenticates the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// `Authorization: Basic base64(client_id:client_secret)`
    BasicClientCredentials,
    /// `client_id` and `client_secret` in the form body
    FormClientCredentials,
    /// Only `client_id` in the form body; refresh tokens rotate
    PublicClient,
}

/// One configured marketplace connection
///
/// Built once from validated configuration and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTarget {
    /// Marketplace kind
    pub kind: MarketplaceKind,
    /// Base URL for resource endpoints
    pub api_base_url: String,
    /// OAuth2 token endpoint
    pub token_url: String,
    /// Region / marketplace identifier (eBay `EBAY_US`, Amazon `ATVPDKIKX0DER`)
    pub marketplace_id: Option<String>,
    /// Amazon seller id
    pub seller_id: Option<String>,
    /// Etsy shop id
    pub shop_id: Option<String>,
    /// OAuth scope requested on refresh
    pub scope: Option<String>,
    /// `Content-Language` header value
    pub content_language: String,
    /// Currency used for outgoing prices
    pub currency: String,
    /// Client authentication mode
    pub auth_mode: AuthMode,
    /// Request budgets per endpoint class
    pub rate_limits: RateLimitConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Prefix for synthesized SKUs
    pub sku_prefix: String,
    /// Orders requested per page
    pub page_size: u32,
    /// Upper bound on pages fetched per import pass
    pub max_pages: u32,
    /// Lookback used when no watermark is stored
    pub order_lookback_days: i64,
    /// Seconds subtracted from token lifetimes
    pub token_expiry_buffer_secs: u64,
    /// Timeout for the token exchange
    pub token_timeout: Duration,
    /// Timeout for regular resource calls
    pub request_timeout: Duration,
    /// Timeout for heavy calls (bulk uploads, publish)
    pub upload_timeout: Duration,
    /// Interval between scheduled order imports
    pub order_import_interval: Duration,
    /// Marketplace-specific options (policy ids, taxonomy ids, ...)
    pub options: HashMap<String, String>,
}

impl SyncTarget {
    /// Build a target with default settings for the given marketplace
    pub fn new(kind: MarketplaceKind) -> Self {
        Self {
            kind,
            api_base_url: kind.default_api_base_url().to_string(),
            token_url: kind.default_token_url().to_string(),
            marketplace_id: None,
            seller_id: None,
            shop_id: None,
            scope: None,
            content_language: "en-US".to_string(),
            currency: "USD".to_string(),
            auth_mode: kind.auth_mode(),
            rate_limits: RateLimitConfig::defaults_for(kind),
            retry: RetryConfig::default(),
            sku_prefix: "SKU-".to_string(),
            page_size: 50,
            max_pages: 100,
            order_lookback_days: 30,
            token_expiry_buffer_secs: 60,
            token_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            upload_timeout: Duration::from_secs(120),
            order_import_interval: Duration::from_secs(900),
            options: HashMap::new(),
        }
    }

    /// Name used in logs and storage keys
    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Look up a marketplace-specific option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Join the base URL and a path
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// OAuth client credentials plus the currently cached access token
#[derive(Clone, PartialEq)]
pub struct Credential {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (absent for public clients)
    pub client_secret: Option<String>,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Current access token
    pub access_token: Option<String>,
    /// When the cached access token must no longer be used
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Create credentials with no cached access token
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            refresh_token: refresh_token.into(),
            access_token: None,
            expires_at: None,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &"[REDACTED]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marketplace_kind_parse() {
        assert_eq!("ebay".parse::<MarketplaceKind>(), Ok(MarketplaceKind::Ebay));
        assert_eq!("Etsy".parse::<MarketplaceKind>(), Ok(MarketplaceKind::Etsy));
        assert_eq!(
            "AMAZON".parse::<MarketplaceKind>(),
            Ok(MarketplaceKind::Amazon)
        );
        assert!("shopify".parse::<MarketplaceKind>().is_err());
    }

    #[test]
    fn test_marketplace_kind_display_roundtrip() {
        for kind in MarketplaceKind::ALL {
            assert_eq!(kind.to_string().parse::<MarketplaceKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_auth_modes() {
        assert_eq!(
            MarketplaceKind::Ebay.auth_mode(),
            AuthMode::BasicClientCredentials
        );
        assert_eq!(MarketplaceKind::Etsy.auth_mode(), AuthMode::PublicClient);
        assert!(!MarketplaceKind::Etsy.requires_client_secret());
        assert!(MarketplaceKind::Amazon.requires_client_secret());
    }

    #[test]
    fn test_credential_debug_redacts_secrets() {
        let mut credential =
            Credential::new("client-1", Some("s3cret".to_string()), "refresh-abc");
        credential.access_token = Some("access-xyz".to_string());

        let debug = format!("{:?}", credential);
        assert!(debug.contains("client-1"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("refresh-abc"));
        assert!(!debug.contains("access-xyz"));
    }

    #[test]
    fn test_target_url_joins_paths() {
        let mut target = SyncTarget::new(MarketplaceKind::Ebay);
        target.api_base_url = "http://localhost:1234/".to_string();

        assert_eq!(
            target.url("/sell/inventory/v1/offer"),
            "http://localhost:1234/sell/inventory/v1/offer"
        );
    }
}
