//! Marketplace adapter trait definition
//!
//! A [`MarketplaceAdapter`] is the per-marketplace strategy chosen at
//! construction. It builds requests and interprets response bodies; it never
//! performs I/O itself. The token manager and the request executor do the
//! calls, so retry, rate limiting and logging behave the same on every
//! marketplace.

use chrono::{DateTime, Utc};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, SyncError};
use crate::models::{
    AuthMode, Credential, LocalOrderStatus, LocalProduct, MarketplaceKind, NewOrderItem,
    SyncAction, SyncRecord, SyncTarget,
};

/// Endpoint class for listing reads and writes
pub const CLASS_LISTINGS: &str = "listings";
/// Endpoint class for quantity updates
pub const CLASS_INVENTORY: &str = "inventory";
/// Endpoint class for order reads
pub const CLASS_ORDERS: &str = "orders";

/// OAuth refresh-token grant request
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    /// Token endpoint
    pub url: String,
    /// Extra headers (e.g. `Authorization: Basic ...`)
    pub headers: Vec<(String, String)>,
    /// Form fields
    pub form: Vec<(String, String)>,
}

/// Parsed token endpoint response
#[derive(Clone, PartialEq)]
pub struct TokenGrant {
    /// New access token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Refresh token returned by the endpoint, if any
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A resource call to be run by the executor
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the target's base URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
    /// Rate-limit endpoint class
    pub class: &'static str,
    /// Action name for the sync log
    pub action: SyncAction,
    /// Use the long upload timeout
    pub heavy: bool,
    /// Treat 404 as a regular response instead of a client error
    pub accept_not_found: bool,
}

impl ApiRequest {
    /// Create a request
    pub fn new(method: Method, action: SyncAction, class: &'static str, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            class,
            action,
            heavy: false,
            accept_not_found: false,
        }
    }

    /// GET request
    pub fn get(action: SyncAction, class: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::GET, action, class, path)
    }

    /// POST request
    pub fn post(action: SyncAction, class: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::POST, action, class, path)
    }

    /// PUT request
    pub fn put(action: SyncAction, class: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::PUT, action, class, path)
    }

    /// PATCH request
    pub fn patch(action: SyncAction, class: &'static str, path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, action, class, path)
    }

    /// Add a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Use the upload timeout
    pub fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }

    /// Return 404 responses to the caller
    pub fn accept_not_found(mut self) -> Self {
        self.accept_not_found = true;
        self
    }
}

/// Remote listing identity
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteListing {
    /// Id used for subsequent updates (eBay offer id, Etsy listing id, Amazon SKU)
    pub remote_id: String,
    /// Secondary id (eBay listing id, Amazon ASIN)
    pub secondary_id: Option<String>,
    /// Whether the listing is live
    pub published: bool,
}

/// Position in a paginated order listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PageCursor {
    /// Offset-based paging
    Offset(u32),
    /// Opaque continuation token
    Token(String),
}

/// One page of raw orders
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPage {
    /// Raw order objects, parsed one by one
    pub orders: Vec<Value>,
    /// Cursor of the next page, `None` on the last page
    pub next: Option<PageCursor>,
}

/// Order as reported by a marketplace, before local insertion
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOrder {
    /// Remote order id
    pub remote_id: String,
    /// Remote status string
    pub status: String,
    /// When the order was placed
    pub placed_at: DateTime<Utc>,
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
    /// Line items; `None` when they come from a separate endpoint
    pub items: Option<Vec<NewOrderItem>>,
}

/// Per-marketplace strategy
pub trait MarketplaceAdapter: Send + Sync {
    /// Connection this adapter was built for
    fn target(&self) -> &SyncTarget;

    /// Marketplace kind
    fn kind(&self) -> MarketplaceKind {
        self.target().kind
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Build the refresh-token grant for the target's auth mode
    fn build_auth_request(&self, credential: &Credential) -> TokenRequest {
        let target = self.target();
        let mut headers = Vec::new();
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), credential.refresh_token.clone()),
        ];

        match target.auth_mode {
            AuthMode::BasicClientCredentials => {
                use base64::Engine;
                let raw = format!(
                    "{}:{}",
                    credential.client_id,
                    credential.client_secret.as_deref().unwrap_or_default()
                );
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
                headers.push(("Authorization".to_string(), format!("Basic {}", encoded)));
            }
            AuthMode::FormClientCredentials => {
                form.push(("client_id".to_string(), credential.client_id.clone()));
                form.push((
                    "client_secret".to_string(),
                    credential.client_secret.clone().unwrap_or_default(),
                ));
            }
            AuthMode::PublicClient => {
                form.push(("client_id".to_string(), credential.client_id.clone()));
            }
        }

        if let Some(scope) = &target.scope {
            form.push(("scope".to_string(), scope.clone()));
        }

        TokenRequest {
            url: target.token_url.clone(),
            headers,
            form,
        }
    }

    /// Interpret a token endpoint body
    fn parse_auth_response(&self, body: &Value) -> Result<TokenGrant, AuthError> {
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingAccessToken)?;

        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(3600);

        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(TokenGrant {
            access_token: access_token.to_string(),
            expires_in,
            refresh_token,
        })
    }

    /// Headers carrying the access token
    fn auth_headers(&self, access_token: &str, _credential: &Credential) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", access_token),
        )]
    }

    /// Marketplace headers sent on every resource call
    fn default_headers(&self) -> Vec<(String, String)> {
        vec![(
            "Content-Language".to_string(),
            self.target().content_language.clone(),
        )]
    }

    /// Header carrying the generated request id
    fn request_id_header(&self) -> &'static str {
        "X-Request-Id"
    }

    // =========================================================================
    // Value mapping
    // =========================================================================

    /// Convert a marketplace money object; missing or null amounts are zero
    fn parse_money(&self, value: Option<&Value>) -> Result<Decimal, SyncError>;

    /// Map a remote order status to the local lifecycle
    fn map_order_status(&self, remote_status: &str) -> LocalOrderStatus;

    // =========================================================================
    // Listings
    // =========================================================================

    /// Lookup of an existing listing by SKU or stored link, if supported
    fn find_listing_request(&self, sku: &str, existing: Option<&SyncRecord>) -> Option<ApiRequest>;

    /// Interpret a lookup response body
    fn parse_found_listing(&self, body: &Value) -> Result<Option<RemoteListing>, SyncError>;

    /// Request that must precede create/update (e.g. eBay inventory item)
    fn prepare_listing_request(&self, _product: &LocalProduct, _sku: &str) -> Option<ApiRequest> {
        None
    }

    /// Create a new listing
    fn create_listing_request(&self, product: &LocalProduct, sku: &str) -> Result<ApiRequest, SyncError>;

    /// Interpret a create response body
    fn parse_created_listing(&self, body: &Value, sku: &str) -> Result<RemoteListing, SyncError>;

    /// Reject a create/update response that reports a failed submission
    fn validate_listing_response(&self, _body: &Value) -> Result<(), SyncError> {
        Ok(())
    }

    /// Update an existing listing
    fn update_listing_request(
        &self,
        product: &LocalProduct,
        sku: &str,
        listing: &RemoteListing,
    ) -> Result<ApiRequest, SyncError>;

    /// Make a listing live, when the marketplace has a separate step
    fn publish_request(&self, _listing: &RemoteListing) -> Option<ApiRequest> {
        None
    }

    /// Interpret a publish response body
    fn parse_published(&self, _body: &Value, listing: &RemoteListing) -> RemoteListing {
        RemoteListing {
            published: true,
            ..listing.clone()
        }
    }

    /// Quantity-only update for a linked record
    fn inventory_request(
        &self,
        record: &SyncRecord,
        sku: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<ApiRequest, SyncError>;

    // =========================================================================
    // Orders
    // =========================================================================

    /// Request one page of orders created after `since`
    fn order_page_request(&self, since: DateTime<Utc>, cursor: Option<&PageCursor>) -> ApiRequest;

    /// Split a page body into raw orders and the next cursor
    fn parse_order_page(&self, body: &Value, cursor: Option<&PageCursor>) -> Result<OrderPage, SyncError>;

    /// Remote id of a raw order, used for error reporting
    fn order_remote_id(&self, raw: &Value) -> Option<String>;

    /// Parse one raw order
    fn parse_order(&self, raw: &Value) -> Result<RemoteOrder, SyncError>;

    /// Separate line-item request, when items are not embedded
    fn order_items_request(&self, _order: &RemoteOrder) -> Option<ApiRequest> {
        None
    }

    /// Fill line items (and derived totals) from a line-item response
    fn apply_order_items(&self, _order: &mut RemoteOrder, _body: &Value) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Read a string or number field as a string
pub(crate) fn json_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a decimal from a JSON string or number
pub(crate) fn json_decimal(value: &Value) -> Result<Decimal, SyncError> {
    use std::str::FromStr;
    match value {
        Value::Null => Ok(Decimal::ZERO),
        Value::String(s) if s.trim().is_empty() => Ok(Decimal::ZERO),
        Value::String(s) => Decimal::from_str(s.trim())
            .map_err(|e| SyncError::InvalidData(format!("invalid amount '{}': {}", s, e))),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|e| SyncError::InvalidData(format!("invalid amount '{}': {}", n, e))),
        other => Err(SyncError::InvalidData(format!("invalid amount: {}", other))),
    }
}

/// Parse an RFC 3339 timestamp field
pub(crate) fn json_datetime(value: &Value, key: &str) -> Result<DateTime<Utc>, SyncError> {
    let raw = value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::InvalidData(format!("missing {}", key)))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::InvalidData(format!("invalid {} '{}': {}", key, raw, e)))
}
