//! Configuration management for marketplace-sync
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables. Marketplace sections are
//! validated into an immutable [`SyncTarget`] plus the [`Credential`] handed to
//! a token manager.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::{Credential, MarketplaceKind, SyncTarget};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Marketplace connections keyed by marketplace name
    #[serde(default)]
    pub marketplaces: HashMap<String, MarketplaceConfig>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix MARKETPLACE_SYNC_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `MARKETPLACE_SYNC_*` environment overrides on top of this configuration
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("MARKETPLACE_SYNC_DATABASE_PATH") {
            self.database.path = path;
        }

        if let Ok(level) = std::env::var("MARKETPLACE_SYNC_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(enabled) = std::env::var("MARKETPLACE_SYNC_OTEL_ENABLED") {
            self.otel.enabled = enabled.parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "MARKETPLACE_SYNC_OTEL_ENABLED must be true or false, got '{}'",
                    enabled
                ))
            })?;
        }
        if let Ok(endpoint) = std::env::var("MARKETPLACE_SYNC_OTEL_ENDPOINT") {
            self.otel.endpoint = Some(endpoint);
        }

        Ok(())
    }

    /// Validate every enabled marketplace section
    ///
    /// Missing keys from all sections are reported together.
    pub fn marketplace_targets(&self) -> Result<Vec<(SyncTarget, Credential)>, ConfigError> {
        let mut names: Vec<&String> = self
            .marketplaces
            .iter()
            .filter(|(_, mp)| mp.enabled)
            .map(|(name, _)| name)
            .collect();
        names.sort();

        let mut targets = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match self.marketplaces[name].validate(name) {
                Ok(target) => targets.push(target),
                Err(ConfigError::MissingFields(fields)) => missing.extend(fields),
                Err(e) => return Err(e),
            }
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }
        Ok(targets)
    }

    /// Validate a single marketplace section by name
    pub fn marketplace_target(&self, name: &str) -> Result<(SyncTarget, Credential), ConfigError> {
        let section = self.marketplaces.get(name).ok_or_else(|| {
            ConfigError::MissingRequired(format!("marketplaces.{} is not configured", name))
        })?;
        section.validate(name)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/marketplace-sync.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Whether to use insecure connection
    #[serde(default)]
    pub insecure: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            insecure: false,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "marketplace-sync".to_string()
}

/// Scheduler configuration for the `run` daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Delay before the first scheduled job, in seconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Maximum random jitter added to each interval, in seconds
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Upper bound on one job run, in seconds
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            jitter_secs: default_jitter_secs(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

fn default_initial_delay() -> u64 {
    5
}

fn default_jitter_secs() -> u64 {
    30
}

fn default_job_timeout() -> u64 {
    1800
}

/// One marketplace connection as written in the configuration file
///
/// Every connection field is optional here; [`MarketplaceConfig::validate`]
/// turns it into a typed target and reports all missing keys at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceConfig {
    /// Whether this marketplace is synced
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OAuth client id
    pub client_id: Option<String>,

    /// OAuth client secret
    pub client_secret: Option<String>,

    /// OAuth refresh token
    pub refresh_token: Option<String>,

    /// Override for the resource API base URL
    pub api_base_url: Option<String>,

    /// Override for the token endpoint
    pub token_url: Option<String>,

    /// Marketplace / region identifier
    pub marketplace_id: Option<String>,

    /// Amazon seller id
    pub seller_id: Option<String>,

    /// Etsy shop id
    pub shop_id: Option<String>,

    /// OAuth scope sent on refresh
    pub scope: Option<String>,

    /// Content-Language header
    pub content_language: Option<String>,

    /// Currency for outgoing prices
    pub currency: Option<String>,

    /// Prefix for synthesized SKUs
    pub sku_prefix: Option<String>,

    /// Orders requested per page
    pub page_size: Option<u32>,

    /// Maximum pages per import pass
    pub max_pages: Option<u32>,

    /// Lookback used when no order watermark is stored
    pub order_lookback_days: Option<i64>,

    /// Token expiry safety buffer in seconds
    pub token_expiry_buffer_secs: Option<u64>,

    /// Token exchange timeout in seconds
    pub token_timeout_secs: Option<u64>,

    /// Regular request timeout in seconds
    pub request_timeout_secs: Option<u64>,

    /// Heavy request timeout in seconds
    pub upload_timeout_secs: Option<u64>,

    /// Scheduled order import interval in seconds
    pub order_import_interval_secs: Option<u64>,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate-limit budgets (marketplace defaults when omitted)
    #[serde(default)]
    pub rate_limits: Option<RateLimitConfig>,

    /// Marketplace-specific options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

impl MarketplaceConfig {
    /// Validate this section into a target and its credentials
    ///
    /// `name` selects the marketplace kind. Missing keys are reported as
    /// `marketplaces.<name>.<key>`.
    pub fn validate(&self, name: &str) -> Result<(SyncTarget, Credential), ConfigError> {
        let kind: MarketplaceKind = name.parse().map_err(ConfigError::InvalidValue)?;

        let mut missing = Vec::new();
        let mut require = |key: &str, value: &Option<String>| {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                missing.push(format!("marketplaces.{}.{}", name, key));
            }
        };

        require("client_id", &self.client_id);
        require("refresh_token", &self.refresh_token);
        if kind.requires_client_secret() {
            require("client_secret", &self.client_secret);
        }
        match kind {
            MarketplaceKind::Amazon => {
                require("seller_id", &self.seller_id);
                require("marketplace_id", &self.marketplace_id);
            }
            MarketplaceKind::Etsy => require("shop_id", &self.shop_id),
            MarketplaceKind::Ebay => {}
        }

        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        self.retry.validate(name)?;
        if let Some(limits) = &self.rate_limits {
            limits.validate(name)?;
        }
        if self.page_size == Some(0) {
            return Err(ConfigError::InvalidValue(format!(
                "marketplaces.{}.page_size must be greater than zero",
                name
            )));
        }

        let mut target = SyncTarget::new(kind);
        if let Some(url) = &self.api_base_url {
            target.api_base_url = url.clone();
        }
        if let Some(url) = &self.token_url {
            target.token_url = url.clone();
        }
        target.marketplace_id = self
            .marketplace_id
            .clone()
            .or_else(|| default_marketplace_id(kind));
        target.seller_id = self.seller_id.clone();
        target.shop_id = self.shop_id.clone();
        target.scope = self.scope.clone().or_else(|| default_scope(kind));
        if let Some(lang) = &self.content_language {
            target.content_language = lang.clone();
        }
        if let Some(currency) = &self.currency {
            target.currency = currency.clone();
        }
        if let Some(prefix) = &self.sku_prefix {
            target.sku_prefix = prefix.clone();
        }
        if let Some(page_size) = self.page_size {
            target.page_size = page_size;
        }
        if let Some(max_pages) = self.max_pages {
            target.max_pages = max_pages;
        }
        if let Some(days) = self.order_lookback_days {
            target.order_lookback_days = days;
        }
        if let Some(buffer) = self.token_expiry_buffer_secs {
            target.token_expiry_buffer_secs = buffer;
        }
        if let Some(secs) = self.token_timeout_secs {
            target.token_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout_secs {
            target.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.upload_timeout_secs {
            target.upload_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.order_import_interval_secs {
            target.order_import_interval = Duration::from_secs(secs);
        }
        target.retry = self.retry.clone();
        if let Some(limits) = &self.rate_limits {
            target.rate_limits = limits.clone();
        }
        target.options = self.options.clone();

        // Presence of both was checked above
        let credential = Credential::new(
            self.client_id.clone().unwrap_or_default(),
            self.client_secret.clone().filter(|s| !s.is_empty()),
            self.refresh_token.clone().unwrap_or_default(),
        );

        Ok((target, credential))
    }
}

fn default_marketplace_id(kind: MarketplaceKind) -> Option<String> {
    match kind {
        MarketplaceKind::Ebay => Some("EBAY_US".to_string()),
        _ => None,
    }
}

fn default_scope(kind: MarketplaceKind) -> Option<String> {
    match kind {
        MarketplaceKind::Ebay => Some(
            "https://api.ebay.com/oauth/api_scope/sell.inventory \
             https://api.ebay.com/oauth/api_scope/sell.fulfillment"
                .to_string(),
        ),
        _ => None,
    }
}

/// Retry configuration for marketplace API calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Extra multiplier applied when backing off from a 429
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: u32,
}

impl RetryConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "marketplaces.{}.retry.max_retries must be at least 1",
                name
            )));
        }
        if self.rate_limit_multiplier == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "marketplaces.{}.retry.rate_limit_multiplier must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_rate_limit_multiplier() -> u32 {
    2
}

/// Length of a rate-limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePeriod {
    /// One-second window
    Second,
    /// One-minute window
    Minute,
}

impl RatePeriod {
    /// Window length
    pub fn as_duration(&self) -> Duration {
        match self {
            RatePeriod::Second => Duration::from_secs(1),
            RatePeriod::Minute => Duration::from_secs(60),
        }
    }
}

/// Request budget for one endpoint class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudgetConfig {
    /// Requests allowed per window
    pub requests: u32,
    /// Window length
    pub per: RatePeriod,
}

impl RateBudgetConfig {
    /// Budget of `requests` per second
    pub fn per_second(requests: u32) -> Self {
        Self {
            requests,
            per: RatePeriod::Second,
        }
    }

    /// Budget of `requests` per minute
    pub fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            per: RatePeriod::Minute,
        }
    }
}

/// Rate-limit budgets for one marketplace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Budget for classes without their own entry
    #[serde(default = "default_budget")]
    pub default: RateBudgetConfig,

    /// Budgets keyed by endpoint class (`listings`, `orders`, `inventory`)
    #[serde(default)]
    pub classes: HashMap<String, RateBudgetConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: default_budget(),
            classes: HashMap::new(),
        }
    }
}

fn default_budget() -> RateBudgetConfig {
    RateBudgetConfig::per_second(5)
}

impl RateLimitConfig {
    /// Documented budgets for each marketplace
    pub fn defaults_for(kind: MarketplaceKind) -> Self {
        let mut classes = HashMap::new();
        let default = match kind {
            MarketplaceKind::Ebay => {
                classes.insert("listings".to_string(), RateBudgetConfig::per_second(5));
                classes.insert("inventory".to_string(), RateBudgetConfig::per_second(5));
                classes.insert("orders".to_string(), RateBudgetConfig::per_second(5));
                RateBudgetConfig::per_second(5)
            }
            MarketplaceKind::Etsy => RateBudgetConfig::per_second(10),
            MarketplaceKind::Amazon => {
                classes.insert("listings".to_string(), RateBudgetConfig::per_second(5));
                classes.insert("inventory".to_string(), RateBudgetConfig::per_second(5));
                classes.insert("orders".to_string(), RateBudgetConfig::per_minute(20));
                RateBudgetConfig::per_second(1)
            }
        };
        Self { default, classes }
    }

    /// Budget for the given endpoint class
    pub fn budget_for(&self, class: &str) -> RateBudgetConfig {
        self.classes.get(class).copied().unwrap_or(self.default)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.default.requests == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "marketplaces.{}.rate_limits.default.requests must be greater than zero",
                name
            )));
        }
        for (class, budget) in &self.classes {
            if budget.requests == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "marketplaces.{}.rate_limits.classes.{}.requests must be greater than zero",
                    name, class
                )));
            }
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// One or more required keys are absent
    #[error("Missing required configuration keys: {}", .0.join(", "))]
    MissingFields(Vec<String>),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left untouched.
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
