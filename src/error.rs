//! Application error types for marketplace-sync
//!
//! This module defines the error taxonomy shared by the token manager, the
//! request executor and the synchronizer. All error types use `thiserror`.

use thiserror::Error;

/// Token acquisition errors
///
/// An `AuthError` is blocking: the operation that needed the token aborts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// The token endpoint could not be reached
    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    /// The token endpoint answered with a non-success status
    #[error("Token refresh rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status returned by the token endpoint
        status: u16,
        /// De-identified error excerpt
        message: String,
    },

    /// Response parsed but carried no access token
    #[error("Token response missing access_token")]
    MissingAccessToken,

    /// Response body was not valid JSON
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// A rotated refresh token could not be written back
    #[error("Failed to persist rotated refresh token: {0}")]
    Persist(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the async connection wrapper
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Record not found
    #[error("Record not found")]
    NotFound,

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Stored value could not be decoded
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Synchronization errors surfaced by the executor and the synchronizer
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Token acquisition failed
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Still rate limited after every attempt
    #[error("Rate limited after {attempts} attempts")]
    RateLimited {
        /// Number of attempts made
        attempts: u32,
    },

    /// Non-retryable 4xx response
    #[error("Client error: HTTP {status}: {message}")]
    Client {
        /// HTTP status
        status: u16,
        /// De-identified error excerpt
        message: String,
    },

    /// 5xx response after every attempt
    #[error("Server error: HTTP {status} after {attempts} attempts")]
    Server {
        /// Last HTTP status seen
        status: u16,
        /// Number of attempts made
        attempts: u32,
    },

    /// Timeout, DNS or connection failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inventory sync requested for a resource that was never synced
    #[error("Resource {local_id} is not linked to a remote listing")]
    NotLinked {
        /// Local entity id
        local_id: i64,
    },

    /// Unexpected or unusable payload
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Local store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// HTTP status carried by this error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            SyncError::Client { status, .. } | SyncError::Server { status, .. } => Some(*status),
            SyncError::RateLimited { .. } => Some(429),
            SyncError::Auth(AuthError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Whether this is a 404 from the marketplace
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Client { status: 404, .. })
    }
}

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// Application-level error type
///
/// Aggregates the domain-specific error types for the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::RateLimited { .. } => true,
            SyncError::Server { .. } => true,
            SyncError::Transport(_) => true,

            SyncError::Auth(_) => false,
            SyncError::Client { .. } => false,
            SyncError::NotLinked { .. } => false,
            SyncError::InvalidData(_) => false,
            SyncError::Storage(_) => false,
        }
    }
}
