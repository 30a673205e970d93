//! Marketplace synchronization
//!
//! # Components
//!
//! - [`retry`]: backoff policy for transient failures
//! - [`log`]: best-effort audit log writer
//! - [`http_client`]: rate-limited, retrying request executor
//! - [`synchronizer`]: product, inventory and order reconciliation
//! - [`scheduler`]: periodic order import with jitter
//!
//! # Example
//!
//! ```ignore
//! use marketplace_sync::sync::{ApiClient, MarketplaceSynchronizer};
//!
//! let api = ApiClient::connect(target, credential, db.clone(), clock.clone());
//! let sync = MarketplaceSynchronizer::new(api, db, clock);
//! let result = sync.sync_product(42).await;
//! ```

pub mod http_client;
pub mod log;
pub mod retry;
pub mod scheduler;
pub mod synchronizer;

pub use http_client::{ApiClient, ApiResponse};
pub use log::{redact_excerpt, SyncLogger};
pub use retry::{RetryPolicy, RetryReason};
pub use scheduler::{ImportJob, JobStatus, ManualImportHandle, SchedulerError, SyncScheduler};
pub use synchronizer::{checkpoint_key, watermark_key, MarketplaceSynchronizer};
