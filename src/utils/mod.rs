//! Utility modules supporting the client transport.
//!
//! - [`HttpClient`]: shared reqwest client with connection defaults
//! - [`RetryConfig`]: configuration for retry logic with exponential backoff
//! - [`with_retry`]: execute an operation with automatic retry on transient errors
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mcp_sessions::utils::{with_retry, RetryConfig, Retryable, TransientError};
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl Retryable for Flaky {
//!     fn transient(&self) -> Option<TransientError> {
//!         Some(TransientError::Network)
//!     }
//!     fn timed_out(_after: Duration) -> Self {
//!         Flaky
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = RetryConfig::default().max_attempts(3);
//! let result: Result<(), Flaky> = with_retry(config, || async { Err(Flaky) }).await;
//! assert!(result.is_err());
//! # }
//! ```

mod http;
mod retry;

pub use http::{HttpClient, USER_AGENT};
pub use retry::{with_retry, RetryConfig, Retryable, TransientError};
