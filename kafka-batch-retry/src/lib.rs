//! Batch retry for Kafka consumers.
//!
//! A failed batch is rewound and redelivered after a backoff wait until the backoff is
//! exhausted, then every record goes to a recoverer (by default a dead letter topic) and the
//! partitions move past the batch.
//!
//! ## Error logging (anyhow)
//!
//! Log errors with a format that keeps the cause chain: `{e:#}` inline, or `error = ?e` as a
//! structured field. Avoid `{}` / `%e` for errors, they only show the top-level message.
//!
//! When constructing errors, use `.context()` / `.with_context()` so the original error remains
//! the source.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod metrics_consts;
pub mod recoverer;
pub mod seek;
pub mod service;
pub mod store;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;

pub use backoff::{BackOff, BackOffExecution, ExponentialBackOff, FixedBackOff, JitteredBackOff};
pub use error::{BatchRetryError, RecoveryError, SeekError};
pub use handler::{BatchRetryHandler, RetryOutcome};
pub use recoverer::Recoverer;
pub use seek::{ConsumerSeeker, OffsetSeeker};
