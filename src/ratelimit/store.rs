//! Counter store trait for abstracting in-process and shared backends.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Shared-state primitives the rate limiter depends on.
///
/// Keys are opaque strings. Every call either fully applies its effect or
/// returns [`BouncerError::StorageUnavailable`](crate::error::BouncerError);
/// implementations must bound each call so it never hangs.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key` and reset its expiry to
    /// `window`, returning the post-increment count.
    ///
    /// The increment and the expiry refresh must not be separable: a counter
    /// left without an expiry would never reset.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64>;

    /// Current count for `key`, zero when absent or expired.
    async fn get(&self, key: &str) -> Result<u64>;

    /// Mark `key` as blocked for `duration`, replacing any prior block.
    async fn set_block(&self, key: &str, duration: Duration) -> Result<()>;

    /// Whether `key` is inside an active block. Lapsed blocks read as false.
    async fn is_blocked(&self, key: &str) -> Result<bool>;

    /// Release backend resources. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}
