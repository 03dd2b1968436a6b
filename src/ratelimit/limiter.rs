//! Core admission-control decision engine.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::decision::Decision;
use super::policy::LimitPolicy;
use super::store::CounterStore;
use crate::error::Result;

/// Length of every counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Decides whether a request may proceed.
///
/// Holds no mutable state of its own: counts and blocks live in the counter
/// store, so several instances sharing one store agree on every decision.
/// Safe to call concurrently without external locking.
pub struct RateLimiter {
    /// Shared counter backend
    store: Arc<dyn CounterStore>,
    /// Limits resolved per identity
    policy: LimitPolicy,
}

impl RateLimiter {
    /// Create a new rate limiter over the given store.
    pub fn new(store: Arc<dyn CounterStore>, policy: LimitPolicy) -> Self {
        Self { store, policy }
    }

    /// Check the limit for a request identified by `ip` and optional `token`.
    ///
    /// An empty `token` means the request is attributed to its IP. Storage
    /// failures are returned to the caller rather than treated as a pass.
    pub async fn check_limit(&self, ip: &str, token: &str) -> Result<Decision> {
        let (key, limit) = self.policy.resolve(ip, token);

        trace!(key = %key, limit = limit, "Checking rate limit");

        let blocked = self.store.is_blocked(key.as_str()).await.map_err(|e| {
            warn!(key = %key, error = %e, "Failed to check block status");
            e
        })?;

        if blocked {
            trace!(key = %key, "Key is blocked");
            return Ok(Decision::block(Utc::now(), self.policy.block_duration));
        }

        let count = self
            .store
            .increment(key.as_str(), WINDOW)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Failed to increment counter");
                e
            })?;

        if count > limit {
            debug!(
                key = %key,
                count = count,
                limit = limit,
                block_secs = self.policy.block_duration.as_secs_f64(),
                "Rate limit exceeded, blocking key"
            );

            // The increment above is not rolled back if this fails.
            self.store
                .set_block(key.as_str(), self.policy.block_duration)
                .await
                .map_err(|e| {
                    warn!(key = %key, error = %e, "Failed to set block");
                    e
                })?;

            return Ok(Decision::block(Utc::now(), self.policy.block_duration));
        }

        Ok(Decision::allow(limit.saturating_sub(count), Utc::now(), WINDOW))
    }

    /// Current window count for an identity, for diagnostics only.
    pub async fn current_count(&self, ip: &str, token: &str) -> Result<u64> {
        let (key, _) = self.policy.resolve(ip, token);
        self.store.get(key.as_str()).await
    }

    /// Release the underlying store. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}
