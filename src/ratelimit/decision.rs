//! The outcome of a single admission check.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Allow/reject outcome returned for every check. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the caller may expect the limit state to change
    pub reset_time: DateTime<Utc>,
    /// Whether the key is in a block cooldown
    pub blocked: bool,
}

impl Decision {
    pub(crate) fn allow(remaining: u64, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time: after(now, window),
            blocked: false,
        }
    }

    pub(crate) fn block(now: DateTime<Utc>, block_duration: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time: after(now, block_duration),
            blocked: true,
        }
    }
}

/// `now + duration`, saturating at the latest representable instant.
fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
