//! In-process counter store.
//!
//! Suitable for a single instance and for tests. Counters and blocks carry
//! their own expiry instants and read as absent once it passes, so no
//! background sweeper is needed for correctness.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::store::CounterStore;
use crate::error::{BouncerError, Result};

/// Longest expiry the store tracks; longer durations are clamped to it.
const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The instant `duration` after `now`, clamped to [`MAX_EXPIRY`].
fn deadline(now: Instant, duration: Duration) -> Result<Instant> {
    now.checked_add(duration.min(MAX_EXPIRY)).ok_or_else(|| {
        BouncerError::StorageUnavailable(format!("expiry of {:?} is out of range", duration))
    })
}

/// A window counter with its expiry.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Counter store backed by concurrent in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Window counters indexed by rate key
    counters: DashMap<String, CounterEntry>,
    /// Block expiry instants indexed by rate key
    blocks: DashMap<String, Instant>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop counters and blocks whose expiry has passed.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len() + self.blocks.len();

        self.counters.retain(|_, entry| !entry.is_expired(now));
        self.blocks.retain(|_, until| *until > now);

        let removed = before.saturating_sub(self.counters.len() + self.blocks.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired entries");
        }
        removed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BouncerError::StorageUnavailable(
                "memory store is closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64> {
        self.ensure_open()?;
        let now = Instant::now();
        let expires_at = deadline(now, window)?;

        // The entry guard holds the shard lock, so the reset check, the
        // increment and the expiry refresh happen as one step.
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: now,
            });

        if entry.is_expired(now) {
            entry.count = 0;
        }
        entry.count += 1;
        entry.expires_at = expires_at;

        trace!(key = %key, count = entry.count, "Incremented counter");
        Ok(entry.count)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        self.ensure_open()?;
        let now = Instant::now();

        Ok(self
            .counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn set_block(&self, key: &str, duration: Duration) -> Result<()> {
        self.ensure_open()?;
        let until = deadline(Instant::now(), duration)?;
        self.blocks.insert(key.to_string(), until);
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let now = Instant::now();

        match self.blocks.get(key).map(|until| *until) {
            Some(until) if until > now => Ok(true),
            Some(_) => {
                self.blocks.remove_if(key, |_, until| *until <= now);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.clear();
            self.blocks.clear();
            debug!("Memory store closed");
        }
        Ok(())
    }
}
