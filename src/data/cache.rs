//! Time-based validity for the generic cache and collection staleness.
//!
//! Expiry is lazy: an expired entry reads as absent but stays in the map until
//! it is cleared or overwritten.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// TTL used by `set_cache_default`.
pub fn default_cache_ttl() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(data: Value, timestamp: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            data,
            timestamp,
            ttl,
        }
    }

    /// Valid while `now - timestamp < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp < self.ttl
    }

    pub fn value_at(&self, now: DateTime<Utc>) -> Option<&Value> {
        self.is_valid_at(now).then_some(&self.data)
    }
}

/// Stale when never fetched or fetched more than `max_age` ago.
pub fn is_stale(last_fetch: Option<DateTime<Utc>>, now: DateTime<Utc>, max_age: Duration) -> bool {
    match last_fetch {
        None => true,
        Some(at) => now - at > max_age,
    }
}
