//! Cache Entry Module
//!
//! Defines the structure for individual fast-tier entries with TTL support.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Size charged for a value that cannot be serialized.
pub const FALLBACK_ENTRY_SIZE: usize = 1024;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// When the entry was inserted (or last re-set)
    pub inserted_at: Instant,
    /// Last successful `get`
    pub last_accessed_at: Instant,
    /// Lifetime measured from `inserted_at`
    pub ttl: Duration,
    /// Approximate size in bytes
    pub size: usize,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Lifetime of the entry
    /// * `size` - Approximate size in bytes
    /// * `now` - Insertion instant
    pub fn new(value: V, ttl: Duration, size: usize, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            last_accessed_at: now,
            ttl,
            size,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL, or None once the entry has expired.
    ///
    /// Remaining TTL is `ttl - (now - inserted_at)`; zero counts as expired.
    pub fn remaining_ttl(&self, now: Instant) -> Option<Duration> {
        let age = now.saturating_duration_since(self.inserted_at);
        self.ttl.checked_sub(age).filter(|left| !left.is_zero())
    }

    // == Is Expired ==
    pub fn is_expired(&self, now: Instant) -> bool {
        self.remaining_ttl(now).is_none()
    }

    /// How long the entry has been expired, zero if still live.
    pub fn expired_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at + self.ttl)
    }
}

// == Utility Functions ==
/// Encodes a value as JSON and reports its approximate size.
///
/// The size is the encoded length, or [`FALLBACK_ENTRY_SIZE`] when the value
/// cannot be serialized (in which case no encoding is returned).
pub fn encode_value<V: Serialize>(value: &V) -> (Option<String>, usize) {
    match serde_json::to_string(value) {
        Ok(encoded) => {
            let size = encoded.len();
            (Some(encoded), size)
        }
        Err(_) => (None, FALLBACK_ENTRY_SIZE),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_entry_creation() {
        let now = Instant::now();
        let entry = CacheEntry::new("test_value".to_string(), Duration::from_secs(60), 12, now);

        assert_eq!(entry.value, "test_value");
        assert_eq!(entry.inserted_at, now);
        assert_eq!(entry.last_accessed_at, now);
        assert!(!entry.is_expired(now));
    }

    #[test]
    fn test_remaining_ttl() {
        let now = Instant::now();
        let entry = CacheEntry::new((), Duration::from_secs(10), 0, now);

        let later = now + Duration::from_secs(4);
        assert_eq!(entry.remaining_ttl(later), Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Instant::now();
        let entry = CacheEntry::new((), Duration::from_secs(10), 0, now);

        assert!(!entry.is_expired(now + Duration::from_millis(9_999)));
        // Remaining TTL of exactly zero is expired
        assert!(entry.is_expired(now + Duration::from_secs(10)));
        assert!(entry.is_expired(now + Duration::from_secs(11)));
    }

    #[test]
    fn test_expired_for() {
        let now = Instant::now();
        let entry = CacheEntry::new((), Duration::from_secs(10), 0, now);

        assert_eq!(entry.expired_for(now + Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(
            entry.expired_for(now + Duration::from_secs(25)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_encode_value_uses_json_length() {
        assert_eq!(encode_value(&"abc"), (Some("\"abc\"".to_string()), 5));
        assert_eq!(encode_value(&vec![1, 2, 3]).1, 7);
    }

    #[test]
    fn test_encode_value_fallback() {
        // Non-string map keys cannot be encoded as JSON
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        assert_eq!(encode_value(&map), (None, FALLBACK_ENTRY_SIZE));
    }
}
