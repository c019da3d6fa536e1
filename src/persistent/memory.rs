//! In-process persistent store.
//!
//! Stands in for the external store when none is configured, and in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::PersistentStore;
use crate::error::StoreError;

/// HashMap-backed store with per-key TTL in seconds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, (_, expires_at))| *expires_at > now && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries.len() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Glob match supporting `*` only.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !text.starts_with(first) || !text[first.len()..].ends_with(last) {
        return false;
    }

    let mut rest = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}
