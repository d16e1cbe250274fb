//! In-process allocation store
//!
//! Holds entries in a mutex-guarded map. Expiry uses `tokio::time::Instant`,
//! so paused-clock tests can advance past a TTL without sleeping.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::store::{AllocationStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Allocation store backed by a local map
///
/// Only processes sharing the same `MemoryStore` instance are coordinated.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of entries held, including expired ones not yet purged
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store holds no entries at all
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AllocationStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| StoreError::Backend(format!("TTL out of range: {:?}", ttl)))?;
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(key) {
            if existing.is_live(now) {
                return Ok(false);
            }
            debug!("Overwriting expired entry {}", key);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries.get(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}
