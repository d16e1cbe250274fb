//! Store trait and error type

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a backing store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connection refused, pool exhausted, ...)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but the operation failed
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Key-value store with per-entry expiry
///
/// Expired entries are invisible to every read and are treated as absent by
/// `set_if_absent`, whether or not `purge_expired` has physically removed them.
///
/// # Example
/// ```ignore
/// let store: Arc<dyn AllocationStore> = Arc::new(MemoryStore::new());
///
/// if store.set_if_absent("vnc_port:8080", "session-1", ttl).await? {
///     // port 8080 now belongs to session-1 until the ttl elapses
/// }
/// ```
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Atomically create `key` with `value` unless a live entry already exists
    ///
    /// Returns `true` if this call wrote the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Get the live value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Check whether a live entry exists under `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all live entries whose key starts with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Physically remove expired entries, returning how many were dropped
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}
