//! Store-coordinated port allocation
//!
//! The allocator is stateless: every call goes to the store and nothing is
//! cached locally. Candidate ports are tried in ascending order with an atomic
//! create-if-absent write, and the first write that succeeds wins.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vncport_store::AllocationStore;

use crate::config::{AllocatorConfig, ConfigError, PortRange};
use crate::error::AllocatorError;

/// Shortest interval accepted by [`PortAllocator::spawn_purge_task`]
pub const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of range occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorStatus {
    pub range_start: u16,
    pub range_end: u16,
    pub capacity: usize,
    pub allocated: usize,
    pub available: usize,
}

/// Allocates tunnel ports from a fixed range through a shared store
#[derive(Clone)]
pub struct PortAllocator {
    store: Arc<dyn AllocationStore>,
    config: AllocatorConfig,
}

impl PortAllocator {
    /// Create an allocator over `store`
    pub fn new(
        store: Arc<dyn AllocationStore>,
        config: AllocatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn range(&self) -> PortRange {
        self.config.range
    }

    /// Total number of ports in the range
    pub fn capacity(&self) -> usize {
        self.config.range.capacity()
    }

    /// Reserve the lowest free port for `session_id`
    ///
    /// Returns [`AllocatorError::Exhausted`] once every port in the range has
    /// been tried. Never waits for a port to free up.
    pub async fn allocate(&self, session_id: &str) -> Result<u16, AllocatorError> {
        if session_id.is_empty() {
            return Err(AllocatorError::InvalidInput(
                "session id must not be empty".to_string(),
            ));
        }

        for port in self.config.range.iter() {
            let key = self.config.key_for(port);
            if self
                .store
                .set_if_absent(&key, session_id, self.config.ttl)
                .await?
            {
                info!("Allocated port {} for session {}", port, session_id);
                return Ok(port);
            }
            debug!("Port {} is taken, trying next", port);
        }

        let range = self.config.range;
        warn!(
            "Port range {} exhausted, cannot allocate for session {}",
            range, session_id
        );
        Err(AllocatorError::Exhausted {
            start: range.start(),
            end: range.end(),
        })
    }

    /// Delete the allocation for `port`, whoever owns it
    ///
    /// Releasing a free port is a no-op. No ownership check is made.
    pub async fn release(&self, port: u16) -> Result<(), AllocatorError> {
        self.check_port(port)?;
        self.store.delete(&self.config.key_for(port)).await?;
        info!("Released port {}", port);
        Ok(())
    }

    /// Session currently holding `port`, if any
    pub async fn owner(&self, port: u16) -> Result<Option<String>, AllocatorError> {
        self.check_port(port)?;
        Ok(self.store.get(&self.config.key_for(port)).await?)
    }

    /// Whether `port` holds a live allocation
    pub async fn is_allocated(&self, port: u16) -> Result<bool, AllocatorError> {
        self.check_port(port)?;
        Ok(self.store.exists(&self.config.key_for(port)).await?)
    }

    /// All live allocations, ordered by port
    pub async fn list_allocated(&self) -> Result<BTreeMap<u16, String>, AllocatorError> {
        let entries = self.store.scan_prefix(&self.config.key_prefix).await?;

        let mut allocations = BTreeMap::new();
        for (key, session_id) in entries {
            match self.config.port_from_key(&key) {
                Some(port) if self.config.range.contains(port) => {
                    allocations.insert(port, session_id);
                }
                _ => warn!(
                    "Ignoring allocation key outside of range {}: {}",
                    self.config.range, key
                ),
            }
        }
        Ok(allocations)
    }

    /// Occupancy of the range
    pub async fn status(&self) -> Result<AllocatorStatus, AllocatorError> {
        let allocated = self.list_allocated().await?.len();
        let capacity = self.capacity();
        Ok(AllocatorStatus {
            range_start: self.config.range.start(),
            range_end: self.config.range.end(),
            capacity,
            allocated,
            available: capacity.saturating_sub(allocated),
        })
    }

    /// Physically remove expired records from the store
    pub async fn purge_expired(&self) -> Result<u64, AllocatorError> {
        let purged = self.store.purge_expired().await?;
        if purged > 0 {
            info!("Purged {} expired port allocation(s)", purged);
        }
        Ok(purged)
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until aborted
    ///
    /// Intervals shorter than [`MIN_PURGE_INTERVAL`] are raised to it.
    pub fn spawn_purge_task(&self, interval: Duration) -> JoinHandle<()> {
        let interval = if interval < MIN_PURGE_INTERVAL {
            warn!(
                "Purge interval {:?} is too short, using {:?}",
                interval, MIN_PURGE_INTERVAL
            );
            MIN_PURGE_INTERVAL
        } else {
            interval
        };
        let allocator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = allocator.purge_expired().await {
                    error!("Failed to purge expired port allocations: {}", e);
                }
            }
        })
    }

    fn check_port(&self, port: u16) -> Result<(), AllocatorError> {
        if self.config.range.contains(port) {
            Ok(())
        } else {
            Err(AllocatorError::InvalidInput(format!(
                "port {} is outside of range {}",
                port, self.config.range
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vncport_store::{MemoryStore, StoreError};

    fn allocator(start: u16, end: u16) -> PortAllocator {
        let config = AllocatorConfig::new(PortRange::new(start, end).unwrap());
        PortAllocator::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    #[tokio::test]
    async fn test_allocate_and_release() {
        let allocator = allocator(9000, 9002);

        // Allocate all ports
        assert_eq!(allocator.allocate("a").await, Ok(9000));
        assert_eq!(allocator.allocate("b").await, Ok(9001));
        assert_eq!(allocator.allocate("c").await, Ok(9002));
        assert_eq!(
            allocator.allocate("d").await,
            Err(AllocatorError::Exhausted {
                start: 9000,
                end: 9002
            })
        );

        // Release one port
        allocator.release(9001).await.unwrap();
        assert_eq!(allocator.allocate("e").await, Ok(9001));
        assert_eq!(allocator.owner(9001).await.unwrap(), Some("e".to_string()));

        // Still no more available
        assert!(allocator.allocate("f").await.unwrap_err().is_exhausted());
    }

    #[tokio::test]
    async fn test_lowest_free_port_wins() {
        let allocator = allocator(9000, 9009);
        for i in 0..5 {
            allocator.allocate(&format!("s{}", i)).await.unwrap();
        }

        allocator.release(9003).await.unwrap();
        allocator.release(9001).await.unwrap();

        assert_eq!(allocator.allocate("x").await, Ok(9001));
        assert_eq!(allocator.allocate("y").await, Ok(9003));
        assert_eq!(allocator.allocate("z").await, Ok(9005));
    }

    #[tokio::test]
    async fn test_release_free_port_is_noop() {
        let allocator = allocator(9000, 9002);

        allocator.release(9001).await.unwrap();
        allocator.release(9001).await.unwrap();
        assert!(!allocator.is_allocated(9001).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let allocator = allocator(9000, 9002);

        assert!(matches!(
            allocator.allocate("").await,
            Err(AllocatorError::InvalidInput(_))
        ));
        assert!(matches!(
            allocator.release(8999).await,
            Err(AllocatorError::InvalidInput(_))
        ));
        assert!(matches!(
            allocator.owner(9003).await,
            Err(AllocatorError::InvalidInput(_))
        ));
        assert!(matches!(
            allocator.is_allocated(1).await,
            Err(AllocatorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_owner_and_is_allocated() {
        let allocator = allocator(9000, 9002);

        assert_eq!(allocator.owner(9000).await.unwrap(), None);
        assert!(!allocator.is_allocated(9000).await.unwrap());

        allocator.allocate("session-1").await.unwrap();

        assert_eq!(
            allocator.owner(9000).await.unwrap(),
            Some("session-1".to_string())
        );
        assert!(allocator.is_allocated(9000).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_allocation_is_reclaimed() {
        let config = AllocatorConfig::new(PortRange::new(9000, 9000).unwrap())
            .with_ttl(Duration::from_secs(60));
        let allocator = PortAllocator::new(Arc::new(MemoryStore::new()), config).unwrap();

        assert_eq!(allocator.allocate("forgotten").await, Ok(9000));
        assert!(allocator.allocate("waiting").await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(allocator.owner(9000).await.unwrap(), None);
        assert!(!allocator.is_allocated(9000).await.unwrap());
        assert!(allocator.list_allocated().await.unwrap().is_empty());

        assert_eq!(allocator.allocate("waiting").await, Ok(9000));
    }

    #[tokio::test]
    async fn test_list_allocated_and_status() {
        let store = Arc::new(MemoryStore::new());
        let config = AllocatorConfig::new(PortRange::new(9000, 9004).unwrap());
        let allocator = PortAllocator::new(store.clone(), config).unwrap();

        allocator.allocate("a").await.unwrap();
        allocator.allocate("b").await.unwrap();

        // Foreign and malformed keys under the same prefix are skipped
        let ttl = Duration::from_secs(60);
        store.set_if_absent("vnc_port:junk", "x", ttl).await.unwrap();
        store.set_if_absent("vnc_port:7000", "y", ttl).await.unwrap();
        store.set_if_absent("other:9002", "z", ttl).await.unwrap();

        let listed = allocator.list_allocated().await.unwrap();
        assert_eq!(
            listed.into_iter().collect::<Vec<_>>(),
            vec![(9000, "a".to_string()), (9001, "b".to_string())]
        );

        let status = allocator.status().await.unwrap();
        assert_eq!(status.capacity, 5);
        assert_eq!(status.allocated, 2);
        assert_eq!(status.available, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_sweeps_expired() {
        let store = Arc::new(MemoryStore::new());
        let config = AllocatorConfig::new(PortRange::new(9000, 9002).unwrap())
            .with_ttl(Duration::from_secs(5));
        let allocator = PortAllocator::new(store.clone(), config).unwrap();

        allocator.allocate("a").await.unwrap();
        allocator.allocate("b").await.unwrap();
        assert_eq!(store.len().await, 2);

        let handle = allocator.spawn_purge_task(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(store.is_empty().await);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_task_zero_interval_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let config = AllocatorConfig::new(PortRange::new(9000, 9002).unwrap())
            .with_ttl(Duration::from_secs(1));
        let allocator = PortAllocator::new(store.clone(), config).unwrap();
        allocator.allocate("a").await.unwrap();

        let handle = allocator.spawn_purge_task(Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(!handle.is_finished());
        assert!(store.is_empty().await);
        handle.abort();
    }

    #[test]
    fn test_invalid_ttl_rejected() {
        let config = AllocatorConfig::default().with_ttl(Duration::ZERO);
        assert!(PortAllocator::new(Arc::new(MemoryStore::new()), config).is_err());

        let config = AllocatorConfig::default().with_ttl(Duration::from_secs(u64::MAX));
        assert!(matches!(
            PortAllocator::new(Arc::new(MemoryStore::new()), config),
            Err(ConfigError::InvalidTtl(_))
        ));
    }

    struct UnreachableStore;

    #[async_trait]
    impl AllocationStore for UnreachableStore {
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn scan_prefix(&self, _: &str) -> Result<Vec<(String, String)>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        async fn purge_expired(&self) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_not_exhaustion() {
        let allocator =
            PortAllocator::new(Arc::new(UnreachableStore), AllocatorConfig::default()).unwrap();

        let err = allocator.allocate("session").await.unwrap_err();
        assert!(matches!(err, AllocatorError::StoreUnavailable(_)));
        assert!(!err.is_exhausted());

        assert!(matches!(
            allocator.release(8080).await,
            Err(AllocatorError::StoreUnavailable(_))
        ));
        assert!(matches!(
            allocator.list_allocated().await,
            Err(AllocatorError::StoreUnavailable(_))
        ));
        assert!(matches!(
            allocator.status().await,
            Err(AllocatorError::StoreUnavailable(_))
        ));
    }
}
