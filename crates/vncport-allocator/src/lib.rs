//! Port allocator for VNC-over-SSH tunnel sessions
//!
//! Hands out one port per session from a fixed inclusive range. Allocation
//! state lives only in a shared [`AllocationStore`], so any number of backend
//! processes can allocate from the same range without colliding and without
//! an in-process lock.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vncport_allocator::{AllocatorConfig, PortAllocator};
//! use vncport_store::MemoryStore;
//!
//! let allocator = PortAllocator::new(Arc::new(MemoryStore::new()), AllocatorConfig::default())?;
//!
//! let port = allocator.allocate("session-42").await?;
//! // ... open the tunnel on `port` ...
//! allocator.release(port).await?;
//! ```

pub mod allocator;
pub mod config;
pub mod error;

pub use allocator::{AllocatorStatus, PortAllocator, MIN_PURGE_INTERVAL};
pub use config::{
    AllocatorConfig, ConfigError, PortRange, DEFAULT_KEY_PREFIX, DEFAULT_PORT_RANGE_END,
    DEFAULT_PORT_RANGE_START, DEFAULT_TTL, MAX_TTL,
};
pub use error::AllocatorError;
pub use vncport_store::{AllocationStore, StoreError};
