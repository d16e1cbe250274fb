//! Shared key-value storage for port allocation records
//!
//! Every process that hands out ports talks to the same store. The store is
//! the only coordination medium: mutual exclusion comes entirely from
//! [`AllocationStore::set_if_absent`], which must create an entry with an
//! expiry as one indivisible operation.
//!
//! Backends:
//! - [`MemoryStore`] - in-process map, for single-node deployments and tests
//! - `vncport-db` - SQLite/PostgreSQL via SeaORM, shared across processes

pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{AllocationStore, StoreError};
