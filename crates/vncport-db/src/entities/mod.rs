//! Database entities

pub mod port_allocation;
