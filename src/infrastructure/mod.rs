//! Adapters implementing the domain ports.

pub mod coordination;
pub mod in_memory;
#[cfg(feature = "store-postgres")]
pub mod postgres;
pub mod psp;
#[cfg(feature = "lock-zookeeper")]
pub mod zookeeper;
