//! Adapters behind the domain ports: storage backends, clocks, merchant
//! credentials and event sinks.

pub mod clock;
pub mod events;
pub mod in_memory;
pub mod merchants;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
