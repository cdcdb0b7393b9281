//! Adapters behind the domain ports: stores, panel and gateway clients.

pub mod gateway;
pub mod in_memory;
pub mod notifier;
pub mod panel;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod session;
