//! Persistent storage: the array archive, the KV store, the in-memory
//! minute cache, and the [`manager::StoreManager`] that routes reads and
//! writes across them (§4.2–§4.5 of the design).

pub mod array_store;
pub mod kv_store;
pub mod manager;
pub mod minute_cache;

pub use manager::{MemoryHint, StoreManager};
