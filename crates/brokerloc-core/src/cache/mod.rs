//! Persistence for the most recently resolved location.
//!
//! This module provides:
//! - `KeyValueStore`: string storage keyed by name (`FileStore`, `MemoryStore`)
//! - `LocationCache`: the TTL-checked location entry on top of a store
//!
//! Entries are JSON and considered stale after 30 minutes.

pub mod manager;
pub mod store;

pub use manager::{LocationCache, LOCATION_CACHE_TTL_MINUTES, LOCATION_STORAGE_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore};
