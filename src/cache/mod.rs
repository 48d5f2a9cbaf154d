//! Cache module for storing acquisition results
//!
//! A [`FreshnessCache`] keeps the latest payload for each mode together with
//! its write time and decides whether it is still fresh. The bytes themselves
//! go through a pluggable [`Store`]: in memory for a single process, or on
//! disk with an expiry so a dead background worker degrades readers to
//! "no data" instead of serving old boards forever.

mod freshness;
mod store;

pub use freshness::{CacheEntry, Freshness, FreshnessCache};
pub use store::{CacheError, FileStore, MemoryStore, Store};
