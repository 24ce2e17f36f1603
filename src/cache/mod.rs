// Cache module for the on-disk response store.
// Maps request identifiers to atomically published body files plus an
// informational sidecar, under one cache root.

pub mod paths;
pub mod store;

pub use paths::{CacheKey, default_cache_root};
pub use store::{CacheStore, EntryMeta};
