//! Generational cache store for captured responses.
//!
//! The store is the only state that survives across agent generations:
//! - Entries are keyed by normalized request identity
//! - Generations are named partitions, replaced wholesale on deployment
//! - No key-level eviction; cleanup is whole-generation deletion

mod storage;
mod traits;

pub use storage::SqliteStore;
pub use traits::{CacheEntry, CacheStore};
