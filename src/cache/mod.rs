//! Persistent cache for application state.
//!
//! The cache is advisory: absence is never authoritative and the backend
//! remains the source of truth. Stores hydrate from it for fast startup and
//! mirror their last-known-good state back into it after committed changes.

mod layer;
mod storage;

pub use layer::{Cache, CacheKey, CACHE_PREFIX, CACHE_VERSION};
pub use storage::{KvStorage, MemoryStorage, NoopStorage, SqliteStorage};
