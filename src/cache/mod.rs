//! Offline resource cache.
//!
//! Requests are split into two tiers by locator:
//! - Dynamic (API) requests go network-first and fall back to the cache
//! - Static (page/asset) requests go cache-first and fill the cache on a miss
//!
//! Entries live in buckets named after a cache generation. Installing seeds the
//! current generation; activating deletes every other generation.

mod classify;
mod lifecycle;
mod storage;
mod strategy;
mod types;

pub use classify::{classify, RequestClass};
pub use lifecycle::{LifecycleController, SeedReport};
pub use storage::{Bucket, CacheStore, MemoryStore, SqliteStore};
pub use strategy::StrategyEngine;
pub use types::{
  CacheResult, CacheSource, CachedResponse, Headers, RequestKey, ResourceRequest, ResourceResponse,
  ResponseType,
};
