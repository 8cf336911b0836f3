//! # Embedding Cache
//!
//! Tiered, distributed cache for computed embeddings, keyed by
//! `(model name, text)`. Repeated requests for the same pair skip the
//! expensive provider round trip.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         CacheController                           │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  MemoryTier          DistributedTier              FileTier        │
//! │  bounded LRU    ◄──  shared kv + pub/sub    ◄──   one JSON file   │
//! │  in-process          across instances             per entry       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads walk the tiers fastest-first and promote hits upward; writes fan
//! out to every enabled tier. Instances stay loosely consistent through
//! best-effort invalidation notices on a shared pub/sub channel — every
//! tier re-validates freshness at read time, so a lost notice can only
//! cause a briefly stale memory-tier hit, never a wrong answer that
//! persists.
//!
//! The cache never computes embeddings. [`CachedEmbedder`] shows the
//! owning layer's contract: `get`, compute on miss, `set`.

pub mod compression;
pub mod config;
pub mod controller;
pub mod distributed;
pub mod embedder;
pub mod entry;
pub mod error;
pub mod events;
pub mod file;
pub mod key;
pub mod memory;
pub mod stats;
pub mod store;
pub mod ttl;

pub use config::{CacheConfig, PromotionStrategy};
pub use controller::CacheController;
pub use distributed::DistributedTier;
pub use embedder::CachedEmbedder;
pub use entry::{CacheEntry, StoredRecord, VectorPayload};
pub use error::{CacheError, Result};
pub use events::{InvalidationEvent, InvalidationKind};
pub use file::FileTier;
pub use key::CacheKey;
pub use memory::MemoryTier;
pub use stats::{CacheStatsSnapshot, TierStatsSnapshot};
pub use store::{MemoryStore, RedisStore, RemoteStore};
