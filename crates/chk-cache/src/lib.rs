//! Caches used while building and reading CHK trees.
//!
//! # Architecture
//!
//! - [`LruCache`]: least-recently-used cache whose entries live in an arena
//!   and link to each other by index. Bounded either by entry count or by a
//!   caller-supplied weight (byte size, usually).
//! - [`BlobCache`]: tiered cache for blob payloads during bulk import.
//!   Blobs expected to be read more than once are kept "sticky" in memory
//!   until their reference count runs out, and spill to temporary files when
//!   the sticky tier outgrows its budget.

pub mod blob;
pub mod config;
pub mod error;
pub mod lru;
pub mod stats;

pub use blob::BlobCache;
pub use config::BlobCacheConfig;
pub use error::{CacheError, CacheResult};
pub use lru::LruCache;
pub use stats::CacheStats;
