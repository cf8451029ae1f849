//! Content-addressed blob storage for CHK nodes.
//!
//! Every serialised CHK node is stored as an immutable blob identified by
//! the SHA-1 hash of its bytes, rendered `sha1:<hex>`. The store never
//! interprets blob contents.
//!
//! # Storage Backends
//!
//! All backends implement the [`ContentStore`] trait:
//!
//! - [`InMemoryContentStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written (content-addressing guarantees this).
//! 2. Writing the same bytes twice is a no-op that returns the same key.
//! 3. Concurrent reads are always safe.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryContentStore;
pub use traits::ContentStore;
