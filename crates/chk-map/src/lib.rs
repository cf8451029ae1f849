//! Content-addressed hash-tree map (CHK map).
//!
//! A persistent map from tuple keys to byte values, stored as a tree of
//! immutable nodes. Each node is serialised to bytes and written to a
//! [`chk_store::ContentStore`] under the SHA-1 of those bytes, so equal
//! subtrees share storage and two maps with the same entries and
//! parameters have the same root key regardless of how they were built.
//!
//! # Architecture
//!
//! - [`ChkMap`]: the handle callers use (`map`, `unmap`, `get`,
//!   `iter_items`, `save`, `apply_delta`, `iter_changes`).
//! - [`LeafNode`] / [`InternalNode`]: entries, and routing on fixed-width
//!   prefixes of each key's search key ([`SearchKeyFormat`]).
//! - [`codec`]: the `chkleaf:` / `chknode:` text format.
//! - [`NodeSource`] + [`PageCache`]: reading nodes through a byte-bounded
//!   cache of serialised pages.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chk_map::{ChkMap, ChkMapConfig};
//! use chk_store::InMemoryContentStore;
//! use chk_types::Key;
//!
//! let store = Arc::new(InMemoryContentStore::new());
//! let mut map = ChkMap::new(store, ChkMapConfig::default()).unwrap();
//! map.map(Key::from("file-id"), "contents").unwrap();
//! let root = map.save().unwrap();
//! assert_eq!(map.get(&Key::from("file-id")).unwrap(), b"contents");
//! assert_eq!(map.key(), Some(root));
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod iter;
pub mod map;
pub mod node;
pub mod page_cache;
pub mod search_key;
pub mod source;

pub use config::ChkMapConfig;
pub use error::{ChkError, ChkResult};
pub use iter::Iter;
pub use map::{Change, CheckReport, ChkMap, DeltaEntry};
pub use node::{ChildRef, InternalNode, LeafNode, Node, NodeParams, NodeView, PersistedNode};
pub use page_cache::PageCache;
pub use search_key::SearchKeyFormat;
pub use source::NodeSource;
