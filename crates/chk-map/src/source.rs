use std::sync::Arc;

use chk_store::ContentStore;
use chk_types::ContentKey;
use tracing::debug;

use crate::codec;
use crate::error::ChkResult;
use crate::node::{ChildRef, Node, NodeView, PersistedNode};
use crate::page_cache::PageCache;
use crate::search_key::SearchKeyFormat;

/// Reads and writes nodes for one map: the content store, the page cache
/// in front of it, and the search key format nodes are parsed with.
#[derive(Clone)]
pub struct NodeSource {
    store: Arc<dyn ContentStore>,
    pages: PageCache,
    format: SearchKeyFormat,
}

impl NodeSource {
    pub fn new(store: Arc<dyn ContentStore>, pages: PageCache, format: SearchKeyFormat) -> Self {
        Self {
            store,
            pages,
            format,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn pages(&self) -> &PageCache {
        &self.pages
    }

    pub fn format(&self) -> SearchKeyFormat {
        self.format
    }

    /// Serialised bytes of a node, from the page cache when present.
    pub fn read_bytes(&self, key: &ContentKey) -> ChkResult<Arc<[u8]>> {
        if let Some(bytes) = self.pages.get(key) {
            return Ok(bytes);
        }
        let bytes: Arc<[u8]> = self.store.get(key)?.into();
        self.pages.insert(*key, bytes.clone());
        Ok(bytes)
    }

    pub fn load(&self, key: &ContentKey) -> ChkResult<Arc<PersistedNode>> {
        let bytes = self.read_bytes(key)?;
        let node = codec::deserialise(&bytes, Some(*key), self.format)?;
        Ok(Arc::new(PersistedNode::new(*key, node)))
    }

    /// Borrow the node behind `child`, loading it if needed.
    pub fn view<'a>(&self, child: &'a ChildRef) -> ChkResult<NodeView<'a>> {
        match child {
            ChildRef::Stored(key) => Ok(NodeView::Shared(self.load(key)?)),
            ChildRef::Loaded(node) => Ok(NodeView::Shared(node.clone())),
            ChildRef::Dirty(node) => Ok(NodeView::Borrowed(node)),
        }
    }

    /// Take ownership of the node behind `child` for modification.
    pub fn take(&self, child: ChildRef) -> ChkResult<Node> {
        let shared = match child {
            ChildRef::Dirty(node) => return Ok(*node),
            ChildRef::Loaded(node) => node,
            ChildRef::Stored(key) => self.load(&key)?,
        };
        Ok(match Arc::try_unwrap(shared) {
            Ok(persisted) => persisted.into_node(),
            Err(shared) => shared.node().clone(),
        })
    }

    /// Write `node` and every unsaved node below it, children first.
    pub fn persist(&self, node: Node) -> ChkResult<Arc<PersistedNode>> {
        let node = match node {
            Node::Internal(mut internal) => {
                let children = std::mem::take(&mut internal.children);
                for (slot, child) in children {
                    let child = match child {
                        ChildRef::Dirty(node) => ChildRef::Loaded(self.persist(*node)?),
                        saved => saved,
                    };
                    internal.children.insert(slot, child);
                }
                Node::Internal(internal)
            }
            leaf => leaf,
        };
        let bytes = codec::serialise(&node)?;
        let key = self.store.put(&bytes)?;
        debug!(
            key = %key,
            bytes = bytes.len(),
            internal = node.is_internal(),
            items = node.len(),
            "wrote node"
        );
        self.pages.insert(key, bytes.into());
        Ok(Arc::new(PersistedNode::new(key, node)))
    }
}

impl std::fmt::Debug for NodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSource")
            .field("pages", &self.pages)
            .field("format", &self.format)
            .finish()
    }
}
