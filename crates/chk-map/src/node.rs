//! In-memory node types for the CHK map.
//!
//! A tree is made of [`LeafNode`]s holding the entries and
//! [`InternalNode`]s routing on fixed-width prefixes of each key's search
//! key. Children are referenced through [`ChildRef`], which tracks whether a
//! child is only known by its content key, has been loaded from the store,
//! or has been modified and not yet saved.
//!
//! Mutating operations consume the node and hand back its replacement, so a
//! node that has been written to the store ([`PersistedNode`]) is never
//! changed in place; mutating one first copies it out of its `Arc`.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use chk_types::{ContentKey, Key};
use tracing::debug;

use crate::error::{ChkError, ChkResult};
use crate::search_key::SearchKeyFormat;
use crate::source::NodeSource;

/// A leaf that shrank to fewer bytes than this triggers a remap check.
const INTERESTING_NEW_SIZE: usize = 50;
/// A leaf that shrank by more bytes than this triggers a remap check.
const INTERESTING_SHRINKAGE_LIMIT: usize = 20;

/// Parameters shared by every node of one tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeParams {
    /// Serialised size above which a leaf splits. Zero means unlimited.
    pub maximum_size: usize,
    pub key_width: usize,
    pub format: SearchKeyFormat,
}

/// Longest common prefix of two byte strings.
pub fn common_prefix<'a>(prefix: &'a [u8], key: &[u8]) -> &'a [u8] {
    let len = prefix
        .iter()
        .zip(key)
        .take_while(|(a, b)| a == b)
        .count();
    &prefix[..len]
}

/// Longest common prefix of all `keys`, or `None` when there are none.
pub fn common_prefix_for<I, T>(keys: I) -> Option<Vec<u8>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut common: Option<Vec<u8>> = None;
    for key in keys {
        match common.as_mut() {
            None => common = Some(key.as_ref().to_vec()),
            Some(prefix) => {
                let len = common_prefix(prefix, key.as_ref()).len();
                prefix.truncate(len);
            }
        }
    }
    common
}

fn digits(n: usize) -> usize {
    let mut n = n;
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

/// Number of lines a value occupies once serialised with its trailing
/// newline.
pub(crate) fn value_line_count(value: &[u8]) -> usize {
    value.iter().filter(|&&b| b == b'\n').count() + 1
}

// ---------------------------------------------------------------------------
// Map results
// ---------------------------------------------------------------------------

/// What a node turned into after an insert.
///
/// A single node replaces the original in place. Several nodes mean the
/// original overflowed; they belong under a new internal node whose search
/// prefix is `prefix`, each at its slot.
#[derive(Debug)]
pub(crate) struct MapOutcome {
    pub(crate) prefix: Vec<u8>,
    pub(crate) nodes: Vec<(Vec<u8>, Node)>,
}

impl MapOutcome {
    fn single(node: Node) -> Self {
        Self {
            prefix: node.search_prefix().unwrap_or_default().to_vec(),
            nodes: vec![(Vec::new(), node)],
        }
    }

    /// Collapse the outcome into one node, building the internal node when
    /// the original split.
    pub(crate) fn into_node(mut self) -> Node {
        if self.nodes.len() == 1 {
            if let Some((_, node)) = self.nodes.pop() {
                return node;
            }
        }
        let params = match self.nodes.first() {
            Some((_, node)) => node.params(),
            None => unreachable!("map outcome without nodes"),
        };
        let mut internal = InternalNode::new(self.prefix, params);
        for (slot, node) in self.nodes {
            internal.add_node(slot, node);
        }
        Node::Internal(internal)
    }
}

// ---------------------------------------------------------------------------
// LeafNode
// ---------------------------------------------------------------------------

/// A node holding key/value entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    params: NodeParams,
    items: BTreeMap<Key, Vec<u8>>,
    /// Serialised size of all entries without prefix compression.
    raw_size: usize,
    common_serialised_prefix: Option<Vec<u8>>,
    search_prefix: Option<Vec<u8>>,
}

impl LeafNode {
    pub fn new(params: NodeParams) -> Self {
        Self {
            params,
            items: BTreeMap::new(),
            raw_size: 0,
            common_serialised_prefix: None,
            search_prefix: None,
        }
    }

    /// Build a leaf holding `items` without splitting it.
    pub(crate) fn from_items(params: NodeParams, items: BTreeMap<Key, Vec<u8>>) -> Self {
        let mut leaf = Self::new(params);
        leaf.raw_size = items.iter().map(|(k, v)| key_value_len(k, v)).sum();
        leaf.items = items;
        leaf.recompute_prefixes();
        leaf
    }

    pub fn params(&self) -> NodeParams {
        self.params
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&[u8]> {
        self.items.get(key).map(Vec::as_slice)
    }

    pub fn items(&self) -> &BTreeMap<Key, Vec<u8>> {
        &self.items
    }

    /// Longest common prefix of the entries' search keys.
    pub fn search_prefix(&self) -> Option<&[u8]> {
        self.search_prefix.as_deref()
    }

    /// Longest common prefix of the entries' serialised keys, written once
    /// in the node header.
    pub fn common_serialised_prefix(&self) -> Option<&[u8]> {
        self.common_serialised_prefix.as_deref()
    }

    /// Size in bytes of this leaf once serialised.
    pub fn current_size(&self) -> usize {
        let (prefix_len, bytes_for_items) = match &self.common_serialised_prefix {
            None => (0, 0),
            Some(prefix) => (prefix.len(), self.raw_size - prefix.len() * self.items.len()),
        };
        9 + digits(self.params.maximum_size)
            + 1
            + digits(self.params.key_width)
            + 1
            + digits(self.items.len())
            + 1
            + prefix_len
            + 1
            + bytes_for_items
    }

    fn search_key(&self, key: &Key) -> Vec<u8> {
        self.params.format.search_key(key)
    }

    fn recompute_prefixes(&mut self) {
        let format = self.params.format;
        self.search_prefix = common_prefix_for(self.items.keys().map(|k| format.search_key(k)));
        self.common_serialised_prefix = common_prefix_for(self.items.keys().map(Key::serialise));
    }

    fn search_keys_identical(&self) -> bool {
        let mut keys = self.items.keys().map(|k| self.search_key(k));
        match keys.next() {
            Some(first) => keys.all(|k| k == first),
            None => true,
        }
    }

    /// Whether the leaf is over its size limit and its entries can be
    /// separated by a longer prefix.
    pub(crate) fn needs_split(&self) -> bool {
        self.items.len() > 1
            && self.params.maximum_size > 0
            && self.current_size() > self.params.maximum_size
            && !self.search_keys_identical()
    }

    /// Insert an entry that is not already present and report whether the
    /// leaf now needs splitting.
    ///
    /// A leaf whose entries all share one search key never asks to split,
    /// since no prefix could separate them.
    pub(crate) fn map_no_split(&mut self, key: Key, value: Vec<u8>) -> bool {
        let serialised = key.serialise();
        let search_key = self.search_key(&key);
        self.raw_size += key_value_len(&key, &value);
        self.items.insert(key, value);
        self.common_serialised_prefix = Some(match self.common_serialised_prefix.take() {
            None => serialised,
            Some(prefix) => common_prefix(&prefix, &serialised).to_vec(),
        });
        let search_prefix = match self.search_prefix.take() {
            None => search_key.clone(),
            Some(prefix) => common_prefix(&prefix, &search_key).to_vec(),
        };
        let overflow = self.items.len() > 1
            && self.params.maximum_size > 0
            && self.current_size() > self.params.maximum_size
            && (search_key != search_prefix || !self.search_keys_identical());
        self.search_prefix = Some(search_prefix);
        overflow
    }

    pub(crate) fn map(
        mut self,
        src: &NodeSource,
        key: Key,
        value: Vec<u8>,
    ) -> ChkResult<MapOutcome> {
        if let Some(old) = self.items.remove(&key) {
            self.raw_size -= key_value_len(&key, &old);
        }
        if self.map_no_split(key, value) {
            self.split(src)
        } else {
            Ok(MapOutcome::single(Node::Leaf(self)))
        }
    }

    /// Redistribute the entries into leaves one byte deeper than the
    /// common search prefix.
    pub(crate) fn split(self, src: &NodeSource) -> ChkResult<MapOutcome> {
        let common = self.search_prefix.clone().unwrap_or_default();
        let split_at = common.len() + 1;
        let params = self.params;
        let mut slots: BTreeMap<Vec<u8>, Node> = BTreeMap::new();
        for (key, value) in self.items {
            let mut slot = params.format.search_key(&key);
            slot.resize(split_at, b'\x00');
            let node = slots
                .remove(&slot)
                .unwrap_or_else(|| Node::Leaf(LeafNode::new(params)));
            let node = node.map(src, key, value)?.into_node();
            slots.insert(slot, node);
        }
        debug!(
            prefix = %String::from_utf8_lossy(&common),
            parts = slots.len(),
            "split leaf"
        );
        Ok(MapOutcome {
            prefix: common,
            nodes: slots.into_iter().collect(),
        })
    }

    pub(crate) fn unmap(mut self, key: &Key) -> ChkResult<LeafNode> {
        let value = self
            .items
            .remove(key)
            .ok_or_else(|| ChkError::NotFound(key.clone()))?;
        self.raw_size -= key_value_len(key, &value);
        self.recompute_prefixes();
        Ok(self)
    }

    /// Entries selected by `filter`, in key order.
    ///
    /// Filter keys as wide as the map's keys match exactly; shorter ones
    /// match every key that starts with them.
    pub fn matching_items(&self, filter: Option<&[Key]>) -> Vec<(Key, Vec<u8>)> {
        let Some(filter) = filter else {
            return self
                .items
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        };
        let (exact, prefixes): (Vec<&Key>, Vec<&Key>) = filter
            .iter()
            .partition(|k| k.width() == self.params.key_width);
        let mut out: BTreeMap<&Key, &Vec<u8>> = exact
            .into_iter()
            .filter_map(|k| self.items.get_key_value(k))
            .collect();
        if !prefixes.is_empty() {
            for (key, value) in &self.items {
                if prefixes.iter().any(|p| key.starts_with(p)) {
                    out.insert(key, value);
                }
            }
        }
        out.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Bytes one entry adds to a leaf before prefix compression.
pub(crate) fn key_value_len(key: &Key, value: &[u8]) -> usize {
    key.serialise().len() + 1 + digits(value_line_count(value)) + 1 + value.len() + 1
}

// ---------------------------------------------------------------------------
// InternalNode
// ---------------------------------------------------------------------------

/// A node routing keys to children by a fixed-width search key prefix.
///
/// Every child sits at a slot exactly one byte longer than the node's
/// search prefix. Keys whose search key is shorter than a slot are padded
/// with `\x00`.
#[derive(Clone, Debug)]
pub struct InternalNode {
    params: NodeParams,
    pub(crate) children: BTreeMap<Vec<u8>, ChildRef>,
    /// Total entries below this node.
    pub(crate) len: usize,
    search_prefix: Vec<u8>,
}

impl InternalNode {
    pub fn new(search_prefix: Vec<u8>, params: NodeParams) -> Self {
        Self {
            params,
            children: BTreeMap::new(),
            len: 0,
            search_prefix,
        }
    }

    pub(crate) fn from_parts(
        search_prefix: Vec<u8>,
        params: NodeParams,
        len: usize,
        children: BTreeMap<Vec<u8>, ChildRef>,
    ) -> Self {
        Self {
            params,
            children,
            len,
            search_prefix,
        }
    }

    pub fn params(&self) -> NodeParams {
        self.params
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn search_prefix(&self) -> &[u8] {
        &self.search_prefix
    }

    /// Width of every child slot.
    pub fn node_width(&self) -> usize {
        self.search_prefix.len() + 1
    }

    pub fn children(&self) -> &BTreeMap<Vec<u8>, ChildRef> {
        &self.children
    }

    /// Add a freshly built child at `slot`.
    pub(crate) fn add_node(&mut self, slot: Vec<u8>, node: Node) {
        debug_assert!(slot.starts_with(&self.search_prefix));
        debug_assert_eq!(slot.len(), self.node_width());
        self.len += node.len();
        self.children.insert(slot, ChildRef::Dirty(Box::new(node)));
    }

    /// The slot a search key routes to.
    fn slot_for(&self, search_key: &[u8]) -> Vec<u8> {
        let width = self.node_width();
        let mut slot = search_key[..search_key.len().min(width)].to_vec();
        slot.resize(width, b'\x00');
        slot
    }

    pub(crate) fn map(
        mut self,
        src: &NodeSource,
        key: Key,
        value: Vec<u8>,
    ) -> ChkResult<MapOutcome> {
        let search_key = self.params.format.search_key(&key);
        if !search_key.starts_with(&self.search_prefix) {
            // The key does not fit under this node: hang this node under a
            // new parent at the common prefix and map into that instead.
            let new_prefix = common_prefix(&self.search_prefix, &search_key).to_vec();
            let slot = self.search_prefix[..new_prefix.len() + 1].to_vec();
            let mut parent = InternalNode::new(new_prefix, self.params);
            parent.add_node(slot, Node::Internal(self));
            return parent.map(src, key, value);
        }

        let slot = self.slot_for(&search_key);
        let child = match self.children.remove(&slot) {
            Some(child) => src.take(child)?,
            None => Node::Leaf(LeafNode::new(self.params)),
        };
        let old_len = child.len();
        let old_size = match &child {
            Node::Leaf(leaf) => Some(leaf.current_size()),
            Node::Internal(_) => None,
        };

        let outcome = child.map(src, key, value)?;
        if outcome.nodes.len() > 1 {
            // The child overflowed; route to its pieces through a new
            // internal node.
            let child = outcome.into_node();
            self.len = self.len - old_len + child.len();
            self.children.insert(slot, ChildRef::Dirty(Box::new(child)));
            return Ok(MapOutcome::single(Node::Internal(self)));
        }

        let child = outcome.into_node();
        self.len = self.len - old_len + child.len();
        let remap = match (&child, old_size) {
            (Node::Leaf(_), None) => {
                debug!("checking remap as internal node collapsed to a leaf");
                true
            }
            (Node::Leaf(leaf), Some(old_size)) => {
                let new_size = leaf.current_size();
                let shrinkage = old_size.saturating_sub(new_size);
                let check = (shrinkage > 0 && new_size < INTERESTING_NEW_SIZE)
                    || shrinkage > INTERESTING_SHRINKAGE_LIMIT;
                if check {
                    debug!(shrinkage, new_size, "checking remap as leaf shrank");
                }
                check
            }
            (Node::Internal(_), _) => false,
        };
        self.children.insert(slot, ChildRef::Dirty(Box::new(child)));
        let node = if remap {
            self.check_remap(src)?
        } else {
            Node::Internal(self)
        };
        Ok(MapOutcome::single(node))
    }

    /// Remove `key` from the subtree.
    ///
    /// Returns the replacement for this node: this node itself, the only
    /// child left once a sibling emptied, or a leaf holding everything when
    /// `check_remap` is set and the entries fit in one. Nested internal
    /// nodes are always checked; the flag only governs this node.
    pub(crate) fn unmap(
        mut self,
        src: &NodeSource,
        key: &Key,
        check_remap: bool,
    ) -> ChkResult<ChildRef> {
        let search_key = self.params.format.search_key(key);
        let slot = self.slot_for(&search_key);
        let child = self
            .children
            .remove(&slot)
            .ok_or_else(|| ChkError::NotFound(key.clone()))?;
        let unmapped = match src.take(child)? {
            Node::Leaf(leaf) => ChildRef::Dirty(Box::new(Node::Leaf(leaf.unmap(key)?))),
            Node::Internal(internal) => internal.unmap(src, key, true)?,
        };
        self.len -= 1;
        let unmapped_internal = unmapped.is_internal() == Some(true);
        if !unmapped.is_empty() {
            self.children.insert(slot, unmapped);
        }

        if self.children.len() <= 1 {
            return Ok(match self.children.into_values().next() {
                Some(only) => only,
                None => ChildRef::Dirty(Box::new(Node::Leaf(LeafNode::new(self.params)))),
            });
        }
        if unmapped_internal || !check_remap {
            return Ok(ChildRef::Dirty(Box::new(Node::Internal(self))));
        }
        Ok(ChildRef::Dirty(Box::new(self.check_remap(src)?)))
    }

    /// Replace this node by a single leaf if all its entries fit in one.
    pub(crate) fn check_remap(self, src: &NodeSource) -> ChkResult<Node> {
        match self.collapse_into_leaf(src)? {
            Some(leaf) => {
                debug!(items = leaf.len(), "remap produced a leaf");
                Ok(Node::Leaf(leaf))
            }
            None => Ok(Node::Internal(self)),
        }
    }

    fn collapse_into_leaf(&self, src: &NodeSource) -> ChkResult<Option<LeafNode>> {
        let mut leaf = LeafNode::new(self.params);
        for child in self.children.values() {
            let view = src.view(child)?;
            match &*view {
                // An internal child already could not collapse, so neither
                // can this node.
                Node::Internal(_) => return Ok(None),
                Node::Leaf(child_leaf) => {
                    for (key, value) in child_leaf.items() {
                        if leaf.map_no_split(key.clone(), value.clone()) {
                            return Ok(None);
                        }
                    }
                }
            }
        }
        Ok(Some(leaf))
    }

    /// Children that may hold entries matching `filter`, in slot order,
    /// each with the part of the filter that applies to it.
    pub fn select_children(
        &self,
        filter: Option<&[Key]>,
    ) -> Vec<(&ChildRef, Option<Vec<Key>>)> {
        let Some(filter) = filter else {
            return self.children.values().map(|child| (child, None)).collect();
        };
        let width = self.node_width();
        let mut selected: BTreeMap<&[u8], (&ChildRef, Vec<Key>)> = BTreeMap::new();
        for key in filter {
            let search_key = self.params.format.search_key(key);
            let prefix = &search_key[..search_key.len().min(width)];
            if prefix.len() == width {
                if let Some((slot, child)) = self.children.get_key_value(prefix) {
                    selected
                        .entry(slot.as_slice())
                        .or_insert_with(|| (child, Vec::new()))
                        .1
                        .push(key.clone());
                }
            } else {
                let matching = self
                    .children
                    .range::<[u8], _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
                    .take_while(|(slot, _)| slot.starts_with(prefix));
                for (slot, child) in matching {
                    selected
                        .entry(slot.as_slice())
                        .or_insert_with(|| (child, Vec::new()))
                        .1
                        .push(key.clone());
                }
            }
        }
        selected
            .into_values()
            .map(|(child, keys)| (child, Some(keys)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Internal(internal) => internal.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn params(&self) -> NodeParams {
        match self {
            Node::Leaf(leaf) => leaf.params(),
            Node::Internal(internal) => internal.params(),
        }
    }

    pub fn search_prefix(&self) -> Option<&[u8]> {
        match self {
            Node::Leaf(leaf) => leaf.search_prefix(),
            Node::Internal(internal) => Some(internal.search_prefix()),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Node::Internal(_))
    }

    pub(crate) fn map(self, src: &NodeSource, key: Key, value: Vec<u8>) -> ChkResult<MapOutcome> {
        match self {
            Node::Leaf(leaf) => leaf.map(src, key, value),
            Node::Internal(internal) => internal.map(src, key, value),
        }
    }

    pub(crate) fn unmap(self, src: &NodeSource, key: &Key, check_remap: bool) -> ChkResult<ChildRef> {
        match self {
            Node::Leaf(leaf) => Ok(ChildRef::Dirty(Box::new(Node::Leaf(leaf.unmap(key)?)))),
            Node::Internal(internal) => internal.unmap(src, key, check_remap),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted nodes and child references
// ---------------------------------------------------------------------------

/// A node whose serialised bytes are in the store under `key`.
///
/// There is no way to mutate a persisted node; changing one means copying
/// the node out and saving the copy under its new key.
#[derive(Debug)]
pub struct PersistedNode {
    key: ContentKey,
    node: Node,
}

impl PersistedNode {
    pub(crate) fn new(key: ContentKey, node: Node) -> Self {
        Self { key, node }
    }

    pub fn key(&self) -> ContentKey {
        self.key
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }
}

/// A reference from a parent to a child node.
#[derive(Clone, Debug)]
pub enum ChildRef {
    /// Known only by content key; loaded on demand.
    Stored(ContentKey),
    /// Read from the store and shared with any other tree that holds it.
    Loaded(Arc<PersistedNode>),
    /// Created or modified since the last save.
    Dirty(Box<Node>),
}

impl ChildRef {
    /// The content key, or `None` while the node is unsaved.
    pub fn key(&self) -> Option<ContentKey> {
        match self {
            ChildRef::Stored(key) => Some(*key),
            ChildRef::Loaded(node) => Some(node.key()),
            ChildRef::Dirty(_) => None,
        }
    }

    /// Whether the child is an internal node, when known without loading.
    pub fn is_internal(&self) -> Option<bool> {
        match self {
            ChildRef::Stored(_) => None,
            ChildRef::Loaded(node) => Some(node.node().is_internal()),
            ChildRef::Dirty(node) => Some(node.is_internal()),
        }
    }

    /// A stored child is never empty: only a root leaf may be.
    fn is_empty(&self) -> bool {
        match self {
            ChildRef::Stored(_) => false,
            ChildRef::Loaded(node) => node.node().is_empty(),
            ChildRef::Dirty(node) => node.is_empty(),
        }
    }
}

/// A node borrowed from an in-memory tree or shared from the store.
pub enum NodeView<'a> {
    Borrowed(&'a Node),
    Shared(Arc<PersistedNode>),
    Owned(Box<Node>),
}

impl Deref for NodeView<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        match self {
            NodeView::Borrowed(node) => node,
            NodeView::Shared(persisted) => persisted.node(),
            NodeView::Owned(node) => node,
        }
    }
}
