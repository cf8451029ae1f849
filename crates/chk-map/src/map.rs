//! The map handle: a root reference plus the store and page cache its
//! nodes live in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chk_store::ContentStore;
use chk_types::{ContentKey, Key};
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec;
use crate::config::ChkMapConfig;
use crate::error::{ChkError, ChkResult};
use crate::iter::Iter;
use crate::node::{ChildRef, LeafNode, MapOutcome, Node, NodeParams, NodeView};
use crate::page_cache::PageCache;
use crate::source::NodeSource;

/// One entry of a delta: `(old_key, new_key, new_value)`.
///
/// `(None, Some(k), Some(v))` inserts, `(Some(k), None, None)` removes and
/// `(Some(k), Some(k), Some(v))` replaces.
pub type DeltaEntry = (Option<Key>, Option<Key>, Option<Vec<u8>>);

/// One difference between two maps: `(key, basis_value, new_value)`.
pub type Change = (Key, Option<Vec<u8>>, Option<Vec<u8>>);

/// Counts gathered by [`ChkMap::check`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub nodes: usize,
    pub leaves: usize,
    pub items: usize,
}

/// A persistent map from tuple keys to byte values stored as a tree of
/// content-addressed nodes.
///
/// Changes stay in memory until [`save`](Self::save) writes every modified
/// node and returns the new root key. Two maps holding the same entries
/// with the same parameters always save to the same root key.
pub struct ChkMap {
    source: NodeSource,
    root: ChildRef,
    saved: Option<ContentKey>,
    config: ChkMapConfig,
}

impl ChkMap {
    /// An empty map. Nothing is written until the first save.
    pub fn new(store: Arc<dyn ContentStore>, config: ChkMapConfig) -> ChkResult<Self> {
        config.validate()?;
        let pages = PageCache::new(config.page_cache_bytes);
        let source = NodeSource::new(store, pages, config.search_key_format);
        let root = ChildRef::Dirty(Box::new(Node::Leaf(LeafNode::new(params_of(&config)))));
        Ok(Self {
            source,
            root,
            saved: None,
            config,
        })
    }

    /// A map rooted at an existing node. The root is only read on first
    /// use, so a missing root surfaces from the first operation.
    pub fn open(
        store: Arc<dyn ContentStore>,
        root: ContentKey,
        config: ChkMapConfig,
    ) -> ChkResult<Self> {
        config.validate()?;
        let pages = PageCache::new(config.page_cache_bytes);
        let source = NodeSource::new(store, pages, config.search_key_format);
        Ok(Self {
            source,
            root: ChildRef::Stored(root),
            saved: Some(root),
            config,
        })
    }

    /// Build and save a map holding `items`.
    ///
    /// Produces the same tree as mapping the items one at a time into an
    /// empty map.
    pub fn from_dict<I>(store: Arc<dyn ContentStore>, items: I, config: ChkMapConfig) -> ChkResult<Self>
    where
        I: IntoIterator<Item = (Key, Vec<u8>)>,
    {
        let mut map = Self::new(store, config)?;
        let params = params_of(&map.config);
        let mut entries = BTreeMap::new();
        for (key, value) in items {
            validate_key(&key, params.key_width)?;
            entries.insert(key, value);
        }
        let leaf = LeafNode::from_items(params, entries);
        let root = if leaf.needs_split() {
            leaf.split(&map.source)?.into_node()
        } else {
            Node::Leaf(leaf)
        };
        map.root = ChildRef::Dirty(Box::new(root));
        map.save()?;
        Ok(map)
    }

    /// Share `pages` with other maps instead of a private page cache.
    pub fn with_page_cache(mut self, pages: PageCache) -> Self {
        self.source = NodeSource::new(self.source.store().clone(), pages, self.source.format());
        self
    }

    pub fn config(&self) -> &ChkMapConfig {
        &self.config
    }

    pub fn page_cache(&self) -> &PageCache {
        self.source.pages()
    }

    /// The root key, or `None` when there are unsaved changes.
    pub fn key(&self) -> Option<ContentKey> {
        self.root.key()
    }

    pub fn len(&self) -> ChkResult<usize> {
        Ok(self.source.view(&self.root)?.len())
    }

    pub fn is_empty(&self) -> ChkResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The value stored under `key`; [`ChkError::NotFound`] when absent.
    pub fn get(&self, key: &Key) -> ChkResult<Vec<u8>> {
        for item in self.iter_items(Some(vec![key.clone()])) {
            let (found, value) = item?;
            if &found == key {
                return Ok(value);
            }
        }
        Err(ChkError::NotFound(key.clone()))
    }

    pub fn contains(&self, key: &Key) -> ChkResult<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(ChkError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Entries in the map, restricted to `filter` when given.
    ///
    /// A filter key with fewer components than the map's key width matches
    /// every entry whose leading components equal it.
    pub fn iter_items(&self, filter: Option<Vec<Key>>) -> Iter<'_> {
        Iter::new(&self.source, &self.root, filter)
    }

    /// Insert or replace an entry.
    pub fn map(&mut self, key: Key, value: impl Into<Vec<u8>>) -> ChkResult<()> {
        let params = self.root_params()?;
        validate_key(&key, params.key_width)?;
        let value = value.into();
        let root = std::mem::replace(&mut self.root, empty_root(params));
        let result = self
            .source
            .take(root)
            .and_then(|node| node.map(&self.source, key, value))
            .map(MapOutcome::into_node);
        match result {
            Ok(node) => {
                self.root = ChildRef::Dirty(Box::new(node));
                Ok(())
            }
            Err(e) => Err(self.revert(e)),
        }
    }

    /// Remove an entry; [`ChkError::NotFound`] when absent.
    pub fn unmap(&mut self, key: &Key) -> ChkResult<()> {
        if !self.contains(key)? {
            return Err(ChkError::NotFound(key.clone()));
        }
        self.unmap_present(key, true)
    }

    fn unmap_present(&mut self, key: &Key, check_remap: bool) -> ChkResult<()> {
        let params = self.root_params()?;
        let root = std::mem::replace(&mut self.root, empty_root(params));
        let result = self
            .source
            .take(root)
            .and_then(|node| node.unmap(&self.source, key, check_remap));
        match result {
            Ok(root) => {
                self.root = root;
                Ok(())
            }
            Err(e) => Err(self.revert(e)),
        }
    }

    /// Collapse an internal root into a leaf when its entries fit.
    fn remap_root(&mut self) -> ChkResult<()> {
        if !self.source.view(&self.root)?.is_internal() {
            return Ok(());
        }
        let params = self.root_params()?;
        let root = std::mem::replace(&mut self.root, empty_root(params));
        let result = self.source.take(root).and_then(|node| match node {
            Node::Internal(internal) => internal.check_remap(&self.source),
            leaf => Ok(leaf),
        });
        match result {
            Ok(node) => {
                self.root = ChildRef::Dirty(Box::new(node));
                Ok(())
            }
            Err(e) => Err(self.revert(e)),
        }
    }

    /// Drop unsaved changes after a failed operation.
    fn revert(&mut self, error: ChkError) -> ChkError {
        warn!(error = %error, saved = ?self.saved, "map operation failed, reverting to last saved root");
        self.root = match self.saved {
            Some(key) => ChildRef::Stored(key),
            None => empty_root(params_of(&self.config)),
        };
        error
    }

    /// Write every unsaved node and return the root key.
    pub fn save(&mut self) -> ChkResult<ContentKey> {
        let key = match &self.root {
            ChildRef::Stored(key) => *key,
            ChildRef::Loaded(node) => node.key(),
            ChildRef::Dirty(node) => {
                let persisted = self.source.persist((**node).clone())?;
                let key = persisted.key();
                self.root = ChildRef::Loaded(persisted);
                debug!(root = %key, "saved map");
                key
            }
        };
        self.saved = Some(key);
        Ok(key)
    }

    /// Apply a batch of changes and save.
    ///
    /// Removals run first and the root is checked for collapse once they are
    /// done, then inserts run. Inserting a key that is already present is
    /// [`ChkError::InconsistentDelta`]. On any error the map is left as it
    /// was before the call.
    pub fn apply_delta(&mut self, delta: Vec<DeltaEntry>) -> ChkResult<ContentKey> {
        let mut new_keys = Vec::new();
        for (old, new, value) in &delta {
            if let Some(new) = new {
                if value.is_none() {
                    return Err(ChkError::InconsistentDelta(format!(
                        "no value given for {new}"
                    )));
                }
                if old.is_none() {
                    new_keys.push(new.clone());
                }
            }
        }
        if !new_keys.is_empty() {
            let mut present = Vec::new();
            for item in self.iter_items(Some(new_keys.clone())) {
                let (key, _) = item?;
                if new_keys.contains(&key) {
                    present.push(key.to_string());
                }
            }
            if !present.is_empty() {
                return Err(ChkError::InconsistentDelta(format!(
                    "inserting keys already present: {}",
                    present.join(", ")
                )));
            }
        }

        let before = (self.root.clone(), self.saved);
        let result = self.apply_checked(delta);
        if result.is_err() {
            (self.root, self.saved) = before;
        }
        result
    }

    fn apply_checked(&mut self, delta: Vec<DeltaEntry>) -> ChkResult<ContentKey> {
        let mut deleted = 0usize;
        for (old, new, _) in &delta {
            if let Some(old) = old {
                if new.as_ref() != Some(old) {
                    self.unmap_present(old, false)?;
                    deleted += 1;
                }
            }
        }
        let mut inserted = 0usize;
        for (_, new, value) in delta {
            if let (Some(new), Some(value)) = (new, value) {
                self.map(new, value)?;
                inserted += 1;
            }
        }
        if deleted > 0 {
            self.remap_root()?;
        }
        let key = self.save()?;
        debug!(root = %key, deleted, inserted, "applied delta");
        Ok(key)
    }

    /// Every entry that differs between `basis` and this map, in key order.
    ///
    /// Subtrees saved under the same key in both maps are skipped without
    /// being read.
    pub fn iter_changes(&self, basis: &ChkMap) -> ChkResult<Vec<Change>> {
        let mut changes = Vec::new();
        diff(&self.source, &self.root, &basis.source, &basis.root, &mut changes)?;
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(changes)
    }

    /// Indented rendering of the tree for debugging, one line per node and
    /// entry.
    pub fn dump_tree(&self, include_keys: bool) -> ChkResult<String> {
        let mut out = String::new();
        self.dump_node(&self.root, b"", "", include_keys, &mut out)?;
        Ok(out)
    }

    fn dump_node(
        &self,
        child: &ChildRef,
        prefix: &[u8],
        indent: &str,
        include_keys: bool,
        out: &mut String,
    ) -> ChkResult<()> {
        let view = self.source.view(child)?;
        let node_key = match child.key() {
            Some(key) if include_keys => format!(" {key}"),
            _ => String::new(),
        };
        match &*view {
            Node::Leaf(leaf) => {
                out.push_str(&format!("{indent}{} LeafNode{node_key}\n", quote(prefix)));
                for (key, value) in leaf.items() {
                    out.push_str(&format!("      {} {}\n", render_key(key), quote(value)));
                }
            }
            Node::Internal(internal) => {
                out.push_str(&format!("{indent}{} InternalNode{node_key}\n", quote(prefix)));
                let child_indent = format!("{indent}  ");
                for (slot, child) in internal.children() {
                    self.dump_node(child, slot, &child_indent, include_keys, out)?;
                }
            }
        }
        Ok(())
    }

    /// Walk every reachable node and verify it.
    ///
    /// Saved nodes are re-read from the store, re-hashed and reparsed, and
    /// must reserialise to exactly the stored bytes. Internal entry counts
    /// must match their children, and every entry must sit under the slots
    /// its search key routes to.
    pub fn check(&self) -> ChkResult<CheckReport> {
        let mut report = CheckReport::default();
        let mut route = Vec::new();
        self.check_node(&self.root, &mut route, &mut report)?;
        debug!(
            nodes = report.nodes,
            leaves = report.leaves,
            items = report.items,
            "checked map"
        );
        Ok(report)
    }

    fn check_node(
        &self,
        child: &ChildRef,
        route: &mut Vec<Vec<u8>>,
        report: &mut CheckReport,
    ) -> ChkResult<usize> {
        let view = match child.key() {
            Some(key) => {
                let bytes = self.source.store().get(&key)?;
                if !key.verify(&bytes) {
                    return Err(ChkError::malformed(Some(key), "stored bytes do not match their key"));
                }
                let node = codec::deserialise(&bytes, Some(key), self.source.format())?;
                if codec::serialise(&node)? != bytes {
                    return Err(ChkError::malformed(Some(key), "node is not in canonical form"));
                }
                NodeView::Owned(Box::new(node))
            }
            None => self.source.view(child)?,
        };
        report.nodes += 1;
        match &*view {
            Node::Leaf(leaf) => {
                report.leaves += 1;
                report.items += leaf.len();
                let format = leaf.params().format;
                for key in leaf.items().keys() {
                    let search_key = format.search_key(key);
                    for slot in route.iter() {
                        let mut padded = search_key[..search_key.len().min(slot.len())].to_vec();
                        padded.resize(slot.len(), b'\x00');
                        if &padded != slot {
                            return Err(ChkError::malformed(
                                child.key(),
                                format!("{key} is stored under slot {}", quote(slot)),
                            ));
                        }
                    }
                }
                Ok(leaf.len())
            }
            Node::Internal(internal) => {
                let mut total = 0;
                for (slot, grandchild) in internal.children() {
                    route.push(slot.clone());
                    let counted = self.check_node(grandchild, route, report);
                    route.pop();
                    total += counted?;
                }
                if total != internal.len() {
                    return Err(ChkError::malformed(
                        child.key(),
                        format!("node claims {} entries, children hold {total}", internal.len()),
                    ));
                }
                Ok(total)
            }
        }
    }

    fn root_params(&self) -> ChkResult<NodeParams> {
        Ok(self.source.view(&self.root)?.params())
    }
}

impl std::fmt::Debug for ChkMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChkMap")
            .field("root", &self.root.key())
            .field("saved", &self.saved)
            .field("format", &self.source.format())
            .finish()
    }
}

fn params_of(config: &ChkMapConfig) -> NodeParams {
    NodeParams {
        maximum_size: config.maximum_size,
        key_width: config.key_width,
        format: config.search_key_format,
    }
}

fn empty_root(params: NodeParams) -> ChildRef {
    ChildRef::Dirty(Box::new(Node::Leaf(LeafNode::new(params))))
}

fn validate_key(key: &Key, key_width: usize) -> ChkResult<()> {
    if key.width() != key_width {
        return Err(ChkError::InvalidKey {
            key: key.clone(),
            reason: format!("expected {key_width} components, got {}", key.width()),
        });
    }
    if key
        .components()
        .iter()
        .any(|c| c.contains(&b'\n') || c.contains(&b'\x00'))
    {
        return Err(ChkError::InvalidKey {
            key: key.clone(),
            reason: "components may not contain newline or NUL bytes".into(),
        });
    }
    Ok(())
}

fn diff(
    ours_src: &NodeSource,
    ours: &ChildRef,
    basis_src: &NodeSource,
    basis: &ChildRef,
    out: &mut Vec<Change>,
) -> ChkResult<()> {
    if let (Some(a), Some(b)) = (ours.key(), basis.key()) {
        if a == b {
            return Ok(());
        }
    }
    let ours_view = ours_src.view(ours)?;
    let basis_view = basis_src.view(basis)?;
    match (&*ours_view, &*basis_view) {
        (Node::Internal(a), Node::Internal(b))
            if a.node_width() == b.node_width() && a.params().format == b.params().format =>
        {
            let slots: BTreeSet<&Vec<u8>> = a.children().keys().chain(b.children().keys()).collect();
            for slot in slots {
                match (a.children().get(slot), b.children().get(slot)) {
                    (Some(c), Some(d)) => diff(ours_src, c, basis_src, d, out)?,
                    (Some(c), None) => {
                        for item in Iter::new(ours_src, c, None) {
                            let (key, value) = item?;
                            out.push((key, None, Some(value)));
                        }
                    }
                    (None, Some(d)) => {
                        for item in Iter::new(basis_src, d, None) {
                            let (key, value) = item?;
                            out.push((key, Some(value), None));
                        }
                    }
                    (None, None) => {}
                }
            }
        }
        _ => {
            let ours_items: BTreeMap<Key, Vec<u8>> =
                Iter::new(ours_src, ours, None).collect::<ChkResult<_>>()?;
            let mut basis_items: BTreeMap<Key, Vec<u8>> =
                Iter::new(basis_src, basis, None).collect::<ChkResult<_>>()?;
            for (key, value) in ours_items {
                match basis_items.remove(&key) {
                    Some(old) if old == value => {}
                    old => out.push((key, old, Some(value))),
                }
            }
            for (key, old) in basis_items {
                out.push((key, Some(old), None));
            }
        }
    }
    Ok(())
}

fn quote(bytes: &[u8]) -> String {
    format!("'{}'", bytes.escape_ascii())
}

fn render_key(key: &Key) -> String {
    let parts: Vec<String> = key.components().iter().map(|c| quote(c)).collect();
    if parts.len() == 1 {
        format!("({},)", parts[0])
    } else {
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search_key::SearchKeyFormat;
    use chk_store::{InMemoryContentStore, StoreResult};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::sync::Mutex;

    fn config(maximum_size: usize) -> ChkMapConfig {
        ChkMapConfig {
            maximum_size,
            ..ChkMapConfig::default()
        }
    }

    fn store() -> Arc<InMemoryContentStore> {
        Arc::new(InMemoryContentStore::new())
    }

    fn items(pairs: &[(&str, &str)]) -> Vec<(Key, Vec<u8>)> {
        pairs
            .iter()
            .map(|(k, v)| (Key::from(*k), v.as_bytes().to_vec()))
            .collect()
    }

    fn empty(maximum_size: usize) -> ChkMap {
        ChkMap::new(store(), config(maximum_size)).unwrap()
    }

    /// Build the map both in one pass and by inserting through a delta, and
    /// check both give the same root.
    fn build(entries: Vec<(Key, Vec<u8>)>, config: ChkMapConfig) -> ChkMap {
        let store = store();
        let direct = ChkMap::from_dict(store.clone(), entries.clone(), config.clone()).unwrap();
        let mut via_map = ChkMap::new(store, config).unwrap();
        let delta = entries.into_iter().map(|(k, v)| (None, Some(k), Some(v))).collect();
        let key = via_map.apply_delta(delta).unwrap();
        assert_eq!(direct.key(), Some(key));
        direct
    }

    // -----------------------------------------------------------------------
    // Basics
    // -----------------------------------------------------------------------

    #[test]
    fn empty_map_saves_empty_leaf() {
        let store = store();
        let mut map = ChkMap::new(store.clone(), config(0)).unwrap();
        assert_eq!(map.key(), None);
        assert_eq!(map.len().unwrap(), 0);
        let key = map.save().unwrap();
        assert_eq!(store.get(&key).unwrap(), b"chkleaf:\n0\n1\n0\n\n".to_vec());
        assert_eq!(map.key(), Some(key));

        let reopened = ChkMap::open(store, key, config(0)).unwrap();
        assert!(reopened.is_empty().unwrap());
        assert_eq!(reopened.iter_items(None).count(), 0);
    }

    #[test]
    fn from_dict_single_entry() {
        let store = store();
        let map = ChkMap::from_dict(store.clone(), items(&[("a", "b")]), config(0)).unwrap();
        let key = map.key().unwrap();
        assert_eq!(store.get(&key).unwrap(), b"chkleaf:\n0\n1\n1\na\n\x001\nb\n".to_vec());

        let mut via_delta = ChkMap::new(store, config(0)).unwrap();
        let new_key = via_delta
            .apply_delta(vec![(None, Some(Key::from("a")), Some(b"b".to_vec()))])
            .unwrap();
        assert_eq!(new_key, key);
    }

    #[test]
    fn map_leaves_tree_unsaved() {
        let mut map = empty(0);
        map.save().unwrap();
        map.map(Key::from("k"), "v").unwrap();
        assert_eq!(map.key(), None);
        assert_eq!(map.get(&Key::from("k")).unwrap(), b"v");
        assert!(map.save().is_ok());
        assert!(map.key().is_some());
    }

    #[test]
    fn get_missing_is_not_found() {
        let map = build(items(&[("a", "1")]), config(0));
        assert!(matches!(
            map.get(&Key::from("b")),
            Err(ChkError::NotFound(k)) if k == Key::from("b")
        ));
        assert!(!map.contains(&Key::from("b")).unwrap());
        assert!(map.contains(&Key::from("a")).unwrap());
    }

    #[test]
    fn empty_value_is_present() {
        let map = build(items(&[("a", "")]), config(0));
        assert_eq!(map.get(&Key::from("a")).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn unmap_missing_is_not_found_and_keeps_map() {
        let mut map = build(items(&[("a", "1")]), config(0));
        let before = map.key();
        assert!(matches!(map.unmap(&Key::from("z")), Err(ChkError::NotFound(_))));
        assert_eq!(map.key(), before);
    }

    #[test]
    fn rejects_bad_keys() {
        let mut map = empty(0);
        assert!(matches!(
            map.map(Key::from(["a", "b"]), "v"),
            Err(ChkError::InvalidKey { .. })
        ));
        assert!(matches!(
            map.map(Key::from("a\nb"), "v"),
            Err(ChkError::InvalidKey { .. })
        ));
        assert!(matches!(
            ChkMap::from_dict(store(), vec![(Key::single(b"a\x00b"), Vec::new())], config(0)),
            Err(ChkError::InvalidKey { .. })
        ));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn invalid_config_rejected() {
        let bad = ChkMapConfig {
            key_width: 0,
            ..ChkMapConfig::default()
        };
        assert!(matches!(ChkMap::new(store(), bad), Err(ChkError::InvalidConfig(_))));
    }

    #[test]
    fn open_is_lazy() {
        let missing = ContentKey::for_bytes(b"no such node");
        let map = ChkMap::open(store(), missing, config(0)).unwrap();
        assert_eq!(map.key(), Some(missing));
        assert!(matches!(map.len(), Err(ChkError::Store(_))));
        assert!(matches!(map.get(&Key::from("a")), Err(ChkError::Store(_))));
    }

    #[test]
    fn malformed_root_is_reported() {
        let store = store();
        let key = store.put(b"chkleaf:\nnot a number\n").unwrap();
        let map = ChkMap::open(store, key, config(0)).unwrap();
        assert!(matches!(map.get(&Key::from("a")), Err(ChkError::Malformed { .. })));
        assert!(matches!(map.check(), Err(ChkError::Malformed { .. })));
    }

    #[test]
    fn two_component_keys() {
        let cfg = ChkMapConfig {
            key_width: 2,
            ..config(0)
        };
        let mut map = ChkMap::new(store(), cfg).unwrap();
        map.map(Key::from(["a", "x"]), "1").unwrap();
        map.map(Key::from(["a", "y"]), "2").unwrap();
        map.map(Key::from(["b", "x"]), "3").unwrap();
        let under_a: Vec<Key> = map
            .iter_items(Some(vec![Key::from("a")]))
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(under_a, vec![Key::from(["a", "x"]), Key::from(["a", "y"])]);
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('a', 'x') '1'\n      ('a', 'y') '2'\n      ('b', 'x') '3'\n"
        );
    }

    // -----------------------------------------------------------------------
    // Splitting and collapsing
    // -----------------------------------------------------------------------

    #[test]
    fn stable_splitting() {
        let mut map = empty(35);
        map.map(Key::from("aaa"), "v").unwrap();
        assert_eq!(map.dump_tree(false).unwrap(), "'' LeafNode\n      ('aaa',) 'v'\n");
        map.map(Key::from("aab"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aab',) 'v'\n"
        );
        map.map(Key::from("aac"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 'aaa' LeafNode\n\
             \x20     ('aaa',) 'v'\n\
             \x20 'aab' LeafNode\n\
             \x20     ('aab',) 'v'\n\
             \x20 'aac' LeafNode\n\
             \x20     ('aac',) 'v'\n"
        );
    }

    #[test]
    fn deep_splitting() {
        let mut map = empty(40);
        map.map(Key::from("aaaaaaaa"), "v").unwrap();
        map.map(Key::from("aaaaabaa"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaaaaaaa',) 'v'\n      ('aaaaabaa',) 'v'\n"
        );
        map.map(Key::from("aaabaaaa"), "v").unwrap();
        map.map(Key::from("aaababaa"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 'aaaa' LeafNode\n\
             \x20     ('aaaaaaaa',) 'v'\n\
             \x20     ('aaaaabaa',) 'v'\n\
             \x20 'aaab' LeafNode\n\
             \x20     ('aaabaaaa',) 'v'\n\
             \x20     ('aaababaa',) 'v'\n"
        );
        map.map(Key::from("aaabacaa"), "v").unwrap();
        map.map(Key::from("aaabadaa"), "v").unwrap();
        map.map(Key::from("aaababba"), "val").unwrap();
        map.map(Key::from("aaababca"), "val").unwrap();
        map.map(Key::from("aaabDaaa"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 'aaaa' LeafNode\n\
             \x20     ('aaaaaaaa',) 'v'\n\
             \x20     ('aaaaabaa',) 'v'\n\
             \x20 'aaab' InternalNode\n\
             \x20   'aaabD' LeafNode\n\
             \x20     ('aaabDaaa',) 'v'\n\
             \x20   'aaaba' InternalNode\n\
             \x20     'aaabaa' LeafNode\n\
             \x20     ('aaabaaaa',) 'v'\n\
             \x20     'aaabab' InternalNode\n\
             \x20       'aaababa' LeafNode\n\
             \x20     ('aaababaa',) 'v'\n\
             \x20       'aaababb' LeafNode\n\
             \x20     ('aaababba',) 'val'\n\
             \x20       'aaababc' LeafNode\n\
             \x20     ('aaababca',) 'val'\n\
             \x20     'aaabac' LeafNode\n\
             \x20     ('aaabacaa',) 'v'\n\
             \x20     'aaabad' LeafNode\n\
             \x20     ('aaabadaa',) 'v'\n"
        );
        assert_eq!(map.len().unwrap(), 9);
        map.save().unwrap();
        let report = map.check().unwrap();
        assert_eq!(report.items, 9);
        assert_eq!(report.leaves, 8);
        assert_eq!(report.nodes, 12);
    }

    #[test]
    fn shrinking_value_collapses() {
        let mut map = empty(35);
        map.map(Key::from("aaa"), "v").unwrap();
        map.map(Key::from("aab"), "very long value that splits").unwrap();
        assert!(map.dump_tree(false).unwrap().starts_with("'' InternalNode\n"));
        map.map(Key::from("aab"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aab',) 'v'\n"
        );
    }

    #[test]
    fn double_deep_collapse() {
        let mut map = empty(40);
        map.map(Key::from("aaa"), "v").unwrap();
        map.map(Key::from("aab"), "very long value that splits").unwrap();
        map.map(Key::from("abc"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 'aa' InternalNode\n\
             \x20   'aaa' LeafNode\n\
             \x20     ('aaa',) 'v'\n\
             \x20   'aab' LeafNode\n\
             \x20     ('aab',) 'very long value that splits'\n\
             \x20 'ab' LeafNode\n\
             \x20     ('abc',) 'v'\n"
        );
        map.map(Key::from("aab"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aab',) 'v'\n      ('abc',) 'v'\n"
        );
    }

    #[test]
    fn stable_unmap() {
        let mut map = empty(35);
        for key in ["aaa", "aab", "aac"] {
            map.map(Key::from(key), "v").unwrap();
        }
        assert!(map.dump_tree(false).unwrap().starts_with("'' InternalNode\n"));
        map.unmap(&Key::from("aac")).unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aab',) 'v'\n"
        );
    }

    #[test]
    fn unmap_double_deep() {
        let mut map = empty(40);
        map.map(Key::from("aaa"), "v").unwrap();
        map.map(Key::from("aaab"), "v").unwrap();
        map.map(Key::from("aab"), "very long value").unwrap();
        map.map(Key::from("abc"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 'aa' InternalNode\n\
             \x20   'aaa' LeafNode\n\
             \x20     ('aaa',) 'v'\n\
             \x20     ('aaab',) 'v'\n\
             \x20   'aab' LeafNode\n\
             \x20     ('aab',) 'very long value'\n\
             \x20 'ab' LeafNode\n\
             \x20     ('abc',) 'v'\n"
        );
        map.unmap(&Key::from("aab")).unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aaab',) 'v'\n      ('abc',) 'v'\n"
        );
    }

    #[test]
    fn unmap_double_deep_non_empty_leaf() {
        let mut map = empty(40);
        map.map(Key::from("aaa"), "v").unwrap();
        map.map(Key::from("aab"), "long value").unwrap();
        map.map(Key::from("aabb"), "v").unwrap();
        map.map(Key::from("abc"), "v").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 'aa' InternalNode\n\
             \x20   'aaa' LeafNode\n\
             \x20     ('aaa',) 'v'\n\
             \x20   'aab' LeafNode\n\
             \x20     ('aab',) 'long value'\n\
             \x20     ('aabb',) 'v'\n\
             \x20 'ab' LeafNode\n\
             \x20     ('abc',) 'v'\n"
        );
        map.unmap(&Key::from("aab")).unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aabb',) 'v'\n      ('abc',) 'v'\n"
        );
    }

    #[test]
    fn unmap_last_entry_leaves_empty_leaf() {
        let mut map = build(items(&[("a", "1")]), config(0));
        map.unmap(&Key::from("a")).unwrap();
        assert!(map.is_empty().unwrap());
        let key = map.save().unwrap();
        assert_eq!(key, empty(0).save().unwrap());
    }

    #[test]
    fn escaped_bytes_in_dump() {
        let mut map = empty(0);
        map.map(Key::from("a\ra"), "val1").unwrap();
        map.map(Key::from("a'b"), "x\ny").unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('a\\ra',) 'val1'\n      ('a\\'b',) 'x\\ny'\n"
        );
    }

    #[test]
    fn dump_with_keys_names_saved_nodes() {
        let mut map = empty(0);
        map.map(Key::from("a"), "b").unwrap();
        assert_eq!(map.dump_tree(true).unwrap(), "'' LeafNode\n      ('a',) 'b'\n");
        let key = map.save().unwrap();
        assert_eq!(
            map.dump_tree(true).unwrap(),
            format!("'' LeafNode {key}\n      ('a',) 'b'\n")
        );
    }

    // -----------------------------------------------------------------------
    // Hashed search keys
    // -----------------------------------------------------------------------

    fn hashed(format: SearchKeyFormat, maximum_size: usize) -> ChkMapConfig {
        ChkMapConfig {
            search_key_format: format,
            ..config(maximum_size)
        }
    }

    #[test]
    fn hash16_routing() {
        let map = build(
            items(&[("1", "foo"), ("2", "bar"), ("3", "baz")]),
            hashed(SearchKeyFormat::Hash16, 10),
        );
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 '1' LeafNode\n\
             \x20     ('2',) 'bar'\n\
             \x20 '6' LeafNode\n\
             \x20     ('3',) 'baz'\n\
             \x20 '8' LeafNode\n\
             \x20     ('1',) 'foo'\n"
        );
        assert_eq!(map.get(&Key::from("2")).unwrap(), b"bar");
    }

    #[test]
    fn hash255_routing() {
        let map = build(
            items(&[("1", "foo"), ("2", "bar"), ("3", "baz")]),
            hashed(SearchKeyFormat::Hash255, 10),
        );
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' InternalNode\n\
             \x20 '\\x1a' LeafNode\n\
             \x20     ('2',) 'bar'\n\
             \x20 'm' LeafNode\n\
             \x20     ('3',) 'baz'\n\
             \x20 '\\x83' LeafNode\n\
             \x20     ('1',) 'foo'\n"
        );
        assert_eq!(
            map.iter_items(None).map(|r| r.unwrap().0).collect::<Vec<_>>(),
            vec![Key::from("2"), Key::from("3"), Key::from("1")]
        );
    }

    #[test]
    fn format_is_part_of_identity() {
        let entries = items(&[("1", "foo"), ("2", "bar"), ("3", "baz")]);
        let plain = build(entries.clone(), config(10));
        let hash16 = build(entries, hashed(SearchKeyFormat::Hash16, 10));
        assert_ne!(plain.key(), hash16.key());
    }

    // -----------------------------------------------------------------------
    // Deltas
    // -----------------------------------------------------------------------

    #[test]
    fn delta_empty_to_ab_and_back() {
        let mut map = empty(0);
        let empty_key = map.save().unwrap();
        let ab_key = map
            .apply_delta(vec![(None, Some(Key::from("a")), Some(b"b".to_vec()))])
            .unwrap();
        assert_ne!(ab_key, empty_key);
        let back = map.apply_delta(vec![(Some(Key::from("a")), None, None)]).unwrap();
        assert_eq!(back, empty_key);
    }

    #[test]
    fn delta_delete_collapses_internal_root() {
        let mut map = build(
            items(&[
                ("small", "value"),
                ("little", "value"),
                ("very-big", &"x".repeat(100)),
            ]),
            config(100),
        );
        assert!(map.dump_tree(false).unwrap().starts_with("'' InternalNode\n"));
        map.apply_delta(vec![(Some(Key::from("very-big")), None, None)]).unwrap();
        assert_eq!(
            map.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('little',) 'value'\n      ('small',) 'value'\n"
        );
    }

    #[test]
    fn delta_delete_under_nested_internal_collapses() {
        let entries = items(&[
            ("aaa", "v"),
            ("aab", "v"),
            ("aac", "very long value"),
            ("abc", "v"),
        ]);
        let mut via_delta = build(entries.clone(), config(40));
        let mut via_unmap = build(entries, config(40));
        assert!(via_delta
            .dump_tree(false)
            .unwrap()
            .contains("'aa' InternalNode"));

        let by_delta = via_delta
            .apply_delta(vec![(Some(Key::from("aac")), None, None)])
            .unwrap();
        via_unmap.unmap(&Key::from("aac")).unwrap();
        let by_unmap = via_unmap.save().unwrap();

        assert_eq!(by_delta, by_unmap);
        assert_eq!(
            via_delta.dump_tree(false).unwrap(),
            "'' LeafNode\n      ('aaa',) 'v'\n      ('aab',) 'v'\n      ('abc',) 'v'\n"
        );
        let expected = build(items(&[("aaa", "v"), ("aab", "v"), ("abc", "v")]), config(40));
        assert_eq!(Some(by_delta), expected.key());
    }

    #[test]
    fn delta_replace_in_place() {
        let mut map = build(items(&[("a", "1"), ("b", "2")]), config(0));
        let key = map
            .apply_delta(vec![(Some(Key::from("a")), Some(Key::from("a")), Some(b"3".to_vec()))])
            .unwrap();
        let expected = build(items(&[("a", "3"), ("b", "2")]), config(0));
        assert_eq!(Some(key), expected.key());
    }

    #[test]
    fn delta_inserting_present_key_is_rejected() {
        let mut map = build(items(&[("a", "1"), ("b", "2")]), config(0));
        let before = map.key();
        let err = map
            .apply_delta(vec![
                (Some(Key::from("b")), None, None),
                (None, Some(Key::from("a")), Some(b"x".to_vec())),
            ])
            .unwrap_err();
        assert!(matches!(err, ChkError::InconsistentDelta(_)));
        assert_eq!(map.key(), before);
        assert_eq!(map.len().unwrap(), 2);
    }

    #[test]
    fn delta_removing_absent_key_restores_root() {
        let mut map = build(items(&[("a", "1"), ("b", "2")]), config(0));
        let before = map.key();
        let err = map
            .apply_delta(vec![
                (Some(Key::from("a")), None, None),
                (Some(Key::from("zzz")), None, None),
            ])
            .unwrap_err();
        assert!(matches!(err, ChkError::NotFound(_)));
        assert_eq!(map.key(), before);
        assert_eq!(map.get(&Key::from("a")).unwrap(), b"1");
    }

    #[test]
    fn delta_is_deterministic() {
        let first = vec![("a", "v"), ("b", "v"), ("c", "v")];
        let mut reversed = first.clone();
        reversed.reverse();
        let mut one = empty(10);
        let mut two = empty(10);
        let delta = |pairs: &[(&str, &str)]| -> Vec<DeltaEntry> {
            pairs
                .iter()
                .map(|(k, v)| (None, Some(Key::from(*k)), Some(v.as_bytes().to_vec())))
                .collect()
        };
        assert_eq!(
            one.apply_delta(delta(&first)).unwrap(),
            two.apply_delta(delta(&reversed)).unwrap()
        );
    }

    #[test]
    fn shuffled_insertion_matches_from_dict() {
        let entries: Vec<(Key, Vec<u8>)> = (0..300)
            .map(|i| (Key::from(format!("key-{i:04}").as_str()), format!("value {i}").into_bytes()))
            .collect();
        let store = store();
        let direct = ChkMap::from_dict(store.clone(), entries.clone(), config(256)).unwrap();

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..3 {
            let mut shuffled = entries.clone();
            shuffled.shuffle(&mut rng);
            let mut map = ChkMap::new(store.clone(), config(256)).unwrap();
            for (key, value) in shuffled {
                map.map(key, value).unwrap();
            }
            assert_eq!(Some(map.save().unwrap()), direct.key());
        }
        let report = direct.check().unwrap();
        assert_eq!(report.items, 300);
        assert!(report.leaves > 1);
    }

    // -----------------------------------------------------------------------
    // Changes between maps
    // -----------------------------------------------------------------------

    #[test]
    fn iter_changes_reports_differences() {
        let store = store();
        let mut entries: Vec<(Key, Vec<u8>)> = (0..100)
            .map(|i| (Key::from(format!("k{i:03}").as_str()), b"same".to_vec()))
            .collect();
        let basis = ChkMap::from_dict(store.clone(), entries.clone(), config(128)).unwrap();
        entries.retain(|(k, _)| k != &Key::from("k010"));
        entries.push((Key::from("k200"), b"new".to_vec()));
        for (key, value) in entries.iter_mut() {
            if key == &Key::from("k050") {
                *value = b"changed".to_vec();
            }
        }
        let ours = ChkMap::from_dict(store, entries, config(128)).unwrap();

        assert_eq!(
            ours.iter_changes(&basis).unwrap(),
            vec![
                (Key::from("k010"), Some(b"same".to_vec()), None),
                (Key::from("k050"), Some(b"same".to_vec()), Some(b"changed".to_vec())),
                (Key::from("k200"), None, Some(b"new".to_vec())),
            ]
        );
        assert!(ours.iter_changes(&ours).unwrap().is_empty());
    }

    #[test]
    fn iter_changes_between_leaf_and_internal_roots() {
        let basis = build(items(&[("a", "1")]), config(40));
        let mut ours = build(items(&[("a", "1")]), config(40));
        for i in 0..10 {
            ours.map(Key::from(format!("b{i}").as_str()), "v").unwrap();
        }
        let changes = ours.iter_changes(&basis).unwrap();
        assert_eq!(changes.len(), 10);
        assert!(changes.iter().all(|(_, old, new)| old.is_none() && new.is_some()));
    }

    // -----------------------------------------------------------------------
    // Integrity checks and lazy reads
    // -----------------------------------------------------------------------

    #[test]
    fn check_detects_corrupt_child() {
        let store = store();
        let entries: Vec<(Key, Vec<u8>)> = (0..50)
            .map(|i| (Key::from(format!("k{i:02}").as_str()), b"v".to_vec()))
            .collect();
        let map = ChkMap::from_dict(store.clone(), entries, config(64)).unwrap();
        assert!(map.check().is_ok());

        let root = map.key().unwrap();
        let victim = store.keys().into_iter().find(|k| *k != root).unwrap();
        store.corrupt(&victim, b"chkleaf:\n0\n1\n0\n\n".to_vec());
        assert!(matches!(
            map.check(),
            Err(ChkError::Store(chk_store::StoreError::HashMismatch { .. }))
        ));
    }

    #[test]
    fn check_rejects_non_canonical_node() {
        let store = store();
        // Entry count and key width are fine but the common prefix is not
        // factored out.
        let key = store.put(b"chkleaf:\n0\n1\n2\n\naa\x001\nv\nab\x001\nv\n").unwrap();
        let map = ChkMap::open(store, key, config(0)).unwrap();
        assert_eq!(map.len().unwrap(), 2);
        assert!(matches!(map.check(), Err(ChkError::Malformed { .. })));
    }

    /// Records every key read from the wrapped store.
    struct RecordingStore {
        inner: InMemoryContentStore,
        reads: Mutex<Vec<ContentKey>>,
    }

    impl ContentStore for RecordingStore {
        fn get(&self, key: &ContentKey) -> StoreResult<Vec<u8>> {
            self.reads.lock().unwrap().push(*key);
            self.inner.get(key)
        }

        fn put(&self, data: &[u8]) -> StoreResult<ContentKey> {
            self.inner.put(data)
        }

        fn contains(&self, key: &ContentKey) -> StoreResult<bool> {
            self.inner.contains(key)
        }
    }

    /// Keys of the nodes on the way from `root` to `key`.
    fn path_to(source: &NodeSource, root: ContentKey, key: &Key) -> Vec<ContentKey> {
        let mut path = vec![root];
        let mut node = source.load(&root).unwrap();
        while let Node::Internal(internal) = node.node() {
            let filter = [key.clone()];
            let selected = internal.select_children(Some(&filter[..]));
            assert_eq!(selected.len(), 1);
            let child = selected[0].0.key().unwrap();
            path.push(child);
            node = source.load(&child).unwrap();
        }
        path
    }

    #[test]
    fn filtered_iteration_reads_only_needed_nodes() {
        let store = Arc::new(RecordingStore {
            inner: InMemoryContentStore::new(),
            reads: Mutex::new(Vec::new()),
        });
        let entries: Vec<(Key, Vec<u8>)> = (0..400)
            .map(|i| (Key::from(format!("key-{i:04}").as_str()), b"value".to_vec()))
            .collect();
        let root = ChkMap::from_dict(store.clone(), entries, config(200))
            .unwrap()
            .key()
            .unwrap();

        let wanted = [Key::from("key-0007"), Key::from("key-0321")];
        let probe = NodeSource::new(store.clone(), PageCache::new(1 << 20), SearchKeyFormat::Plain);
        let mut expected: BTreeSet<ContentKey> = BTreeSet::new();
        for key in &wanted {
            expected.extend(path_to(&probe, root, key));
        }

        store.reads.lock().unwrap().clear();
        let map = ChkMap::open(store.clone(), root, config(200)).unwrap();
        let found: Vec<Key> = map
            .iter_items(Some(wanted.to_vec()))
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(found, wanted.to_vec());

        let reads: BTreeSet<ContentKey> = store.reads.lock().unwrap().iter().copied().collect();
        assert_eq!(reads, expected);
        assert!(expected.len() > 2);
    }

    #[test]
    fn shared_page_cache_serves_second_map() {
        let store = Arc::new(RecordingStore {
            inner: InMemoryContentStore::new(),
            reads: Mutex::new(Vec::new()),
        });
        let map = ChkMap::from_dict(store.clone(), items(&[("a", "1"), ("b", "2")]), config(0)).unwrap();
        let root = map.key().unwrap();
        let pages = map.page_cache().clone();
        store.reads.lock().unwrap().clear();

        let other = ChkMap::open(store.clone(), root, config(0))
            .unwrap()
            .with_page_cache(pages);
        assert_eq!(other.get(&Key::from("b")).unwrap(), b"2");
        assert!(store.reads.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn insertion_order_does_not_change_root(
            entries in proptest::collection::btree_map("[a-d]{1,6}", "[a-z]{0,12}", 1..40),
            maximum_size in 40usize..200,
            seed in any::<u64>(),
        ) {
            let entries: Vec<(Key, Vec<u8>)> = entries
                .into_iter()
                .map(|(k, v)| (Key::from(k.as_str()), v.into_bytes()))
                .collect();
            let store = store();
            let direct = ChkMap::from_dict(store.clone(), entries.clone(), config(maximum_size)).unwrap();

            let mut shuffled = entries.clone();
            shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
            let mut map = ChkMap::new(store.clone(), config(maximum_size)).unwrap();
            for (key, value) in shuffled {
                map.map(key, value).unwrap();
            }
            prop_assert_eq!(Some(map.save().unwrap()), direct.key());

            let report = direct.check().unwrap();
            prop_assert_eq!(report.items, entries.len());
            for (key, value) in &entries {
                prop_assert_eq!(&direct.get(key).unwrap(), value);
            }
        }

        #[test]
        fn leaves_respect_maximum_size(
            keys in proptest::collection::btree_set("[a-z]{2,10}", 1..60),
            maximum_size in 60usize..300,
        ) {
            let entries: Vec<(Key, Vec<u8>)> = keys
                .iter()
                .map(|k| (Key::from(k.as_str()), b"value".to_vec()))
                .collect();
            let store = store();
            let map = ChkMap::from_dict(store.clone(), entries, config(maximum_size)).unwrap();
            let source = NodeSource::new(store.clone(), PageCache::new(1 << 20), SearchKeyFormat::Plain);
            for key in store.keys() {
                if let Node::Leaf(leaf) = source.load(&key).unwrap().node() {
                    prop_assert!(leaf.len() <= 1 || leaf.current_size() <= maximum_size);
                }
            }
            prop_assert!(map.check().is_ok());
        }

        #[test]
        fn delete_then_reinsert_restores_root(
            keys in proptest::collection::btree_set("[a-c]{1,5}", 2..30),
            pick in any::<proptest::sample::Index>(),
        ) {
            let entries: Vec<(Key, Vec<u8>)> = keys
                .iter()
                .map(|k| (Key::from(k.as_str()), b"v".to_vec()))
                .collect();
            let mut map = ChkMap::from_dict(store(), entries.clone(), config(60)).unwrap();
            let original = map.key().unwrap();
            let (key, value) = entries[pick.index(entries.len())].clone();
            map.apply_delta(vec![(Some(key.clone()), None, None)]).unwrap();
            prop_assert!(!map.contains(&key).unwrap());
            let restored = map.apply_delta(vec![(None, Some(key), Some(value))]).unwrap();
            prop_assert_eq!(restored, original);
        }
    }
}
