use std::sync::Arc;

use chk_types::{ContentKey, Key};

use crate::error::ChkResult;
use crate::node::{ChildRef, Node, NodeView};
use crate::source::NodeSource;

enum Work<'a> {
    Visit(NodeView<'a>, Option<Vec<Key>>),
    Load(ContentKey, Option<Vec<Key>>),
    Emit(std::vec::IntoIter<(Key, Vec<u8>)>),
}

impl<'a> Work<'a> {
    fn borrowed(child: &'a ChildRef, filter: Option<Vec<Key>>) -> Self {
        match child {
            ChildRef::Stored(key) => Work::Load(*key, filter),
            ChildRef::Loaded(node) => Work::Visit(NodeView::Shared(Arc::clone(node)), filter),
            ChildRef::Dirty(node) => Work::Visit(NodeView::Borrowed(node), filter),
        }
    }

    fn owned(child: &ChildRef, filter: Option<Vec<Key>>) -> Self {
        match child {
            ChildRef::Stored(key) => Work::Load(*key, filter),
            ChildRef::Loaded(node) => Work::Visit(NodeView::Shared(Arc::clone(node)), filter),
            ChildRef::Dirty(node) => Work::Visit(NodeView::Owned(node.clone()), filter),
        }
    }
}

/// Lazy depth-first iterator over a map's entries.
///
/// Children that cannot hold a key in the filter are skipped without being
/// read, and stored children are only read once the walk reaches them. The
/// first error ends the iteration.
pub struct Iter<'a> {
    source: &'a NodeSource,
    stack: Vec<Work<'a>>,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(source: &'a NodeSource, root: &'a ChildRef, filter: Option<Vec<Key>>) -> Self {
        Self {
            source,
            stack: vec![Work::borrowed(root, filter)],
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = ChkResult<(Key, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.pop()? {
                Work::Emit(mut items) => {
                    if let Some(item) = items.next() {
                        self.stack.push(Work::Emit(items));
                        return Some(Ok(item));
                    }
                }
                Work::Load(key, filter) => match self.source.load(&key) {
                    Ok(node) => self.stack.push(Work::Visit(NodeView::Shared(node), filter)),
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                },
                Work::Visit(NodeView::Borrowed(node), filter) => match node {
                    Node::Leaf(leaf) => {
                        let items = leaf.matching_items(filter.as_deref());
                        self.stack.push(Work::Emit(items.into_iter()));
                    }
                    Node::Internal(internal) => {
                        let selected = internal.select_children(filter.as_deref());
                        for (child, filter) in selected.into_iter().rev() {
                            self.stack.push(Work::borrowed(child, filter));
                        }
                    }
                },
                Work::Visit(view, filter) => match &*view {
                    Node::Leaf(leaf) => {
                        let items = leaf.matching_items(filter.as_deref());
                        self.stack.push(Work::Emit(items.into_iter()));
                    }
                    Node::Internal(internal) => {
                        let selected = internal.select_children(filter.as_deref());
                        for (child, filter) in selected.into_iter().rev() {
                            self.stack.push(Work::owned(child, filter));
                        }
                    }
                },
            }
        }
    }
}
