use std::sync::{Arc, Mutex};

use chk_cache::LruCache;
use chk_types::ContentKey;

fn page_len(bytes: &Arc<[u8]>) -> usize {
    bytes.len()
}

/// Byte-bounded LRU cache of serialised nodes, keyed by content key.
///
/// Clones share the same cache, so several maps over one store can reuse
/// each other's pages.
#[derive(Clone)]
pub struct PageCache {
    inner: Arc<Mutex<LruCache<ContentKey, Arc<[u8]>>>>,
}

impl PageCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::with_weigher(max_bytes, None, page_len))),
        }
    }

    pub fn get(&self, key: &ContentKey) -> Option<Arc<[u8]>> {
        self.inner.lock().expect("lock poisoned").get(key).cloned()
    }

    pub fn insert(&self, key: ContentKey, bytes: Arc<[u8]>) {
        self.inner.lock().expect("lock poisoned").add(key, bytes);
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.inner.lock().expect("lock poisoned").contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total cached bytes.
    pub fn weight(&self) -> usize {
        self.inner.lock().expect("lock poisoned").weight()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("lock poisoned").clear();
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("pages", &self.len())
            .field("bytes", &self.weight())
            .finish()
    }
}
