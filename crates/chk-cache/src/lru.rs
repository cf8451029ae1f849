use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

struct Entry<K, V> {
    key: K,
    value: V,
    weight: usize,
    /// Towards the most recently used end.
    prev: Option<usize>,
    /// Towards the least recently used end.
    next: Option<usize>,
}

/// A least-recently-used cache.
///
/// Entries sit in an arena and form a doubly linked list through `usize`
/// indices, most recent at the head. Freed slots are recycled through a free
/// list, so a long-lived cache does not grow its arena past its high-water
/// mark.
///
/// The cache is bounded by total weight. When an insertion pushes the
/// weight above `max_weight`, the least recent entries are evicted until it
/// is at or below `after_cleanup_weight`. [`LruCache::new`] weighs every
/// entry as 1; [`LruCache::with_weigher`] weighs entries by a function and
/// refuses values heavier than `after_cleanup_weight`, since caching them
/// would flush everything else.
pub struct LruCache<K, V> {
    index: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    weight: usize,
    max_weight: usize,
    after_cleanup_weight: usize,
    weigher: Option<fn(&V) -> usize>,
}

impl<K: Clone + Eq + Hash, V> LruCache<K, V> {
    /// Cache holding up to `max_count` entries, trimmed to 80% when full.
    pub fn new(max_count: usize) -> Self {
        Self::build(max_count, max_count * 8 / 10, None)
    }

    /// Cache bounded by the summed `weigher` of its values.
    ///
    /// `after_cleanup_weight` defaults to 80% of `max_weight` when `None`.
    pub fn with_weigher(
        max_weight: usize,
        after_cleanup_weight: Option<usize>,
        weigher: fn(&V) -> usize,
    ) -> Self {
        let after = after_cleanup_weight.unwrap_or(max_weight * 8 / 10);
        Self::build(max_weight, after, Some(weigher))
    }

    fn build(max_weight: usize, after_cleanup_weight: usize, weigher: Option<fn(&V) -> usize>) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            weight: 0,
            max_weight,
            after_cleanup_weight: after_cleanup_weight.min(max_weight),
            weigher,
        }
    }

    /// Insert or replace `key`, making it the most recent entry.
    ///
    /// Returns `false` when a weighted value is too heavy to cache; any
    /// previous value for `key` is dropped in that case too.
    pub fn add(&mut self, key: K, value: V) -> bool {
        self.remove(&key);
        let weight = match self.weigher {
            Some(weigh) => {
                let weight = weigh(&value);
                if weight > self.after_cleanup_weight {
                    return false;
                }
                weight
            }
            None => 1,
        };
        let entry = Entry {
            key: key.clone(),
            value,
            weight,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
        self.weight += weight;
        if self.weight > self.max_weight {
            self.cleanup();
        }
        true
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
        self.slots[slot].as_ref().map(|e| &e.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|e| &e.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let entry = self.slots[slot].take()?;
        self.free.push(slot);
        self.weight -= entry.weight;
        Some(entry.value)
    }

    /// Evict least recent entries until the weight is at or below the
    /// after-cleanup target.
    pub fn cleanup(&mut self) {
        while self.weight > self.after_cleanup_weight {
            let Some(tail) = self.tail else { break };
            let Some(key) = self.slots[tail].as_ref().map(|e| e.key.clone()) else {
                break;
            };
            self.remove(&key);
        }
    }

    /// Change the bounds, evicting immediately if the cache is now too heavy.
    pub fn resize(&mut self, max_weight: usize, after_cleanup_weight: Option<usize>) {
        self.max_weight = max_weight;
        self.after_cleanup_weight = after_cleanup_weight
            .unwrap_or(max_weight * 8 / 10)
            .min(max_weight);
        if self.weight > self.max_weight {
            self.cleanup();
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Current summed weight of all entries.
    pub fn weight(&self) -> usize {
        self.weight
    }

    pub fn max_weight(&self) -> usize {
        self.max_weight
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.weight = 0;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let Some(entry) = self.slots[slot].as_ref() else { break };
            out.push(entry.key.clone());
            cursor = entry.next;
        }
        out
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(entry) = self.slots[h].as_mut() {
                entry.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.slots[slot].as_ref().map(|e| (e.prev, e.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(entry) = self.slots[p].as_mut() {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(entry) = self.slots[n].as_mut() {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("len", &self.index.len())
            .field("weight", &self.weight)
            .field("max_weight", &self.max_weight)
            .field("after_cleanup_weight", &self.after_cleanup_weight)
            .finish()
    }
}
