//! LRU (Least Recently Used) cache implementation
//!
//! Entries live in a dense arena. A binary min-heap of arena slots, ordered by
//! a monotonically increasing recency stamp, keeps the least recently used
//! entry at the root. Touching an entry gives it a stamp larger than any other,
//! so the sift-down always carries it to a leaf; `delete` relies on this to
//! remove an arbitrary entry with a single swap against the last leaf.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{CacheError, InvariantError, Result};
use crate::node::Node;

/// Upper bound on storage reserved up front, independent of capacity
const PREALLOC_LIMIT: usize = 4096;

/// Callback invoked with the key and value of every capacity eviction
pub type EvictionCallback<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

/// Unsynchronized heap state. Every method runs under the cache mutex.
struct Inner<K, V> {
    /// Arena of nodes, always dense
    nodes: Vec<Node<K, V>>,
    /// Heap position -> arena slot
    heap: Vec<usize>,
    /// Key -> arena slot
    index: HashMap<K, usize, RandomState>,
    next_priority: u32,
    capacity: usize,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
{
    fn new(capacity: usize) -> Self {
        let reserve = capacity.min(PREALLOC_LIMIT);
        Self {
            nodes: Vec::with_capacity(reserve),
            heap: Vec::with_capacity(reserve),
            index: HashMap::with_capacity_and_hasher(reserve, RandomState::new()),
            next_priority: 0,
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn slot_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).copied()
    }

    fn priority_at(&self, pos: usize) -> u32 {
        self.nodes[self.heap[pos]].priority
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.nodes[self.heap[a]].heap_index = a as u32;
        self.nodes[self.heap[b]].heap_index = b as u32;
    }

    fn sift_down(&mut self, mut pos: usize) -> usize {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                return pos;
            }
            let right = left + 1;
            let child = if right < len && self.priority_at(right) < self.priority_at(left) {
                right
            } else {
                left
            };
            if self.priority_at(child) >= self.priority_at(pos) {
                return pos;
            }
            self.swap(pos, child);
            pos = child;
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.priority_at(parent) <= self.priority_at(pos) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    /// Hand out the next recency stamp, renormalising before the counter wraps
    fn bump_priority(&mut self) -> u32 {
        if self.next_priority == u32::MAX {
            self.renormalize();
        }
        let priority = self.next_priority;
        self.next_priority += 1;
        priority
    }

    /// Shift every stamp down by the root's stamp. If the root already sits
    /// at zero, fall back to dense renumbering by rank. Relative order is
    /// preserved either way, so the heap stays valid.
    fn renormalize(&mut self) {
        if self.heap.is_empty() {
            self.next_priority = 0;
            return;
        }

        let base = self.priority_at(0);
        if base > 0 {
            for node in &mut self.nodes {
                node.priority -= base;
            }
            self.next_priority -= base;
        } else {
            let mut order: Vec<(u32, usize)> = self
                .nodes
                .iter()
                .enumerate()
                .map(|(slot, node)| (node.priority, slot))
                .collect();
            order.sort_unstable();
            for (rank, (_, slot)) in order.into_iter().enumerate() {
                self.nodes[slot].priority = rank as u32;
            }
            self.next_priority = self.nodes.len() as u32;
        }

        debug!(
            entries = self.nodes.len(),
            base,
            next_priority = self.next_priority,
            "renormalized recency counter"
        );
    }

    /// Mark the slot as most recently used. Leaves it on a leaf.
    fn touch(&mut self, slot: usize) {
        let priority = self.bump_priority();
        self.nodes[slot].priority = priority;
        let pos = self.nodes[slot].heap_index as usize;
        self.sift_down(pos);
    }

    /// Insert or overwrite. Returns the evicted entry when the root was
    /// recycled to make room.
    fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.slot_of(&key) {
            self.nodes[slot].value = value;
            self.touch(slot);
            return None;
        }

        if self.len() >= self.capacity {
            let slot = self.heap[0];
            let (old_key, old_value) = self.nodes[slot].replace(key.clone(), value);
            self.index.remove(&old_key);
            self.index.insert(key, slot);
            self.touch(slot);
            return Some((old_key, old_value));
        }

        // The fresh stamp is the largest in the heap, so appending keeps order.
        let priority = self.bump_priority();
        let slot = self.nodes.len();
        let pos = self.heap.len();
        self.nodes.push(Node::new(key.clone(), value, priority, pos as u32));
        self.heap.push(slot);
        self.index.insert(key, slot);
        None
    }

    fn remove_slot(&mut self, slot: usize) -> (K, V) {
        self.touch(slot);

        let pos = self.nodes[slot].heap_index as usize;
        let last = self.heap.len() - 1;
        if pos != last {
            self.swap(pos, last);
        }
        self.heap.pop();
        // `pos` is a leaf, so the element moved into it can only need to rise.
        if pos < self.heap.len() {
            self.sift_up(pos);
        }

        let node = self.nodes.swap_remove(slot);
        if slot < self.nodes.len() {
            let moved_pos = self.nodes[slot].heap_index as usize;
            self.heap[moved_pos] = slot;
            if let Some(entry) = self.index.get_mut(&self.nodes[slot].key) {
                *entry = slot;
            }
        }
        self.index.remove(&node.key);
        (node.key, node.value)
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.slot_of(key)?;
        Some(self.remove_slot(slot))
    }

    /// Remove every entry matching `pred`, in one pass under the caller's lock
    fn remove_if<F>(&mut self, mut pred: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> = self
            .nodes
            .iter()
            .filter(|node| pred(&node.key, &node.value))
            .map(|node| node.key.clone())
            .collect();

        doomed
            .iter()
            .filter_map(|key| self.remove(key))
            .collect()
    }

    /// Rebuild storage in heap order, so slot `i` sits at heap position `i`
    fn defragment(&mut self) {
        let mut old = std::mem::take(&mut self.nodes);
        old.sort_unstable_by_key(|node| node.heap_index);

        let reserve = self.capacity.min(PREALLOC_LIMIT).max(old.len());
        let mut nodes = Vec::with_capacity(reserve);
        let mut heap = Vec::with_capacity(reserve);
        let mut index = HashMap::with_capacity_and_hasher(reserve, RandomState::new());
        for (slot, node) in old.into_iter().enumerate() {
            index.insert(node.key.clone(), slot);
            heap.push(slot);
            nodes.push(node);
        }

        self.nodes = nodes;
        self.heap = heap;
        self.index = index;
    }

    fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        if self.heap.len() != self.index.len() || self.heap.len() != self.nodes.len() {
            return Err(InvariantError::new(format!(
                "size mismatch: heap={} index={} nodes={}",
                self.heap.len(),
                self.index.len(),
                self.nodes.len()
            )));
        }
        if self.heap.len() > self.capacity {
            return Err(InvariantError::new(format!(
                "len {} exceeds capacity {}",
                self.heap.len(),
                self.capacity
            )));
        }
        for (pos, &slot) in self.heap.iter().enumerate() {
            let node = &self.nodes[slot];
            if node.heap_index as usize != pos {
                return Err(InvariantError::new(format!(
                    "slot {} records heap index {} but sits at {}",
                    slot, node.heap_index, pos
                )));
            }
            if pos > 0 && self.priority_at((pos - 1) / 2) > node.priority {
                return Err(InvariantError::new(format!(
                    "heap order violated at position {}",
                    pos
                )));
            }
            if node.priority >= self.next_priority {
                return Err(InvariantError::new(format!(
                    "priority {} not below counter {}",
                    node.priority, self.next_priority
                )));
            }
        }
        for (key, &slot) in &self.index {
            if self.nodes.get(slot).map(|node| &node.key) != Some(key) {
                return Err(InvariantError::new(format!(
                    "index entry points at slot {} holding another key",
                    slot
                )));
            }
        }
        Ok(())
    }
}

/// Bounded, thread-safe LRU cache.
///
/// One mutex guards the heap, the arena, the key index and the recency
/// counter for the duration of each operation. The eviction callback runs
/// after the lock is released, so it may call back into the cache.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    touch_on_read: bool,
    on_evict: Option<EvictionCallback<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new LRU cache with the given capacity
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        assert!(capacity < u32::MAX as usize, "Capacity must fit in 32 bits");

        Self {
            inner: Mutex::new(Inner::new(capacity)),
            capacity,
            touch_on_read: true,
            on_evict: None,
        }
    }

    /// Choose whether plain `get` refreshes recency (default: true)
    pub fn with_touch_on_read(mut self, touch_on_read: bool) -> Self {
        self.touch_on_read = touch_on_read;
        self
    }

    /// Install a callback for capacity-driven evictions.
    ///
    /// Manual removal (`delete`, `pop`, `clear`) never fires it.
    pub fn with_eviction_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `get` refreshes recency
    pub fn touch_on_read(&self) -> bool {
        self.touch_on_read
    }

    /// Get a value, refreshing its recency if `touch_on_read` is set
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let slot = inner.slot_of(key)?;
        if self.touch_on_read {
            inner.touch(slot);
        }
        Some(inner.nodes[slot].value.clone())
    }

    /// Get a value or fall back to `default`
    pub fn get_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Get a value, always refreshing its recency.
    ///
    /// Unlike [`get`](Self::get) this ignores `touch_on_read` and reports a
    /// missing key as [`CacheError::Miss`].
    pub fn index_get<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock();
        let slot = inner.slot_of(key).ok_or(CacheError::Miss)?;
        inner.touch(slot);
        Ok(inner.nodes[slot].value.clone())
    }

    /// Get a value without refreshing its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let inner = self.inner.lock();
        inner
            .slot_of(key)
            .map(|slot| inner.nodes[slot].value.clone())
    }

    /// Insert or overwrite a value, making it the most recently used entry.
    ///
    /// At capacity the least recently used entry is evicted first.
    pub fn set(&self, key: K, value: V) {
        let evicted = self.inner.lock().set(key, value);
        self.notify_evicted(evicted);
    }

    /// Return the existing value (touched) or insert `default` and return it
    pub fn setdefault(&self, key: K, default: V) -> V {
        let evicted = {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.slot_of(&key) {
                inner.touch(slot);
                return inner.nodes[slot].value.clone();
            }
            inner.set(key, default.clone())
        };
        self.notify_evicted(evicted);
        default
    }

    /// Remove a key. Missing keys report [`CacheError::Miss`].
    pub fn delete<Q>(&self, key: &Q) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.pop(key).map(|_| ())
    }

    /// Remove a key and return its value
    pub fn pop<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.inner.lock().remove(key);
        removed.map(|(_, value)| value).ok_or(CacheError::Miss)
    }

    /// Remove a key and return its value, or `default` if absent
    pub fn pop_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.pop(key).unwrap_or(default)
    }

    /// `set` every pair from the iterator
    pub fn update<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.set(key, value);
        }
    }

    /// `set` every entry of another cache
    pub fn update_from(&self, other: &LruCache<K, V>) {
        self.update(other.items());
    }

    /// Drop every entry. Never fires the eviction callback.
    pub fn clear(&self) {
        let old = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut *inner, Inner::new(self.capacity))
        };
        // Entries are dropped outside the lock.
        drop(old);
    }

    /// Remove every entry matching `pred` and compact storage, all under a
    /// single lock acquisition.
    ///
    /// The removed pairs are returned so they are dropped by the caller,
    /// outside the lock. Never fires the eviction callback.
    pub fn remove_if<F>(&self, pred: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut inner = self.inner.lock();
        let removed = inner.remove_if(pred);
        inner.defragment();
        removed
    }

    /// Rebuild internal storage with compacted containers.
    ///
    /// Contents and recency order are unchanged.
    pub fn defragment(&self) {
        self.inner.lock().defragment();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check for a key without touching it
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().slot_of(key).is_some()
    }

    /// Snapshot of keys in heap order (not recency order)
    pub fn keys(&self) -> Vec<K> {
        let inner = self.inner.lock();
        inner
            .heap
            .iter()
            .map(|&slot| inner.nodes[slot].key.clone())
            .collect()
    }

    /// Snapshot of values in heap order
    pub fn values(&self) -> Vec<V> {
        let inner = self.inner.lock();
        inner
            .heap
            .iter()
            .map(|&slot| inner.nodes[slot].value.clone())
            .collect()
    }

    /// Snapshot of entries in heap order
    pub fn items(&self) -> Vec<(K, V)> {
        let inner = self.inner.lock();
        inner
            .heap
            .iter()
            .map(|&slot| {
                let node = &inner.nodes[slot];
                (node.key.clone(), node.value.clone())
            })
            .collect()
    }

    /// Key of the least recently used entry, i.e. the next eviction victim
    pub fn lru_key(&self) -> Option<K> {
        let inner = self.inner.lock();
        inner
            .heap
            .first()
            .map(|&slot| inner.nodes[slot].key.clone())
    }

    /// Verify heap order, position bookkeeping and index consistency
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        self.inner.lock().check_invariants()
    }

    fn notify_evicted(&self, evicted: Option<(K, V)>) {
        if let Some((key, value)) = evicted {
            trace!("evicted least recently used entry");
            if let Some(callback) = &self.on_evict {
                callback(key, value);
            }
        }
    }

    #[cfg(test)]
    fn force_next_priority(&self, priority: u32) {
        self.inner.lock().next_priority = priority;
    }

    #[cfg(test)]
    fn priorities_by_key(&self) -> Vec<(K, u32)> {
        let inner = self.inner.lock();
        inner
            .nodes
            .iter()
            .map(|node| (node.key.clone(), node.priority))
            .collect()
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.inner.lock().heap.len())
            .field("touch_on_read", &self.touch_on_read)
            .finish()
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Set(u16, u16),
        Get(u16),
        IndexGet(u16),
        Delete(u16),
        SetDefault(u16, u16),
        Defragment,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u16..64, any::<u16>()).prop_map(|(k, v)| Op::Set(k, v)),
            3 => (0u16..64).prop_map(Op::Get),
            1 => (0u16..64).prop_map(Op::IndexGet),
            2 => (0u16..64).prop_map(Op::Delete),
            1 => (0u16..64, any::<u16>()).prop_map(|(k, v)| Op::SetDefault(k, v)),
            1 => Just(Op::Defragment),
        ]
    }

    proptest! {
        /// Heap order and position bookkeeping survive any operation sequence.
        #[test]
        fn prop_invariants_hold(
            capacity in 1usize..40,
            ops in prop::collection::vec(op_strategy(), 0..300)
        ) {
            let cache = LruCache::new(capacity);
            for op in ops {
                match op {
                    Op::Set(k, v) => cache.set(k, v),
                    Op::Get(k) => { cache.get(&k); }
                    Op::IndexGet(k) => { let _ = cache.index_get(&k); }
                    Op::Delete(k) => { let _ = cache.delete(&k); }
                    Op::SetDefault(k, v) => { cache.setdefault(k, v); }
                    Op::Defragment => cache.defragment(),
                }
                prop_assert!(cache.check_invariants().is_ok());
                prop_assert!(cache.len() <= capacity);
            }
        }

        /// The cache agrees with a reference model of recency order.
        #[test]
        fn prop_matches_reference_model(
            capacity in 1usize..16,
            ops in prop::collection::vec(op_strategy(), 0..200)
        ) {
            let cache = LruCache::new(capacity);
            // Most recently used at the back.
            let mut model: Vec<(u16, u16)> = Vec::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        cache.set(k, v);
                        if let Some(i) = model.iter().position(|(mk, _)| *mk == k) {
                            model.remove(i);
                        } else if model.len() == capacity {
                            model.remove(0);
                        }
                        model.push((k, v));
                    }
                    Op::Get(k) | Op::IndexGet(k) => {
                        let got = cache.get(&k);
                        let expected = model.iter().position(|(mk, _)| *mk == k).map(|i| {
                            let entry = model.remove(i);
                            model.push(entry);
                            entry.1
                        });
                        prop_assert_eq!(got, expected);
                    }
                    Op::Delete(k) => {
                        let got = cache.delete(&k).is_ok();
                        let pos = model.iter().position(|(mk, _)| *mk == k);
                        if let Some(i) = pos {
                            model.remove(i);
                        }
                        prop_assert_eq!(got, pos.is_some());
                    }
                    Op::SetDefault(k, v) => {
                        let got = cache.setdefault(k, v);
                        let expected = if let Some(i) = model.iter().position(|(mk, _)| *mk == k) {
                            let entry = model.remove(i);
                            model.push(entry);
                            entry.1
                        } else {
                            if model.len() == capacity {
                                model.remove(0);
                            }
                            model.push((k, v));
                            v
                        };
                        prop_assert_eq!(got, expected);
                    }
                    Op::Defragment => cache.defragment(),
                }
                prop_assert_eq!(cache.len(), model.len());
                prop_assert_eq!(cache.lru_key(), model.first().map(|(k, _)| *k));
            }
        }
    }
}
