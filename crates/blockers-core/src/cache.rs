//! Bounded recently-used cache.
//!
//! Lookups promote the entry, so even reads need `&mut self`; callers that
//! share a cache wrap it in a single `Mutex`.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Fixed-capacity LRU cache.
///
/// Recency is a monotonically increasing tick; `order` maps tick -> key so
/// the oldest entry is always the first one in the tree.
#[derive(Debug)]
pub struct RecentlyUsedCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    order: BTreeMap<u64, K>,
}

impl<K: Hash + Eq + Clone, V> RecentlyUsedCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Get a value, marking it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let tick = self.next_tick();
        let (_, last_used) = self.entries.get_mut(key)?;
        let old = std::mem::replace(last_used, tick);
        if let Some(k) = self.order.remove(&old) {
            self.order.insert(tick, k);
        }
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Get a value without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Check for a key without touching recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Insert or replace a value, evicting the least recently used entry
    /// when full.
    pub fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();

        if let Some((old_value, last_used)) = self.entries.get_mut(&key) {
            *old_value = value;
            let old = std::mem::replace(last_used, tick);
            self.order.remove(&old);
            self.order.insert(tick, key);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some((_, oldest)) = self.order.pop_first() {
                self.entries.remove(&oldest);
            }
        }

        self.order.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (value, tick) = self.entries.remove(key)?;
        self.order.remove(&tick);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}
