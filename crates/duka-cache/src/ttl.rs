use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Expiring key-value cache. Entries are evicted lazily on read and in bulk
/// by `purge_expired` (called from the gateway's housekeeping tick).
pub struct TtlCache<V> {
    map: DashMap<String, Entry<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        // Drop the shard guard before removing — remove_if re-locks.
        let expired = match self.map.get(key) {
            Some(e) if e.expires_at > Instant::now() => return Some(e.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.map
                .remove_if(key, |_, e| e.expires_at <= Instant::now());
        }
        None
    }

    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        self.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Atomic insert-if-absent. Returns true when the key was newly inserted;
    /// false when a live entry already existed. This is the dedup primitive:
    /// exactly one caller wins for a given key within the TTL.
    pub fn put_if_absent(&self, key: &str, value: V, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut inserted = false;
        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| {
            inserted = true;
            Entry {
                value: value.clone(),
                expires_at: now + ttl,
            }
        });
        if !inserted && entry.expires_at <= now {
            // The previous holder expired; take over the slot.
            entry.value = value;
            entry.expires_at = now + ttl;
            inserted = true;
        }
        inserted
    }

    pub fn remove(&self, key: &str) {
        self.map.remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sweep dead entries so long-lived caches do not grow without bound.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, e| e.expires_at > now);
        before - self.map.len()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
