use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Counter {
    value: u64,
    expires_at: Instant,
}

/// Monotone version counters with TTL.
///
/// Backs the scope-cache invalidation protocol: cache keys embed the current
/// version, and every RBAC write *increments* the counter instead of deleting
/// cache entries. A reader that already resolved version N keeps serving its
/// version-N snapshot; the next read resolves N+1 and misses into a fresh
/// compute. No delete, no invalidate-then-refill race.
pub struct VersionCounters {
    map: DashMap<String, Counter>,
    ttl: Duration,
}

impl VersionCounters {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: DashMap::new(),
            ttl,
        }
    }

    /// Current version for `key`. An expired or absent counter restarts at 0.
    /// Reading refreshes the TTL so an actively-used counter never lapses
    /// mid-conversation.
    pub fn current(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut entry = self.map.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: now + self.ttl,
        });
        if entry.expires_at <= now {
            entry.value = 0;
        }
        entry.expires_at = now + self.ttl;
        entry.value
    }

    /// Atomically bump the version and return the new value.
    pub fn increment(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut entry = self.map.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: now + self.ttl,
        });
        if entry.expires_at <= now {
            entry.value = 0;
        }
        entry.value += 1;
        entry.expires_at = now + self.ttl;
        entry.value
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, c| c.expires_at > now);
        before - self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_at_zero_and_increments() {
        let counters = VersionCounters::new(Duration::from_secs(60));
        assert_eq!(counters.current("scope_version:tu1"), 0);
        assert_eq!(counters.increment("scope_version:tu1"), 1);
        assert_eq!(counters.increment("scope_version:tu1"), 2);
        assert_eq!(counters.current("scope_version:tu1"), 2);
    }

    #[test]
    fn parallel_increments_are_lost_update_free() {
        let counters = Arc::new(VersionCounters::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    c.increment("k");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.current("k"), 800);
    }

    #[test]
    fn expired_counter_restarts() {
        let counters = VersionCounters::new(Duration::from_millis(0));
        counters.increment("k");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(counters.current("k"), 0);
    }
}
