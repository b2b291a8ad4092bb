use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding-window event counter, keyed by an arbitrary string (in practice
/// `outbound:{tenant_id}`). Used for the per-tenant daily send ceiling.
pub struct SlidingWindow {
    map: DashMap<String, VecDeque<Instant>>,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            map: DashMap::new(),
            window,
        }
    }

    /// Record one event and return the number of events currently inside the
    /// window, including this one. Atomic per key (DashMap shard lock).
    pub fn record(&self, key: &str) -> u64 {
        let now = Instant::now();
        let mut entry = self.map.entry(key.to_string()).or_default();
        Self::evict(&mut entry, now, self.window);
        entry.push_back(now);
        entry.len() as u64
    }

    /// Count without recording — used for the "would this send exceed the
    /// limit" check before committing a delivery.
    pub fn count(&self, key: &str) -> u64 {
        let now = Instant::now();
        match self.map.get_mut(key) {
            Some(mut entry) => {
                Self::evict(&mut entry, now, self.window);
                entry.len() as u64
            }
            None => 0,
        }
    }

    fn evict(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= window {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_events_in_window() {
        let w = SlidingWindow::new(Duration::from_secs(60));
        assert_eq!(w.record("t1"), 1);
        assert_eq!(w.record("t1"), 2);
        assert_eq!(w.record("t2"), 1);
        assert_eq!(w.count("t1"), 2);
    }

    #[test]
    fn old_events_slide_out() {
        let w = SlidingWindow::new(Duration::from_millis(10));
        w.record("t1");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(w.count("t1"), 0);
        assert_eq!(w.record("t1"), 1);
    }
}
