use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use duka_cache::SlidingWindow;

/// Daily outbound ceiling as a 24h sliding window per tenant.
pub struct DailyLimit<'a> {
    window: &'a SlidingWindow,
}

pub enum LimitDecision {
    /// Proceed; the send has been counted.
    Allowed,
    /// Ceiling reached; defer to when the window frees up.
    Deferred { until: DateTime<Utc> },
}

impl<'a> DailyLimit<'a> {
    pub fn new(window: &'a SlidingWindow) -> Self {
        Self { window }
    }

    fn key(tenant_id: &str) -> String {
        format!("outbound:{}", tenant_id)
    }

    /// Check and count one send against the tenant ceiling. Warns at 80%.
    /// Excess sends are deferred to the next window rather than dropped.
    pub fn check_and_record(&self, tenant_id: &str, limit: u32) -> LimitDecision {
        let key = Self::key(tenant_id);
        let current = self.window.count(&key);
        if current >= limit as u64 {
            warn!(tenant_id, current, limit, "daily message ceiling reached; deferring");
            return LimitDecision::Deferred {
                // Conservative: the oldest event ages out within the window.
                until: Utc::now() + Duration::hours(1),
            };
        }
        let after = self.window.record(&key);
        if after * 10 >= limit as u64 * 8 && current * 10 < limit as u64 * 8 {
            warn!(tenant_id, used = after, limit, "tenant at 80% of daily message ceiling");
        }
        LimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn allows_until_ceiling_then_defers() {
        let window = SlidingWindow::new(StdDuration::from_secs(3600));
        let limit = DailyLimit::new(&window);
        for _ in 0..5 {
            assert!(matches!(
                limit.check_and_record("t1", 5),
                LimitDecision::Allowed
            ));
        }
        assert!(matches!(
            limit.check_and_record("t1", 5),
            LimitDecision::Deferred { .. }
        ));
    }

    #[test]
    fn limits_are_per_tenant() {
        let window = SlidingWindow::new(StdDuration::from_secs(3600));
        let limit = DailyLimit::new(&window);
        for _ in 0..3 {
            limit.check_and_record("t1", 3);
        }
        assert!(matches!(
            limit.check_and_record("t2", 3),
            LimitDecision::Allowed
        ));
    }
}
