use chrono::{DateTime, Duration, Timelike, Utc};

use duka_core::types::MessageKind;

/// Quiet-hours decision for one send.
///
/// `start_hour`/`end_hour` are local hours in the recipient's time zone,
/// expressed via `utc_offset_minutes`. A window like 21 → 8 wraps midnight.
/// Transactional messages bypass quiet hours entirely.
pub fn defer_until(
    now: DateTime<Utc>,
    kind: MessageKind,
    utc_offset_minutes: i32,
    start_hour: u8,
    end_hour: u8,
) -> Option<DateTime<Utc>> {
    if kind.consent_category() == duka_core::types::ConsentCategory::Transactional {
        return None;
    }
    if start_hour == end_hour {
        // Degenerate window: no quiet hours.
        return None;
    }

    let local = now + Duration::minutes(utc_offset_minutes as i64);
    let hour = local.hour() as u8;

    let in_quiet = if start_hour < end_hour {
        hour >= start_hour && hour < end_hour
    } else {
        hour >= start_hour || hour < end_hour
    };
    if !in_quiet {
        return None;
    }

    // First permitted instant: the next local occurrence of end_hour.
    let local_date = local.date_naive();
    let end_today = local_date
        .and_hms_opt(end_hour as u32, 0, 0)
        .expect("valid hour");
    let local_naive = local.naive_utc();
    let end_local = if local_naive < end_today {
        end_today
    } else {
        end_today + Duration::days(1)
    };
    let end_utc = DateTime::<Utc>::from_naive_utc_and_offset(end_local, Utc)
        - Duration::minutes(utc_offset_minutes as i64);
    Some(end_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Nairobi is UTC+3 (offset 180).
    const NAIROBI: i32 = 180;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, 0).unwrap()
    }

    #[test]
    fn transactional_bypasses_quiet_hours() {
        // 23:00 local (20:00 UTC) inside the 21→8 window.
        let deferred = defer_until(at(20, 0), MessageKind::BotResponse, NAIROBI, 21, 8);
        assert!(deferred.is_none());
    }

    #[test]
    fn promotional_in_quiet_window_defers_to_morning() {
        // 23:30 local → defer to 08:00 local = 05:00 UTC next day.
        let deferred =
            defer_until(at(20, 30), MessageKind::ScheduledPromotional, NAIROBI, 21, 8).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 8, 2, 5, 0, 0).unwrap());
    }

    #[test]
    fn early_morning_defers_same_day() {
        // 05:00 local (02:00 UTC) → defer to 08:00 local same day.
        let deferred =
            defer_until(at(2, 0), MessageKind::AutomatedReminder, NAIROBI, 21, 8).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 8, 1, 5, 0, 0).unwrap());
    }

    #[test]
    fn daytime_sends_pass() {
        // 14:00 local.
        let deferred =
            defer_until(at(11, 0), MessageKind::ScheduledPromotional, NAIROBI, 21, 8);
        assert!(deferred.is_none());
    }

    #[test]
    fn non_wrapping_window() {
        // Quiet 12→14 local; 13:00 local defers to 14:00 local.
        let deferred =
            defer_until(at(10, 0), MessageKind::ScheduledPromotional, NAIROBI, 12, 14).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 8, 1, 11, 0, 0).unwrap());
    }
}
