use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CommerceError, Result};
use crate::types::{Appointment, AppointmentStatus, AvailabilityWindow};

pub fn create_window(
    conn: &Connection,
    tenant_id: &str,
    service_id: &str,
    weekday: Option<u8>,
    date: Option<&str>,
    start_time: &str,
    end_time: &str,
    capacity: u32,
    timezone: &str,
) -> Result<AvailabilityWindow> {
    if weekday.is_none() == date.is_none() {
        return Err(CommerceError::InvalidInput(
            "a window is either a recurring weekday or a specific date".to_string(),
        ));
    }
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO availability_windows
         (id, tenant_id, service_id, weekday, date, start_time, end_time, capacity, timezone)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
        params![
            id,
            tenant_id,
            service_id,
            weekday,
            date,
            start_time,
            end_time,
            capacity,
            timezone
        ],
    )?;
    get_window(conn, tenant_id, &id)?.ok_or(CommerceError::NotFound {
        kind: "availability_window",
        id,
    })
}

pub fn get_window(
    conn: &Connection,
    tenant_id: &str,
    window_id: &str,
) -> Result<Option<AvailabilityWindow>> {
    let mut stmt =
        conn.prepare("SELECT * FROM availability_windows WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, window_id], row_to_window)
        .optional()?)
}

pub fn windows_for_service(
    conn: &Connection,
    tenant_id: &str,
    service_id: &str,
) -> Result<Vec<AvailabilityWindow>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM availability_windows
         WHERE tenant_id = ?1 AND service_id = ?2
         ORDER BY IFNULL(date, ''), IFNULL(weekday, 0), start_time",
    )?;
    let rows = stmt.query_map(params![tenant_id, service_id], row_to_window)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Live bookings counted against a window's capacity: pending + confirmed on
/// the requested day.
fn booked_count(
    conn: &Connection,
    tenant_id: &str,
    window_id: &str,
    scheduled_for: &str,
) -> Result<u32> {
    let day = &scheduled_for[..scheduled_for.len().min(10)];
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE tenant_id = ?1 AND window_id = ?2
           AND substr(scheduled_for, 1, 10) = ?3
           AND status IN ('pending','confirmed')",
        params![tenant_id, window_id, day],
        |row| row.get(0),
    )?;
    Ok(n as u32)
}

/// Book an appointment inside a window. The capacity check and the insert
/// run in one immediate transaction so parallel bookings cannot oversubscribe
/// the window.
pub fn book(
    conn: &mut Connection,
    tenant_id: &str,
    service_id: &str,
    customer_id: &str,
    window_id: &str,
    scheduled_for: &str,
) -> Result<Appointment> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let window = {
        let mut stmt = tx
            .prepare("SELECT * FROM availability_windows WHERE tenant_id = ?1 AND id = ?2")?;
        stmt.query_row(params![tenant_id, window_id], row_to_window)
            .optional()?
    }
    .ok_or(CommerceError::NotFound {
        kind: "availability_window",
        id: window_id.to_string(),
    })?;

    if window.service_id != service_id {
        return Err(CommerceError::InvalidInput(
            "window does not belong to this service".to_string(),
        ));
    }

    let booked = booked_count(&tx, tenant_id, window_id, scheduled_for)?;
    if booked >= window.capacity {
        return Err(CommerceError::CapacityExceeded {
            window_id: window_id.to_string(),
        });
    }

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO appointments
         (id, tenant_id, service_id, customer_id, window_id, scheduled_for, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
        params![id, tenant_id, service_id, customer_id, window_id, scheduled_for, now],
    )?;
    tx.commit()?;

    get(conn, tenant_id, &id)?.ok_or(CommerceError::NotFound {
        kind: "appointment",
        id,
    })
}

pub fn get(conn: &Connection, tenant_id: &str, appointment_id: &str) -> Result<Option<Appointment>> {
    let mut stmt = conn.prepare("SELECT * FROM appointments WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, appointment_id], row_to_appointment)
        .optional()?)
}

/// Allowed transitions:
/// pending → confirmed | canceled;
/// confirmed → done | canceled | no_show.
pub fn transition(
    conn: &Connection,
    tenant_id: &str,
    appointment_id: &str,
    to: AppointmentStatus,
) -> Result<()> {
    let current = get(conn, tenant_id, appointment_id)?
        .ok_or(CommerceError::NotFound {
            kind: "appointment",
            id: appointment_id.to_string(),
        })?
        .status;

    let allowed = matches!(
        (current, to),
        (AppointmentStatus::Pending, AppointmentStatus::Confirmed)
            | (AppointmentStatus::Pending, AppointmentStatus::Canceled)
            | (AppointmentStatus::Confirmed, AppointmentStatus::Done)
            | (AppointmentStatus::Confirmed, AppointmentStatus::Canceled)
            | (AppointmentStatus::Confirmed, AppointmentStatus::NoShow)
    );
    if !allowed {
        return Err(CommerceError::Conflict(format!(
            "appointment cannot go from {} to {}",
            current, to
        )));
    }

    conn.execute(
        "UPDATE appointments SET status = ?3, updated_at = ?4
         WHERE tenant_id = ?1 AND id = ?2",
        params![
            tenant_id,
            appointment_id,
            to.to_string(),
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn row_to_window(row: &Row<'_>) -> rusqlite::Result<AvailabilityWindow> {
    Ok(AvailabilityWindow {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        service_id: row.get("service_id")?,
        weekday: row.get::<_, Option<i64>>("weekday")?.map(|w| w as u8),
        date: row.get("date")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        capacity: row.get::<_, i64>("capacity")? as u32,
        timezone: row.get("timezone")?,
    })
}

fn row_to_appointment(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    let status: String = row.get("status")?;
    Ok(Appointment {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        service_id: row.get("service_id")?,
        customer_id: row.get("customer_id")?,
        window_id: row.get("window_id")?,
        scheduled_for: row.get("scheduled_for")?,
        status: AppointmentStatus::from_str(&status).unwrap_or(AppointmentStatus::Canceled),
        note: row.get("note")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::create_service;
    use crate::db::init_db;

    fn setup() -> (Connection, String, String) {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let service = create_service(&conn, "t1", "Braiding", "", 150_000, 120).unwrap();
        let window = create_window(
            &conn,
            "t1",
            &service.id,
            Some(6),
            None,
            "09:00",
            "17:00",
            2,
            "Africa/Nairobi",
        )
        .unwrap();
        (conn, service.id, window.id)
    }

    #[test]
    fn booking_respects_window_capacity() {
        let (mut conn, service, window) = setup();
        book(&mut conn, "t1", &service, "c1", &window, "2026-08-08T10:00").unwrap();
        book(&mut conn, "t1", &service, "c2", &window, "2026-08-08T11:00").unwrap();
        let err = book(&mut conn, "t1", &service, "c3", &window, "2026-08-08T12:00").unwrap_err();
        assert!(matches!(err, CommerceError::CapacityExceeded { .. }));
    }

    #[test]
    fn canceled_appointment_frees_capacity() {
        let (mut conn, service, window) = setup();
        let a = book(&mut conn, "t1", &service, "c1", &window, "2026-08-08T10:00").unwrap();
        book(&mut conn, "t1", &service, "c2", &window, "2026-08-08T11:00").unwrap();
        transition(&conn, "t1", &a.id, AppointmentStatus::Canceled).unwrap();
        book(&mut conn, "t1", &service, "c3", &window, "2026-08-08T12:00").unwrap();
    }

    #[test]
    fn capacity_is_per_day() {
        let (mut conn, service, window) = setup();
        book(&mut conn, "t1", &service, "c1", &window, "2026-08-08T10:00").unwrap();
        book(&mut conn, "t1", &service, "c2", &window, "2026-08-08T11:00").unwrap();
        // Different day, same recurring window.
        book(&mut conn, "t1", &service, "c3", &window, "2026-08-15T10:00").unwrap();
    }

    #[test]
    fn invalid_transition_rejected() {
        let (mut conn, service, window) = setup();
        let a = book(&mut conn, "t1", &service, "c1", &window, "2026-08-08T10:00").unwrap();
        let err = transition(&conn, "t1", &a.id, AppointmentStatus::Done).unwrap_err();
        assert!(matches!(err, CommerceError::Conflict(_)));

        transition(&conn, "t1", &a.id, AppointmentStatus::Confirmed).unwrap();
        transition(&conn, "t1", &a.id, AppointmentStatus::Done).unwrap();
    }

    #[test]
    fn window_must_be_weekday_or_date_not_both() {
        let (conn, service, _) = setup();
        assert!(create_window(
            &conn,
            "t1",
            &service,
            Some(1),
            Some("2026-08-08"),
            "09:00",
            "10:00",
            1,
            "Africa/Nairobi"
        )
        .is_err());
    }
}
