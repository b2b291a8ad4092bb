use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use duka_commerce::appointments;
use duka_commerce::types::AppointmentStatus;
use duka_core::types::MessageKind;
use duka_outbound::{Deliverer, DeliveryError, WaPayload};
use duka_sessions::customers;
use duka_tenancy::TenantStore;

use crate::engine::{JobHandler, QueueHandle};
use crate::error::Result;
use crate::types::Queue;

/// Schedule the reminder for an appointment. The dedup key
/// `appt:{appointment_id}:{offset}` guarantees one job per appointment and
/// offset no matter how often booking code re-runs.
pub fn schedule_reminder(
    handle: &QueueHandle,
    tenant_id: &str,
    appointment_id: &str,
    remind_at: DateTime<Utc>,
    offset_label: &str,
) -> Result<String> {
    handle.enqueue(
        Queue::Default,
        "appointment_reminder",
        &serde_json::json!({
            "tenant_id": tenant_id,
            "appointment_id": appointment_id,
        }),
        3,
        Some(&format!("appt:{}:{}", appointment_id, offset_label)),
        Some(remind_at),
    )
}

/// Sends the reminder if the appointment is still live. Consent and quiet
/// hours are enforced by the deliverer — a reminder to an opted-out customer
/// is a hard error we swallow as "done" (the decision is final, retrying
/// cannot change it).
pub struct AppointmentReminder {
    db: Arc<Mutex<Connection>>,
    tenants: Arc<TenantStore>,
    deliverer: Arc<Deliverer>,
}

impl AppointmentReminder {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        tenants: Arc<TenantStore>,
        deliverer: Arc<Deliverer>,
    ) -> Self {
        Self {
            db,
            tenants,
            deliverer,
        }
    }
}

#[async_trait]
impl JobHandler for AppointmentReminder {
    fn kind(&self) -> &'static str {
        "appointment_reminder"
    }

    async fn run(&self, payload: &Value) -> std::result::Result<(), String> {
        let tenant_id = payload
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload missing tenant_id".to_string())?;
        let appointment_id = payload
            .get("appointment_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "payload missing appointment_id".to_string())?;

        let (appointment, customer, service_name) = {
            let conn = self.db.lock().unwrap();
            let appointment = appointments::get(&conn, tenant_id, appointment_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "appointment not found".to_string())?;
            let customer = customers::get(&conn, tenant_id, &appointment.customer_id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| "customer not found".to_string())?;
            let service =
                duka_commerce::catalog::get_service(&conn, tenant_id, &appointment.service_id)
                    .map_err(|e| e.to_string())?;
            (
                appointment,
                customer,
                service.map(|s| s.name).unwrap_or_else(|| "your booking".to_string()),
            )
        };

        if !matches!(
            appointment.status,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        ) {
            info!(appointment_id, status = %appointment.status, "reminder skipped");
            return Ok(());
        }

        let tenant = self
            .tenants
            .get(tenant_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "tenant not found".to_string())?;
        let creds = self.tenants.credentials(&tenant).map_err(|e| e.to_string())?;

        let payloads = vec![WaPayload::Text {
            body: format!(
                "Reminder: {} on {}. Reply CANCEL if you can't make it.",
                service_name, appointment.scheduled_for
            ),
        }];

        match self
            .deliverer
            .send_turn(
                &tenant,
                &creds,
                &customer,
                // Reminders are keyed on the appointment, not a conversation.
                &format!("appt:{}", appointment.id),
                0,
                MessageKind::AutomatedReminder,
                &payloads,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(DeliveryError::ConsentDenied { .. }) => {
                info!(appointment_id, "reminder suppressed by consent");
                Ok(())
            }
            Err(DeliveryError::Deferred { until }) => {
                Err(format!("deferred until {}; retry will pick it up", until))
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
