use duka_tools::ToolError;

use crate::action::{BotAction, ListItem};

use super::{kes, slot_str, SubflowError, SubflowInput};

/// Service discovery → availability → capacity-checked booking.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    let query = slot_str(input, "service")
        .map(str::to_string)
        .unwrap_or_else(|| input.message.to_string());

    let services = input.tools.service_search(&input.ctx, &query)?;
    if services.is_empty() {
        return Ok(BotAction::text(
            "I couldn't find that service. What would you like to book?",
        ));
    }

    // With an explicit window and time, book straight away.
    if let (Some(window_id), Some(when)) =
        (slot_str(input, "window_id").map(str::to_string), slot_str(input, "datetime").map(str::to_string))
    {
        let service = &services[0];
        return match input.tools.book_appointment(
            &input.ctx,
            &service.id,
            &input.customer.id,
            &window_id,
            &when,
        ) {
            Ok(appointment) => {
                input.state.booked_appointment =
                    Some(duka_sessions::state::BookedAppointment {
                        appointment_id: appointment.id.clone(),
                        scheduled_for: appointment.scheduled_for.clone(),
                    });
                Ok(BotAction::text(format!(
                    "Booked! {} on {} — we'll send a reminder before your slot. \
                     Reference: {}.",
                    service.name,
                    appointment.scheduled_for,
                    &appointment.id[appointment.id.len().saturating_sub(6)..]
                )))
            }
            // Capacity exhaustion surfaces as a friendly nudge, not an error.
            Err(ToolError::Permanent(msg)) if msg.to_lowercase().contains("capacity") => {
                Ok(BotAction::text(
                    "That slot just filled up. Want me to show the other available times?",
                ))
            }
            Err(ToolError::NotFound(_)) => Ok(BotAction::text(
                "I couldn't find that slot anymore — let me show you what's open.",
            )),
            Err(e) => Err(e.into()),
        };
    }

    // Otherwise present the windows for the best-matching service.
    let service = &services[0];
    let windows = input.tools.availability_for_service(&input.ctx, &service.id)?;
    if windows.is_empty() {
        return Err(SubflowError::Escalate {
            reason: format!("no availability configured for service {}", service.id),
        });
    }

    Ok(BotAction::List {
        header: format!(
            "{} ({}) — available times, pick one:",
            service.name,
            kes(service.price_cents)
        ),
        items: windows
            .into_iter()
            .take(6)
            .map(|w| ListItem {
                id: w.id.clone(),
                title: match (w.weekday, &w.date) {
                    (Some(d), _) => format!("Every {}", weekday_name(d)),
                    (None, Some(date)) => date.clone(),
                    _ => "Slot".to_string(),
                },
                description: format!("{} – {}", w.start_time, w.end_time),
            })
            .collect(),
    })
}

fn weekday_name(weekday: u8) -> &'static str {
    match weekday {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        _ => "Saturday",
    }
}
