use duka_sessions::types::PreferenceUpdate;

use crate::action::BotAction;

use super::{slot_bool, slot_str, SubflowError, SubflowInput};

/// Explicit preference changes. STOP/UNSUBSCRIBE never reaches this subflow —
/// it is short-circuited at the top of the turn before anything else runs.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    let update = PreferenceUpdate {
        language_pref: slot_str(input, "language").map(str::to_string),
        display_name: slot_str(input, "name").map(str::to_string),
        marketing_opt_in: slot_bool(input, "marketing_opt_in"),
        consent_reminder: slot_bool(input, "reminders"),
        consent_promotional: slot_bool(input, "promotions"),
    };

    let nothing_to_do = update.language_pref.is_none()
        && update.display_name.is_none()
        && update.marketing_opt_in.is_none()
        && update.consent_reminder.is_none()
        && update.consent_promotional.is_none();
    if nothing_to_do {
        return Ok(BotAction::text(
            "I can update your language, your name, or whether you get reminders \
             and offers from us. What would you like to change?",
        ));
    }

    input
        .tools
        .customer_update_preferences(&input.ctx, &input.customer.id, &update)?;

    if let Some(ref lang) = update.language_pref {
        input.state.prefs.language_pref = Some(lang.clone());
    }
    if let Some(opt_in) = update.marketing_opt_in {
        input.state.prefs.marketing_opt_in = opt_in;
    }

    Ok(BotAction::text("Done — your preferences are updated."))
}
