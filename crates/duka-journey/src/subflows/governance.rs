use duka_core::types::Intent;

use crate::action::BotAction;

use super::{SubflowError, SubflowInput};

/// Greetings, smalltalk redirection, and the unknown handler.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    match input.intent.intent {
        Intent::Greeting => {
            let persona = &input.state.persona;
            let intro = if persona.bot_intro.is_empty() {
                format!(
                    "Hi! I'm {} — I can help you browse, order, book, or answer questions.",
                    persona.bot_name
                )
            } else {
                persona.bot_intro.clone()
            };
            Ok(BotAction::text(intro))
        }
        Intent::RequestHuman => Err(SubflowError::Escalate {
            reason: "customer asked for a human".to_string(),
        }),
        // The unknown handler: one canned clarification with the things the
        // bot can actually do.
        _ => Ok(BotAction::Buttons {
            body: "Sorry, I didn't quite catch that. What would you like to do?".to_string(),
            buttons: vec![
                "Browse products".to_string(),
                "Check my order".to_string(),
                "Talk to support".to_string(),
            ],
        }),
    }
}
