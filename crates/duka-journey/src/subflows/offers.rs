use duka_core::types::Intent;

use crate::action::{BotAction, ListItem};

use super::{kes, slot_str, SubflowError, SubflowInput};

/// Present applicable offers or apply a coupon. Offers come from the offers
/// table only — if there are none, the bot says so.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    if input.intent.intent == Intent::ApplyCoupon {
        return apply(input).await;
    }

    let offers = input.tools.offers_get_applicable(&input.ctx)?;
    if offers.is_empty() {
        return Ok(BotAction::text(
            "No offers are running right now — check back soon!",
        ));
    }

    Ok(BotAction::List {
        header: "Current offers:".to_string(),
        items: offers
            .into_iter()
            .take(6)
            .map(|o| ListItem {
                id: o.code.clone(),
                title: o.code.clone(),
                description: if let Some(pct) = o.percent_off {
                    format!("{}% off — {}", pct, o.description)
                } else if let Some(amount) = o.amount_off_cents {
                    format!("{} off — {}", kes(amount), o.description)
                } else {
                    o.description.clone()
                },
            })
            .collect(),
    })
}

async fn apply(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    let Some(code) = slot_str(input, "coupon_code").map(str::to_string) else {
        return Ok(BotAction::text("Which coupon code would you like to use?"));
    };
    let Some(order_id) = input.state.order_id.clone() else {
        return Ok(BotAction::text(
            "Let's pick what you'd like to buy first, then I'll apply the coupon.",
        ));
    };

    match input.tools.order_apply_coupon(&input.ctx, &order_id, &code) {
        Ok(order) => {
            input.state.order_total_cents = Some(order.total_cents);
            Ok(BotAction::text(format!(
                "Coupon {} applied — you save {}. New total: {}.",
                code,
                kes(order.discount_cents),
                kes(order.total_cents)
            )))
        }
        Err(duka_tools::ToolError::NotFound(_)) => Ok(BotAction::text(format!(
            "Hmm, {} doesn't seem to be a valid code. Want me to list the current offers?",
            code
        ))),
        Err(e) => Err(e.into()),
    }
}
