use duka_tools::tools::OrderLookup;

use crate::action::{BotAction, ListItem};

use super::{kes, slot_str, SubflowError, SubflowInput};

/// Order status lookup with disambiguation.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    let order_id = slot_str(input, "order_id").map(str::to_string);

    let lookup =
        input
            .tools
            .order_get_status(&input.ctx, order_id.as_deref(), &input.customer.id)?;

    Ok(match lookup {
        OrderLookup::One(order) => {
            input.state.order_id = Some(order.id.clone());
            BotAction::text(format!(
                "Order {} is {} — total {}.",
                short_id(&order.id),
                status_text(&order.status.to_string()),
                kes(order.total_cents)
            ))
        }
        OrderLookup::Many(orders) => BotAction::List {
            header: "You have a few recent orders — which one do you mean?".to_string(),
            items: orders
                .into_iter()
                .map(|o| ListItem {
                    id: o.id.clone(),
                    title: format!("Order {}", short_id(&o.id)),
                    description: format!(
                        "{} · {} · {}",
                        status_text(&o.status.to_string()),
                        kes(o.total_cents),
                        o.created_at.chars().take(10).collect::<String>()
                    ),
                })
                .collect(),
        },
        OrderLookup::None => BotAction::text(
            "I couldn't find an order under this number. If you ordered with a \
             different phone number, share the order reference and I'll check.",
        ),
    })
}

fn status_text(status: &str) -> &str {
    match status {
        "draft" => "being prepared",
        "pending_payment" => "awaiting payment",
        "paid" => "paid and being processed",
        "fulfilled" => "delivered",
        "canceled" => "canceled",
        other => other,
    }
}

/// Customer-facing order reference: the tail of the id, uppercased.
fn short_id(id: &str) -> String {
    id.chars()
        .rev()
        .take(6)
        .collect::<String>()
        .chars()
        .rev()
        .collect::<String>()
        .to_uppercase()
}
