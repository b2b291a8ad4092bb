use duka_commerce::catalog::{SearchFilters, MAX_SHORTLIST};
use duka_commerce::types::OrderItem;
use duka_core::types::Intent;

use crate::action::{BotAction, ProductCard};

use super::{kes, slot_str, SubflowError, SubflowInput};

/// Result sets at or above this route to the full catalog link instead of a
/// shortlist that cannot do them justice.
const DEEP_LINK_TOTAL: u64 = 50;
/// Shortlist rejections before giving up on shortlists for this conversation.
const MAX_SHORTLIST_REJECTIONS: u32 = 2;

/// Product discovery and draft-order creation.
pub async fn run(input: &mut SubflowInput<'_>) -> Result<BotAction, SubflowError> {
    // Selecting a previously shown item takes priority over a new search.
    if input.intent.intent == Intent::PlaceOrder {
        if let Some(item_id) = selected_item(input) {
            return place_draft_order(input, &item_id).await;
        }
    }

    let query = slot_str(input, "query")
        .map(str::to_string)
        .unwrap_or_else(|| input.message.to_string());
    let filters = SearchFilters::from_slots(&input.intent.slots);

    let result = input.tools.catalog_search(&input.ctx, &query, &filters)?;

    if result.total_estimate == 0 {
        input.state.catalog.last_query = Some(query);
        input.state.catalog.last_results.clear();
        input.state.catalog.total_estimate = 0;
        return Ok(BotAction::text(
            "I couldn't find anything matching that. Could you describe what you're \
             looking for differently, or tell me a price range?",
        ));
    }

    if should_deep_link(input, result.total_estimate) {
        if let Some(link) = catalog_link(input, &query) {
            return Ok(BotAction::text(format!(
                "We have quite a range for that — browse everything here: {}",
                link
            )));
        }
    }

    // Shortlist path. The search itself caps at six; assert the invariant
    // here so a future query change cannot widen a WhatsApp reply.
    let items: Vec<_> = result.items.into_iter().take(MAX_SHORTLIST).collect();
    input.state.catalog.last_query = Some(query);
    input.state.catalog.last_filters = input
        .intent
        .slots
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();
    input.state.catalog.last_results = items.iter().map(|p| p.id.clone()).collect();
    input.state.catalog.total_estimate = result.total_estimate;

    let cards = items
        .iter()
        .map(|p| ProductCard {
            item_id: p.id.clone(),
            name: p.name.clone(),
            price_text: kes(p.price_cents),
            description: p.description.chars().take(120).collect(),
            image_url: p.image_url.clone(),
        })
        .collect();

    let intro = if result.total_estimate > items.len() as u64 {
        format!(
            "Here are {} of {} matches — reply with the one you like:",
            items.len(),
            result.total_estimate
        )
    } else {
        "Here's what we have:".to_string()
    };

    Ok(BotAction::ProductCards { intro, cards })
}

/// The customer picked something: fetch it and open a draft order.
async fn place_draft_order(
    input: &mut SubflowInput<'_>,
    item_id: &str,
) -> Result<BotAction, SubflowError> {
    let product = input.tools.catalog_get_item(&input.ctx, item_id)?;
    let quantity = super::slot_i64(input, "quantity").unwrap_or(1).max(1) as u32;

    let order = input.tools.order_create(
        &input.ctx,
        &input.customer.id,
        &[OrderItem {
            item_id: product.id.clone(),
            name: product.name.clone(),
            quantity,
            unit_price_cents: product.price_cents,
        }],
    )?;

    input.state.catalog.selected_item_ids = vec![product.id.clone()];
    input.state.order_id = Some(order.id.clone());
    input.state.order_total_cents = Some(order.total_cents);

    Ok(BotAction::Buttons {
        body: format!(
            "{} × {} — {} total. Shall I proceed to payment?",
            quantity,
            product.name,
            kes(order.total_cents)
        ),
        buttons: vec!["Pay now".to_string(), "Keep browsing".to_string()],
    })
}

fn selected_item(input: &SubflowInput<'_>) -> Option<String> {
    if let Some(id) = slot_str(input, "item_id") {
        // Only accept ids we actually showed; the classifier cannot conjure
        // an arbitrary row id into an order.
        if input.state.catalog.last_results.iter().any(|r| r == id) {
            return Some(id.to_string());
        }
    }
    // A bare ordinal ("the second one") resolved against the last shortlist.
    if let Some(ordinal) = super::slot_i64(input, "ordinal") {
        let idx = (ordinal - 1).max(0) as usize;
        return input.state.catalog.last_results.get(idx).cloned();
    }
    None
}

/// Deep-link policy: huge result set with the customer still vague after a
/// clarifying question, an explicit "everything" ask, or repeated shortlist
/// rejections.
fn should_deep_link(input: &SubflowInput<'_>, total: u64) -> bool {
    let asked_for_all = super::slot_bool(input, "all_items").unwrap_or(false)
        || input.message.to_lowercase().contains("all items")
        || input.message.to_lowercase().contains("everything");
    if asked_for_all {
        return true;
    }
    if input.state.catalog.shortlist_rejections >= MAX_SHORTLIST_REJECTIONS {
        return true;
    }
    total >= DEEP_LINK_TOTAL && input.state.signals.intent == Some(Intent::BrowseCatalog)
        && input.state.catalog.last_query.is_some()
}

fn catalog_link(input: &SubflowInput<'_>, query: &str) -> Option<String> {
    input.state.persona.catalog_link_base.as_ref().map(|base| {
        let encoded: String = query
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_string()
                } else {
                    "+".to_string()
                }
            })
            .collect();
        format!("{}?tenant={}&q={}", base, input.state.tenant_id, encoded)
    })
}
