use serde::{Deserialize, Serialize};
use tracing::warn;

use duka_journey::action::{BotAction, ListItem, ProductCard};

/// WhatsApp hard caps.
const MAX_ITEMS: usize = 6;
const MAX_BUTTONS: usize = 3;
const MAX_TEXT_LEN: usize = 4096;

/// Channel-level payloads, one HTTP send each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaPayload {
    Text {
        body: String,
    },
    InteractiveList {
        header: String,
        rows: Vec<ListRow>,
    },
    InteractiveButtons {
        body: String,
        buttons: Vec<String>,
    },
    ProductCard {
        title: String,
        body: String,
        image_url: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Lower a [`BotAction`] into channel payloads, enforcing the six-item cap
/// and WhatsApp's button and length constraints. Oversized text splits into
/// consecutive messages rather than truncating.
pub fn to_payloads(action: &BotAction) -> Vec<WaPayload> {
    match action {
        BotAction::Text { body } => chunk_text(body),
        BotAction::Handoff { body, .. } => chunk_text(body),
        BotAction::List { header, items } => {
            if items.len() > MAX_ITEMS {
                warn!(count = items.len(), "list over WhatsApp cap; truncating to six");
            }
            vec![WaPayload::InteractiveList {
                header: header.clone(),
                rows: items
                    .iter()
                    .take(MAX_ITEMS)
                    .map(|ListItem { id, title, description }| ListRow {
                        id: id.clone(),
                        title: title.clone(),
                        description: description.clone(),
                    })
                    .collect(),
            }]
        }
        BotAction::Buttons { body, buttons } => {
            if buttons.len() > MAX_BUTTONS {
                warn!(count = buttons.len(), "buttons over WhatsApp cap; truncating to three");
            }
            vec![WaPayload::InteractiveButtons {
                body: body.clone(),
                buttons: buttons.iter().take(MAX_BUTTONS).cloned().collect(),
            }]
        }
        BotAction::ProductCards { intro, cards } => {
            if cards.len() > MAX_ITEMS {
                warn!(count = cards.len(), "cards over WhatsApp cap; truncating to six");
            }
            let mut payloads = chunk_text(intro);
            payloads.extend(cards.iter().take(MAX_ITEMS).map(
                |ProductCard {
                     name,
                     price_text,
                     description,
                     image_url,
                     ..
                 }| WaPayload::ProductCard {
                    title: name.clone(),
                    body: format!("{} — {}", price_text, description),
                    image_url: image_url.clone(),
                },
            ));
            payloads
        }
    }
}

fn chunk_text(body: &str) -> Vec<WaPayload> {
    if body.chars().count() <= MAX_TEXT_LEN {
        return vec![WaPayload::Text {
            body: body.to_string(),
        }];
    }
    let chars: Vec<char> = body.chars().collect();
    chars
        .chunks(MAX_TEXT_LEN)
        .map(|c| WaPayload::Text {
            body: c.iter().collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(i: usize) -> ProductCard {
        ProductCard {
            item_id: format!("p{}", i),
            name: format!("Item {}", i),
            price_text: "KES 100".into(),
            description: "desc".into(),
            image_url: None,
        }
    }

    #[test]
    fn product_cards_never_exceed_six() {
        let action = BotAction::ProductCards {
            intro: "Here you go:".into(),
            cards: (0..9).map(card).collect(),
        };
        let payloads = to_payloads(&action);
        let cards = payloads
            .iter()
            .filter(|p| matches!(p, WaPayload::ProductCard { .. }))
            .count();
        assert_eq!(cards, 6);
    }

    #[test]
    fn buttons_capped_at_three() {
        let action = BotAction::Buttons {
            body: "Pick one".into(),
            buttons: (0..5).map(|i| format!("b{}", i)).collect(),
        };
        match to_payloads(&action).pop().unwrap() {
            WaPayload::InteractiveButtons { buttons, .. } => assert_eq!(buttons.len(), 3),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn long_text_splits_instead_of_truncating() {
        let body = "a".repeat(5000);
        let payloads = to_payloads(&BotAction::text(body));
        assert_eq!(payloads.len(), 2);
        let total: usize = payloads
            .iter()
            .map(|p| match p {
                WaPayload::Text { body } => body.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(total, 5000);
    }

    #[test]
    fn list_truncates_to_six_rows() {
        let action = BotAction::List {
            header: "h".into(),
            items: (0..8)
                .map(|i| ListItem {
                    id: format!("{}", i),
                    title: format!("t{}", i),
                    description: String::new(),
                })
                .collect(),
        };
        match to_payloads(&action).pop().unwrap() {
            WaPayload::InteractiveList { rows, .. } => assert_eq!(rows.len(), 6),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
