use serde::{Deserialize, Serialize};

/// What the bot wants to say. The outbound formatter pattern-matches these
/// into WhatsApp payloads; nothing here knows about the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BotAction {
    Text {
        body: String,
    },
    List {
        header: String,
        items: Vec<ListItem>,
    },
    Buttons {
        body: String,
        buttons: Vec<String>,
    },
    ProductCards {
        intro: String,
        cards: Vec<ProductCard>,
    },
    /// Acknowledge the handoff with an expected response timeline.
    Handoff {
        body: String,
        ticket_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCard {
    pub item_id: String,
    pub name: String,
    pub price_text: String,
    pub description: String,
    pub image_url: Option<String>,
}

impl BotAction {
    pub fn text(body: impl Into<String>) -> Self {
        BotAction::Text { body: body.into() }
    }

    /// Number of enumerated items this action would render.
    pub fn item_count(&self) -> usize {
        match self {
            BotAction::List { items, .. } => items.len(),
            BotAction::ProductCards { cards, .. } => cards.len(),
            BotAction::Buttons { buttons, .. } => buttons.len(),
            _ => 0,
        }
    }
}
