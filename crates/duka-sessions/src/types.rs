use serde::{Deserialize, Serialize};

use duka_core::types::{ConsentCategory, ConversationStatus, MessageDirection, MessageKind};

/// A party as known to one tenant. The same phone number under another
/// tenant is a different Customer entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub phone_e164: String,
    pub display_name: Option<String>,
    pub timezone: Option<String>,
    pub utc_offset_minutes: Option<i32>,
    pub language_pref: Option<String>,
    pub tags: Vec<String>,
    pub last_seen_at: Option<String>,
    pub global_party_id: Option<String>,
    pub consent_transactional: bool,
    pub consent_reminder: bool,
    pub consent_promotional: bool,
    pub marketing_opt_in: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Customer {
    pub fn has_consent(&self, category: ConsentCategory) -> bool {
        match category {
            ConsentCategory::Transactional => self.consent_transactional,
            ConsentCategory::Reminder => self.consent_reminder,
            ConsentCategory::Promotional => self.consent_promotional,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub status: ConversationStatus,
    pub channel: String,
    pub last_intent: Option<String>,
    pub operator_id: Option<String>,
    pub metadata: serde_json::Value,
    pub turn_count: u32,
    pub low_confidence_count: u32,
    pub clarify_count: u32,
    pub tool_error_streak: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable record of one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub direction: MessageDirection,
    pub kind: MessageKind,
    pub body: String,
    pub payload: Option<serde_json::Value>,
    pub provider_message_id: Option<String>,
    pub delivery_status: Option<String>,
    pub template_ref: Option<String>,
    pub created_at: String,
}

/// Input for appending a message to a conversation.
pub struct NewMessage<'a> {
    pub tenant_id: &'a str,
    pub conversation_id: &'a str,
    pub direction: MessageDirection,
    pub kind: MessageKind,
    pub body: &'a str,
    pub payload: Option<&'a serde_json::Value>,
    pub provider_message_id: Option<&'a str>,
    pub template_ref: Option<&'a str>,
}

/// One extracted key fact. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFact {
    pub fact: String,
    pub confidence: f64,
    pub source_message_id: Option<String>,
    pub extracted_at: String,
}

/// Customer preference updates applied by the prefs subflow.
#[derive(Debug, Clone, Default)]
pub struct PreferenceUpdate {
    pub language_pref: Option<String>,
    pub display_name: Option<String>,
    pub marketing_opt_in: Option<bool>,
    pub consent_reminder: Option<bool>,
    pub consent_promotional: Option<bool>,
}
