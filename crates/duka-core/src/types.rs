use serde::{Deserialize, Serialize};

/// Lifecycle of a tenant account. Only `Active` and `Trial` tenants receive
/// automated replies; everything else hits the subscription gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Trial,
    TrialExpired,
    Suspended,
    Canceled,
}

impl TenantStatus {
    pub fn is_serviceable(&self) -> bool {
        matches!(self, TenantStatus::Active | TenantStatus::Trial)
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TenantStatus::Active => "active",
            TenantStatus::Trial => "trial",
            TenantStatus::TrialExpired => "trial_expired",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "trial" => Ok(TenantStatus::Trial),
            "trial_expired" => Ok(TenantStatus::TrialExpired),
            "suspended" => Ok(TenantStatus::Suspended),
            "canceled" => Ok(TenantStatus::Canceled),
            other => Err(format!("unknown tenant status: {}", other)),
        }
    }
}

/// Conversation lifecycle. Exactly one non-`Closed` conversation exists per
/// (tenant, customer); while `Handoff` the pipeline must not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Bot,
    Handoff,
    Closed,
    Dormant,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Bot => "bot",
            ConversationStatus::Handoff => "handoff",
            ConversationStatus::Closed => "closed",
            ConversationStatus::Dormant => "dormant",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConversationStatus::Open),
            "bot" => Ok(ConversationStatus::Bot),
            "handoff" => Ok(ConversationStatus::Handoff),
            "closed" => Ok(ConversationStatus::Closed),
            "dormant" => Ok(ConversationStatus::Dormant),
            other => Err(format!("unknown conversation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    In,
    Out,
}

impl std::fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageDirection::In => write!(f, "in"),
            MessageDirection::Out => write!(f, "out"),
        }
    }
}

/// What produced (or will produce) a message. Drives the consent category of
/// every outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    CustomerInbound,
    BotResponse,
    AutomatedTransactional,
    AutomatedReminder,
    AutomatedReengagement,
    ScheduledPromotional,
    ManualOutbound,
}

impl MessageKind {
    /// The consent category checked before delivering this kind of message.
    pub fn consent_category(&self) -> ConsentCategory {
        match self {
            MessageKind::AutomatedReminder => ConsentCategory::Reminder,
            MessageKind::AutomatedReengagement | MessageKind::ScheduledPromotional => {
                ConsentCategory::Promotional
            }
            // Bot replies to an inbound turn and transactional notices are
            // always deliverable.
            _ => ConsentCategory::Transactional,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::CustomerInbound => "customer_inbound",
            MessageKind::BotResponse => "bot_response",
            MessageKind::AutomatedTransactional => "automated_transactional",
            MessageKind::AutomatedReminder => "automated_reminder",
            MessageKind::AutomatedReengagement => "automated_reengagement",
            MessageKind::ScheduledPromotional => "scheduled_promotional",
            MessageKind::ManualOutbound => "manual_outbound",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "customer_inbound" => Ok(MessageKind::CustomerInbound),
            "bot_response" => Ok(MessageKind::BotResponse),
            "automated_transactional" => Ok(MessageKind::AutomatedTransactional),
            "automated_reminder" => Ok(MessageKind::AutomatedReminder),
            "automated_reengagement" => Ok(MessageKind::AutomatedReengagement),
            "scheduled_promotional" => Ok(MessageKind::ScheduledPromotional),
            "manual_outbound" => Ok(MessageKind::ManualOutbound),
            other => Err(format!("unknown message kind: {}", other)),
        }
    }
}

/// Consent categories per customer. Transactional is non-revocable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
    Transactional,
    Reminder,
    Promotional,
}

/// Intent families the classifier may emit. `Other` routes to the unknown
/// handler per the configured sub-intent list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    BrowseCatalog,
    ProductQuestion,
    PlaceOrder,
    OrderStatus,
    BookService,
    MakePayment,
    AskSupport,
    RequestOffers,
    ApplyCoupon,
    UpdatePreferences,
    StopMessages,
    RequestHuman,
    Greeting,
    Smalltalk,
    Other,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::BrowseCatalog => "BROWSE_CATALOG",
            Intent::ProductQuestion => "PRODUCT_QUESTION",
            Intent::PlaceOrder => "PLACE_ORDER",
            Intent::OrderStatus => "ORDER_STATUS",
            Intent::BookService => "BOOK_SERVICE",
            Intent::MakePayment => "MAKE_PAYMENT",
            Intent::AskSupport => "ASK_SUPPORT",
            Intent::RequestOffers => "REQUEST_OFFERS",
            Intent::ApplyCoupon => "APPLY_COUPON",
            Intent::UpdatePreferences => "UPDATE_PREFERENCES",
            Intent::StopMessages => "STOP_MESSAGES",
            Intent::RequestHuman => "REQUEST_HUMAN",
            Intent::Greeting => "GREETING",
            Intent::Smalltalk => "SMALLTALK",
            Intent::Other => "OTHER",
            Intent::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BROWSE_CATALOG" => Ok(Intent::BrowseCatalog),
            "PRODUCT_QUESTION" => Ok(Intent::ProductQuestion),
            "PLACE_ORDER" => Ok(Intent::PlaceOrder),
            "ORDER_STATUS" => Ok(Intent::OrderStatus),
            "BOOK_SERVICE" => Ok(Intent::BookService),
            "MAKE_PAYMENT" => Ok(Intent::MakePayment),
            "ASK_SUPPORT" => Ok(Intent::AskSupport),
            "REQUEST_OFFERS" => Ok(Intent::RequestOffers),
            "APPLY_COUPON" => Ok(Intent::ApplyCoupon),
            "UPDATE_PREFERENCES" => Ok(Intent::UpdatePreferences),
            "STOP_MESSAGES" => Ok(Intent::StopMessages),
            "REQUEST_HUMAN" => Ok(Intent::RequestHuman),
            "GREETING" => Ok(Intent::Greeting),
            "SMALLTALK" => Ok(Intent::Smalltalk),
            "OTHER" => Ok(Intent::Other),
            "UNKNOWN" => Ok(Intent::Unknown),
            other => Err(format!("unknown intent: {}", other)),
        }
    }
}

/// Journey (subflow) families selectable by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Journey {
    Sales,
    Support,
    Orders,
    Offers,
    Prefs,
    Governance,
    Payments,
    Booking,
}

impl Journey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Journey::Sales => "sales",
            Journey::Support => "support",
            Journey::Orders => "orders",
            Journey::Offers => "offers",
            Journey::Prefs => "prefs",
            Journey::Governance => "governance",
            Journey::Payments => "payments",
            Journey::Booking => "booking",
        }
    }
}

impl std::fmt::Display for Journey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Journey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sales" => Ok(Journey::Sales),
            "support" => Ok(Journey::Support),
            "orders" => Ok(Journey::Orders),
            "offers" => Ok(Journey::Offers),
            "prefs" => Ok(Journey::Prefs),
            "governance" => Ok(Journey::Governance),
            "payments" => Ok(Journey::Payments),
            "booking" => Ok(Journey::Booking),
            other => Err(format!("unknown journey: {}", other)),
        }
    }
}

/// Response language policy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    En,
    Sw,
    Sheng,
    Mixed,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Sw => "sw",
            Language::Sheng => "sheng",
            Language::Mixed => "mixed",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "sw" => Ok(Language::Sw),
            "sheng" => Ok(Language::Sheng),
            "mixed" => Ok(Language::Mixed),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

/// Governor verdict on an inbound turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorClass {
    Business,
    Casual,
    Spam,
    Abuse,
}

/// Terminal status recorded in the webhook log for every gateway delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Success,
    Error,
    Unauthorized,
    SubscriptionInactive,
    Duplicate,
}

impl std::fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Success => "success",
            WebhookStatus::Error => "error",
            WebhookStatus::Unauthorized => "unauthorized",
            WebhookStatus::SubscriptionInactive => "subscription_inactive",
            WebhookStatus::Duplicate => "duplicate",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tenant_status_round_trip() {
        for s in ["active", "trial", "trial_expired", "suspended", "canceled"] {
            let parsed = TenantStatus::from_str(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!(TenantStatus::from_str("zombie").is_err());
    }

    #[test]
    fn only_active_and_trial_are_serviceable() {
        assert!(TenantStatus::Active.is_serviceable());
        assert!(TenantStatus::Trial.is_serviceable());
        assert!(!TenantStatus::TrialExpired.is_serviceable());
        assert!(!TenantStatus::Suspended.is_serviceable());
    }

    #[test]
    fn message_kind_consent_mapping() {
        assert_eq!(
            MessageKind::BotResponse.consent_category(),
            ConsentCategory::Transactional
        );
        assert_eq!(
            MessageKind::AutomatedReminder.consent_category(),
            ConsentCategory::Reminder
        );
        assert_eq!(
            MessageKind::ScheduledPromotional.consent_category(),
            ConsentCategory::Promotional
        );
    }

    #[test]
    fn journey_name_round_trip() {
        for j in [
            Journey::Sales,
            Journey::Support,
            Journey::Orders,
            Journey::Offers,
            Journey::Prefs,
            Journey::Governance,
            Journey::Payments,
            Journey::Booking,
        ] {
            assert_eq!(Journey::from_str(j.as_str()).unwrap(), j);
        }
    }
}
