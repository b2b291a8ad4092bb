use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use duka_cache::{SlidingWindow, TtlCache};
use duka_core::types::MessageKind;
use duka_sessions::types::Customer;
use duka_tenancy::types::{GatewayCredentials, Tenant};

use crate::consent;
use crate::error::DeliveryError;
use crate::format::WaPayload;
use crate::limits::{DailyLimit, LimitDecision};
use crate::quiet;

/// Outbound dedup entries must outlive any gateway retry storm.
const DEDUP_TTL: Duration = Duration::from_secs(6 * 3600);
/// Retry schedule for transient gateway failures.
const RETRY_BACKOFF_MS: [u64; 3] = [500, 2_000, 5_000];

/// One accepted send.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    /// False when the idempotency key short-circuited a duplicate.
    pub sent: bool,
}

#[derive(Debug)]
pub enum GatewayError {
    Transient(String),
    Permanent(String),
}

/// Seam for the messaging gateway HTTP binding.
#[async_trait]
pub trait WaGateway: Send + Sync {
    async fn send(
        &self,
        creds: &GatewayCredentials,
        to_phone: &str,
        payload: &WaPayload,
    ) -> Result<String, GatewayError>;
}

/// Applies the gates and delivers payloads in order, with retries and
/// duplicate suppression.
pub struct Deliverer {
    gateway: Arc<dyn WaGateway>,
    dedup: TtlCache<String>,
    window: SlidingWindow,
    default_daily_limit: u32,
    default_quiet: (u8, u8),
}

impl Deliverer {
    pub fn new(
        gateway: Arc<dyn WaGateway>,
        default_daily_limit: u32,
        default_quiet: (u8, u8),
    ) -> Self {
        Self {
            gateway,
            dedup: TtlCache::new(),
            window: SlidingWindow::new(Duration::from_secs(24 * 3600)),
            default_daily_limit,
            default_quiet,
        }
    }

    /// Deliver the payloads of one turn, in order.
    ///
    /// Gates run in a fixed order: consent (hard error), quiet hours
    /// (defer), daily ceiling (defer). Each payload carries an idempotency
    /// key `(conversation, turn, payload_hash)` — a replayed turn sends
    /// nothing twice.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_turn(
        &self,
        tenant: &Tenant,
        creds: &GatewayCredentials,
        customer: &Customer,
        conversation_id: &str,
        turn_number: u32,
        kind: MessageKind,
        payloads: &[WaPayload],
    ) -> Result<Vec<DeliveryReceipt>, DeliveryError> {
        consent::check(customer, kind)?;

        let offset = customer
            .utc_offset_minutes
            .unwrap_or(tenant.utc_offset_minutes);
        let (quiet_start, quiet_end) = (
            tenant.quiet_start_hour.unwrap_or(self.default_quiet.0),
            tenant.quiet_end_hour.unwrap_or(self.default_quiet.1),
        );
        if let Some(until) = quiet::defer_until(Utc::now(), kind, offset, quiet_start, quiet_end) {
            info!(tenant_id = %tenant.id, %until, "send deferred by quiet hours");
            return Err(DeliveryError::Deferred { until });
        }

        let limit = tenant.daily_message_limit.unwrap_or(self.default_daily_limit);
        let gate = DailyLimit::new(&self.window);

        let mut receipts = Vec::with_capacity(payloads.len());
        for (i, payload) in payloads.iter().enumerate() {
            if let LimitDecision::Deferred { until } = gate.check_and_record(&tenant.id, limit) {
                return Err(DeliveryError::Deferred { until });
            }

            let key = idempotency_key(conversation_id, turn_number, payload);
            if !self.dedup.put_if_absent(&key, String::new(), DEDUP_TTL) {
                info!(conversation_id, turn_number, index = i, "duplicate send suppressed");
                receipts.push(DeliveryReceipt {
                    provider_message_id: String::new(),
                    sent: false,
                });
                continue;
            }

            let id = self
                .send_with_retry(creds, &customer.phone_e164, payload)
                .await?;
            receipts.push(DeliveryReceipt {
                provider_message_id: id,
                sent: true,
            });
        }
        Ok(receipts)
    }

    async fn send_with_retry(
        &self,
        creds: &GatewayCredentials,
        to_phone: &str,
        payload: &WaPayload,
    ) -> Result<String, DeliveryError> {
        let mut attempt = 0usize;
        loop {
            match self.gateway.send(creds, to_phone, payload).await {
                Ok(id) => return Ok(id),
                Err(GatewayError::Permanent(reason)) => {
                    warn!(reason, "gateway permanent failure");
                    return Err(DeliveryError::Failed { reason });
                }
                Err(GatewayError::Transient(reason)) => {
                    if attempt >= RETRY_BACKOFF_MS.len() {
                        warn!(reason, "gateway retries exhausted");
                        return Err(DeliveryError::Failed { reason });
                    }
                    let jitter = rand::thread_rng().gen_range(0..250);
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS[attempt] + jitter,
                    ))
                    .await;
                    attempt += 1;
                }
            }
        }
    }
}

/// `(conversation, turn, payload_hash)` — stable across process restarts.
fn idempotency_key(conversation_id: &str, turn_number: u32, payload: &WaPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(payload).unwrap_or_default());
    format!(
        "out:{}:{}:{}",
        conversation_id,
        turn_number,
        hex::encode(&hasher.finalize()[..16])
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct RecordingGateway {
        sent: Mutex<Vec<String>>,
        transient_failures: AtomicU32,
    }

    impl RecordingGateway {
        fn new(transient_failures: u32) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                transient_failures: AtomicU32::new(transient_failures),
            }
        }
    }

    #[async_trait]
    impl WaGateway for RecordingGateway {
        async fn send(
            &self,
            _creds: &GatewayCredentials,
            to_phone: &str,
            _payload: &WaPayload,
        ) -> Result<String, GatewayError> {
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                return Err(GatewayError::Transient("503".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(to_phone.to_string());
            Ok(format!("SM{:04}", sent.len()))
        }
    }

    fn tenant() -> Tenant {
        Tenant {
            id: "t1".into(),
            name: "Acme".into(),
            slug: "acme".into(),
            status: duka_core::types::TenantStatus::Active,
            sender_number_enc: None,
            account_sid_enc: None,
            auth_token_enc: None,
            webhook_secret_enc: None,
            timezone: "Africa/Nairobi".into(),
            utc_offset_minutes: 0,
            quiet_start_hour: Some(0),
            quiet_end_hour: Some(0),
            tier: "starter".into(),
            subscription_waived: false,
            persona: duka_tenancy::types::TenantPersona {
                bot_name: "Makena".into(),
                bot_intro: String::new(),
                tone_style: "friendly".into(),
                default_language: "en".into(),
                allowed_languages: vec!["en".into()],
                max_chattiness_level: 2,
                catalog_link_base: None,
                payments_enabled: true,
                handoff_policy: "business_hours".into(),
            },
            daily_message_limit: Some(100),
            kb_score_threshold: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn creds() -> GatewayCredentials {
        GatewayCredentials {
            sender_number: "+254700000100".into(),
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            webhook_secret: "sec".into(),
        }
    }

    fn customer() -> Customer {
        Customer {
            id: "c1".into(),
            tenant_id: "t1".into(),
            phone_e164: "+254711000001".into(),
            display_name: None,
            timezone: None,
            utc_offset_minutes: None,
            language_pref: None,
            tags: Vec::new(),
            last_seen_at: None,
            global_party_id: None,
            consent_transactional: true,
            consent_reminder: true,
            consent_promotional: false,
            marketing_opt_in: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[tokio::test]
    async fn replayed_turn_sends_nothing_twice() {
        let gateway = Arc::new(RecordingGateway::new(0));
        let deliverer = Deliverer::new(Arc::clone(&gateway) as Arc<dyn WaGateway>, 100, (21, 8));
        let payloads = vec![WaPayload::Text {
            body: "hello".into(),
        }];

        let first = deliverer
            .send_turn(&tenant(), &creds(), &customer(), "conv1", 1, MessageKind::BotResponse, &payloads)
            .await
            .unwrap();
        assert!(first[0].sent);

        let replay = deliverer
            .send_turn(&tenant(), &creds(), &customer(), "conv1", 1, MessageKind::BotResponse, &payloads)
            .await
            .unwrap();
        assert!(!replay[0].sent);
        assert_eq!(gateway.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn next_turn_is_a_fresh_key() {
        let gateway = Arc::new(RecordingGateway::new(0));
        let deliverer = Deliverer::new(Arc::clone(&gateway) as Arc<dyn WaGateway>, 100, (21, 8));
        let payloads = vec![WaPayload::Text {
            body: "hello".into(),
        }];
        for turn in 1..=2 {
            deliverer
                .send_turn(&tenant(), &creds(), &customer(), "conv1", turn, MessageKind::BotResponse, &payloads)
                .await
                .unwrap();
        }
        assert_eq!(gateway.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let gateway = Arc::new(RecordingGateway::new(2));
        let deliverer = Deliverer::new(Arc::clone(&gateway) as Arc<dyn WaGateway>, 100, (21, 8));
        let receipts = deliverer
            .send_turn(
                &tenant(),
                &creds(),
                &customer(),
                "conv1",
                1,
                MessageKind::BotResponse,
                &[WaPayload::Text { body: "hi".into() }],
            )
            .await
            .unwrap();
        assert!(receipts[0].sent);
        assert_eq!(gateway.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn promotional_without_consent_is_a_hard_error() {
        let gateway = Arc::new(RecordingGateway::new(0));
        let deliverer = Deliverer::new(gateway as Arc<dyn WaGateway>, 100, (21, 8));
        let err = deliverer
            .send_turn(
                &tenant(),
                &creds(),
                &customer(),
                "conv1",
                1,
                MessageKind::ScheduledPromotional,
                &[WaPayload::Text { body: "sale!".into() }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::ConsentDenied { .. }));
    }

    #[tokio::test]
    async fn ceiling_defers_excess_sends() {
        let gateway = Arc::new(RecordingGateway::new(0));
        let deliverer = Deliverer::new(gateway as Arc<dyn WaGateway>, 100, (21, 8));
        let mut t = tenant();
        t.daily_message_limit = Some(2);
        let payload = |s: &str| {
            vec![WaPayload::Text { body: s.into() }]
        };
        deliverer
            .send_turn(&t, &creds(), &customer(), "conv1", 1, MessageKind::BotResponse, &payload("a"))
            .await
            .unwrap();
        deliverer
            .send_turn(&t, &creds(), &customer(), "conv1", 2, MessageKind::BotResponse, &payload("b"))
            .await
            .unwrap();
        let err = deliverer
            .send_turn(&t, &creds(), &customer(), "conv1", 3, MessageKind::BotResponse, &payload("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Deferred { .. }));
    }
}
