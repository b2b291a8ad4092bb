// Edge-level scenarios: signed intake, replay dedup, signature rejection,
// tenant resolution, and the subscription gate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use sha2::Sha256;
use tower::ServiceExt;

use duka_cache::LockRegistry;
use duka_core::config::{
    BillingConfig, DatabaseConfig, DukaConfig, HttpConfig, LlmConfig, MessagingConfig,
    PipelineConfig, SecurityConfig,
};
use duka_core::types::TenantStatus;
use duka_gateway::app::{build_router, AppState};
use duka_outbound::delivery::{GatewayError, WaGateway};
use duka_outbound::{Deliverer, WaPayload};
use duka_sessions::StateStore;
use duka_tenancy::crypto::SecretBox;
use duka_tenancy::tenants::NewTenant;
use duka_tenancy::types::GatewayCredentials;
use duka_tenancy::{ScopeResolver, TenantStore};
use duka_tools::payments::{PaymentRail, RailRequest, RailResponse};
use duka_tools::{KnowledgeStore, ToolResult, Tools};
use duka_worker::{Queue, WorkerEngine};

struct RecordingGateway {
    sent: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl WaGateway for RecordingGateway {
    async fn send(
        &self,
        _creds: &GatewayCredentials,
        _to_phone: &str,
        payload: &WaPayload,
    ) -> Result<String, GatewayError> {
        let body = match payload {
            WaPayload::Text { body } => body.clone(),
            other => format!("{:?}", other),
        };
        let mut sent = self.sent.lock().unwrap();
        sent.push(body);
        Ok(format!("SM{:04}", sent.len()))
    }
}

struct NoopRail;

#[async_trait::async_trait]
impl PaymentRail for NoopRail {
    async fn initiate_stk_push(&self, _req: &RailRequest) -> ToolResult<RailResponse> {
        unreachable!()
    }
    async fn c2b_instructions(&self, _req: &RailRequest) -> ToolResult<RailResponse> {
        unreachable!()
    }
    async fn create_checkout(&self, _req: &RailRequest) -> ToolResult<RailResponse> {
        unreachable!()
    }
}

fn test_config() -> DukaConfig {
    DukaConfig {
        database: DatabaseConfig::default(),
        http: HttpConfig::default(),
        security: SecurityConfig {
            encryption_key: "a3f1".repeat(16),
            session_signing_key: "kR9!mZ2@pQ7#wX4$vB6%nC8^dF1&gH3*".to_string(),
        },
        llm: LlmConfig {
            api_key: "sk-test".into(),
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            timeout_secs: 20,
        },
        messaging: MessagingConfig::default(),
        pipeline: PipelineConfig::default(),
        billing: BillingConfig::default(),
    }
}

struct Harness {
    state: Arc<AppState>,
    gateway: Arc<RecordingGateway>,
    tenant_id: String,
}

fn harness() -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    duka_tenancy::db::init_db(&conn).unwrap();
    duka_sessions::db::init_db(&conn).unwrap();
    duka_commerce::db::init_db(&conn).unwrap();
    duka_tools::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let config = test_config();
    let crypto = Arc::new(SecretBox::new(&config.security.encryption_key_bytes().unwrap()).unwrap());
    let tenants = Arc::new(TenantStore::new(Arc::clone(&db), Arc::clone(&crypto)));
    let tenant = tenants
        .create(NewTenant {
            name: "Acme".into(),
            slug: "acme".into(),
            sender_number: "+254700000100".into(),
            account_sid: "AC1".into(),
            auth_token: "tok".into(),
            webhook_secret: "whsec-acme".into(),
            timezone: "Africa/Nairobi".into(),
            utc_offset_minutes: 180,
        })
        .unwrap();

    let resolver = Arc::new(ScopeResolver::new(Arc::clone(&db)));
    let store = Arc::new(StateStore::new(
        Arc::clone(&db),
        Arc::new(LockRegistry::new()),
        Duration::from_secs(1800),
        Duration::from_secs(5),
    ));
    let kb = Arc::new(KnowledgeStore::new(Arc::clone(&db)));
    let tools = Arc::new(Tools::new(
        Arc::clone(&db),
        Arc::clone(&tenants),
        kb,
        Arc::new(NoopRail),
        Arc::clone(&crypto),
    ));
    let gateway = Arc::new(RecordingGateway {
        sent: Mutex::new(Vec::new()),
    });
    let deliverer = Arc::new(Deliverer::new(
        Arc::clone(&gateway) as Arc<dyn WaGateway>,
        1000,
        (21, 8),
    ));
    let engine = WorkerEngine::new(Arc::clone(&db), Queue::ALL.to_vec()).unwrap();
    let queue = engine.handle();

    let state = Arc::new(AppState {
        config,
        db,
        crypto,
        tenants,
        resolver,
        store,
        tools,
        deliverer,
        queue,
        dedup: duka_cache::TtlCache::new(),
        subgate: duka_cache::TtlCache::new(),
        started_at: chrono::Utc::now(),
    });
    Harness {
        state,
        gateway,
        tenant_id: tenant.id,
    }
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn webhook_request(body: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhooks/twilio")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-webhook-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

const INBOUND: &str = "MessageSid=SM0001&From=whatsapp%3A%2B254711000001\
&To=whatsapp%3A%2B254700000100&Body=Niaje%2C+una+laptop+ngapi%3F";

#[tokio::test]
async fn signed_webhook_persists_one_message_and_enqueues_one_turn() {
    let h = harness();
    let router = build_router(Arc::clone(&h.state));
    let sig = sign("whsec-acme", INBOUND);

    let resp = router.oneshot(webhook_request(INBOUND, &sig)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let conn = h.state.db.lock().unwrap();
    let messages: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        .unwrap();
    assert_eq!(messages, 1);

    let conv_status: String = conn
        .query_row("SELECT status FROM conversations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(conv_status, "bot");

    let jobs: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM jobs WHERE kind = 'process_inbound_message'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(jobs, 1);

    let log_status: String = conn
        .query_row(
            "SELECT status FROM webhook_log WHERE tenant_id = ?1",
            rusqlite::params![h.tenant_id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(log_status, "success");
}

#[tokio::test]
async fn replayed_webhook_is_deduplicated() {
    let h = harness();
    let sig = sign("whsec-acme", INBOUND);

    for _ in 0..2 {
        let router = build_router(Arc::clone(&h.state));
        let resp = router.oneshot(webhook_request(INBOUND, &sig)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let conn = h.state.db.lock().unwrap();
    let messages: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        .unwrap();
    assert_eq!(messages, 1);
    let jobs: i64 = conn
        .query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))
        .unwrap();
    assert_eq!(jobs, 1);
    let dupes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM webhook_log WHERE status = 'duplicate'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(dupes, 1);
}

#[tokio::test]
async fn bad_signature_is_rejected_with_no_state_change() {
    let h = harness();
    let router = build_router(Arc::clone(&h.state));

    let resp = router
        .oneshot(webhook_request(INBOUND, &sign("wrong-secret", INBOUND)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let conn = h.state.db.lock().unwrap();
    let messages: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        .unwrap();
    assert_eq!(messages, 0);
    let conversations: i64 = conn
        .query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))
        .unwrap();
    assert_eq!(conversations, 0);
    let unauthorized: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM webhook_log WHERE status = 'unauthorized'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(unauthorized, 1);
}

#[tokio::test]
async fn unresolvable_recipient_is_404() {
    let h = harness();
    let router = build_router(Arc::clone(&h.state));
    let body = INBOUND.replace("254700000100", "254700999999");
    let resp = router
        .oneshot(webhook_request(&body, &sign("whsec-acme", &body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inactive_subscription_replies_once_and_skips_the_pipeline() {
    let h = harness();
    h.state
        .tenants
        .set_status(&h.tenant_id, TenantStatus::Suspended)
        .unwrap();
    let sig = sign("whsec-acme", INBOUND);

    // Suspended tenants no longer resolve by number; the slug route is the
    // fallback selector.
    let request = |body: &str, sig: &str| {
        Request::builder()
            .method("POST")
            .uri("/webhooks/twilio/acme")
            .header("content-type", "application/x-www-form-urlencoded")
            .header("x-webhook-signature", sig.to_string())
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let resp = build_router(Arc::clone(&h.state))
        .oneshot(request(INBOUND, &sig))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // One "temporarily unavailable" auto-reply, no pipeline job.
    assert_eq!(h.gateway.sent.lock().unwrap().len(), 1);
    {
        let conn = h.state.db.lock().unwrap();
        let jobs: i64 = conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(jobs, 0);
        let gated: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM webhook_log WHERE status = 'subscription_inactive'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(gated, 1);
    }

    // A second message within the suppression window sends nothing more.
    let body2 = INBOUND.replace("SM0001", "SM0002");
    let resp = build_router(Arc::clone(&h.state))
        .oneshot(request(&body2, &sign("whsec-acme", &body2)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.gateway.sent.lock().unwrap().len(), 1);
}
