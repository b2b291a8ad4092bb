use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::watch;
use tracing::info;

use duka_gateway::{app, gateway_client, rails};

use duka_cache::LockRegistry;
use duka_llm::classify::Classifiers;
use duka_llm::ProviderRegistry;
use duka_outbound::Deliverer;
use duka_sessions::StateStore;
use duka_tenancy::crypto::SecretBox;
use duka_tenancy::{ScopeResolver, TenantStore};
use duka_tools::{KnowledgeStore, Tools};
use duka_worker::jobs::{
    AppointmentReminder, Pipeline, PipelineSettings, ProcessInboundMessage, SummarizeConversation,
};
use duka_worker::{Queue, WorkerEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duka=info,duka_gateway=info,tower_http=warn".into()),
        )
        .init();

    // Config must be valid before anything else comes up; load() validates
    // key strength, encryption material, and required credentials.
    let config = duka_core::config::DukaConfig::load(None)?;

    let conn = Connection::open(&config.database.path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    duka_tenancy::db::init_db(&conn)?;
    duka_sessions::db::init_db(&conn)?;
    duka_commerce::db::init_db(&conn)?;
    duka_tools::db::init_db(&conn)?;
    let db = Arc::new(Mutex::new(conn));

    let crypto = Arc::new(SecretBox::new(&config.security.encryption_key_bytes()?)?);
    let tenants = Arc::new(TenantStore::new(Arc::clone(&db), Arc::clone(&crypto)));
    let resolver = Arc::new(ScopeResolver::new(Arc::clone(&db)));

    let locks = Arc::new(LockRegistry::new());
    let store = Arc::new(StateStore::new(
        Arc::clone(&db),
        Arc::clone(&locks),
        Duration::from_secs(config.pipeline.state_ttl_minutes * 60),
        Duration::from_secs(config.pipeline.lock_timeout_secs),
    ));

    let kb = Arc::new(KnowledgeStore::new(Arc::clone(&db)));
    let rail = Arc::new(rails::ConfiguredRail {
        paybill: config.messaging.paybill.clone(),
        checkout_base: config.messaging.checkout_base.clone(),
    });
    let tools = Arc::new(Tools::new(
        Arc::clone(&db),
        Arc::clone(&tenants),
        Arc::clone(&kb),
        rail,
        Arc::clone(&crypto),
    ));

    // LLM clients are pooled by credential hash and reused for the process
    // lifetime.
    let registry = ProviderRegistry::new(Duration::from_secs(config.llm.timeout_secs));
    let llm = registry.client(&config.llm.base_url, &config.llm.api_key, &config.llm.model);
    let classifiers = Arc::new(Classifiers::new(
        Arc::clone(&llm),
        config.pipeline.other_intents_to_unknown.clone(),
    ));

    let gateway = Arc::new(gateway_client::TwilioGateway::new(
        "https://api.twilio.com/2010-04-01",
        Duration::from_secs(duka_core::config::GATEWAY_DEADLINE_SECS),
    ));
    let deliverer = Arc::new(Deliverer::new(
        gateway,
        config.messaging.daily_message_limit,
        (
            config.messaging.quiet_start_hour,
            config.messaging.quiet_end_hour,
        ),
    ));

    // Worker engine with the full handler set.
    let mut engine = WorkerEngine::new(Arc::clone(&db), Queue::ALL.to_vec())?;
    let queue = engine.handle();
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&db),
        Arc::clone(&tenants),
        Arc::clone(&tools),
        Arc::clone(&classifiers),
        Arc::clone(&deliverer),
        Arc::clone(&store),
        queue.clone(),
        PipelineSettings {
            merge_window: Duration::from_secs(config.pipeline.merge_window_secs),
            history_window: config.pipeline.history_window,
            summary_every_messages: config.pipeline.summary_every_messages,
            default_kb_score_threshold: config.pipeline.kb_score_threshold,
            request_human_closes: config.pipeline.request_human_closes,
            ..PipelineSettings::default()
        },
    ));
    engine.register(Arc::new(ProcessInboundMessage::new(pipeline)));
    engine.register(Arc::new(SummarizeConversation::new(
        Arc::clone(&db),
        Arc::clone(&store),
        llm,
        config.pipeline.history_window,
    )));
    engine.register(Arc::new(AppointmentReminder::new(
        Arc::clone(&db),
        Arc::clone(&tenants),
        Arc::clone(&deliverer),
    )));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(engine.run(shutdown_rx));

    let state = Arc::new(app::AppState {
        config: config.clone(),
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
    let router = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    info!(%addr, "duka gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = worker_task.await;
    Ok(())
}
