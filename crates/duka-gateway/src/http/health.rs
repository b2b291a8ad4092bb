use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::app::AppState;

/// A worker heartbeat older than this means the queue is effectively down.
const WORKER_STALE_SECS: i64 = 30;

/// GET /health — verifies storage, cache, the job backlog, and at least one
/// live worker. 200 when everything answers, 503 otherwise.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let storage_ok = {
        let conn = state.db.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    };

    // The cache is in-process; a round-trip proves the structure is sane.
    let cache_ok = {
        state
            .dedup
            .put("health:probe", (), std::time::Duration::from_secs(1));
        state.dedup.get("health:probe").is_some()
    };

    let backlog = state.queue.backlog().unwrap_or(u64::MAX);
    let broker_ok = backlog != u64::MAX;

    let worker_ok = {
        let conn = state.db.lock().unwrap();
        let cutoff = (Utc::now() - Duration::seconds(WORKER_STALE_SECS)).to_rfc3339();
        conn.query_row(
            "SELECT COUNT(*) FROM worker_heartbeats WHERE beat_at >= ?1",
            rusqlite::params![cutoff],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false)
    };

    let healthy = storage_ok && cache_ok && broker_ok && worker_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "storage": storage_ok,
            "cache": cache_ok,
            "job_broker": broker_ok,
            "worker_alive": worker_ok,
            "job_backlog": backlog,
            "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
        })),
    )
}
