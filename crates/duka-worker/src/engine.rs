use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, WorkerError};
use crate::types::{Job, JobStatus, Queue};

/// A job body. Implementations must be safe to retry — the engine re-runs
/// them on failure up to `max_attempts`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn run(&self, payload: &serde_json::Value) -> std::result::Result<(), String>;
}

/// Shared handle for enqueuing while the engine loop runs elsewhere.
#[derive(Clone)]
pub struct QueueHandle {
    db: Arc<Mutex<Connection>>,
}

impl QueueHandle {
    /// Enqueue a job. When `dedup_key` is given and a job with that key
    /// already exists (any status), the enqueue is a no-op returning the
    /// existing id — this is how reminder jobs stay unique per appointment.
    pub fn enqueue(
        &self,
        queue: Queue,
        kind: &str,
        payload: &serde_json::Value,
        max_attempts: u32,
        dedup_key: Option<&str>,
        run_after: Option<chrono::DateTime<Utc>>,
    ) -> Result<String> {
        let conn = self.db.lock().unwrap();

        if let Some(key) = dedup_key {
            if let Some(existing) = conn
                .query_row(
                    "SELECT id FROM jobs WHERE dedup_key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
            {
                return Ok(existing);
            }
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT OR IGNORE INTO jobs
             (id, queue, kind, payload, status, attempts, max_attempts,
              run_after, dedup_key, created_at, updated_at)
             VALUES (?1,?2,?3,?4,'pending',0,?5,?6,?7,?8,?8)",
            params![
                id,
                queue.as_str(),
                kind,
                payload.to_string(),
                max_attempts,
                run_after.unwrap_or(now).to_rfc3339(),
                dedup_key,
                now.to_rfc3339(),
            ],
        )?;
        info!(job_id = %id, queue = queue.as_str(), kind, "job enqueued");
        Ok(id)
    }

    pub fn job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.db.lock().unwrap();
        fetch_job(&conn, id)
    }

    /// Count of jobs pending or running — used by the health surface.
    pub fn backlog(&self) -> Result<u64> {
        let conn = self.db.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('pending','running')",
            [],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

/// Polls the jobs table and drives handlers, one job at a time per engine.
/// Run several engines (or several processes) for parallelism — claiming is
/// an atomic status flip, so workers never double-run a job.
pub struct WorkerEngine {
    db: Arc<Mutex<Connection>>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    worker_id: String,
    queues: Vec<Queue>,
}

impl WorkerEngine {
    pub fn new(db: Arc<Mutex<Connection>>, queues: Vec<Queue>) -> Result<Self> {
        {
            let conn = db.lock().unwrap();
            init_db(&conn)?;
        }
        Ok(Self {
            db,
            handlers: HashMap::new(),
            worker_id: Uuid::new_v4().to_string(),
            queues,
        })
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            db: Arc::clone(&self.db),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    /// Reset jobs left `running` by a crashed worker so they retry.
    fn recover_stuck_on_startup(&self) {
        let conn = self.db.lock().unwrap();
        match conn.execute(
            "UPDATE jobs SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
            params![Utc::now().to_rfc3339()],
        ) {
            Ok(n) if n > 0 => warn!(count = n, "recovered jobs stuck in running"),
            Err(e) => error!("stuck-job recovery failed: {e}"),
            _ => {}
        }
    }

    fn beat(&self) {
        let conn = self.db.lock().unwrap();
        let queues = self
            .queues
            .iter()
            .map(|q| q.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let _ = conn.execute(
            "INSERT INTO worker_heartbeats (worker_id, queues, beat_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(worker_id) DO UPDATE SET beat_at = excluded.beat_at",
            params![self.worker_id, queues, Utc::now().to_rfc3339()],
        );
    }

    /// Main loop. Polls every 500ms until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "worker engine started");
        self.recover_stuck_on_startup();

        let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.beat();
                    if let Err(e) = self.tick().await {
                        error!("worker tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("worker engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and execute every due job, oldest first.
    async fn tick(&self) -> Result<()> {
        loop {
            let Some(job) = self.claim_next()? else {
                return Ok(());
            };
            self.execute(job).await;
        }
    }

    fn claim_next(&self) -> Result<Option<Job>> {
        let conn = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let placeholders = self
            .queues
            .iter()
            .map(|q| format!("'{}'", q.as_str()))
            .collect::<Vec<_>>()
            .join(",");

        let id: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT id FROM jobs
                     WHERE status = 'pending' AND run_after <= ?1 AND queue IN ({})
                     ORDER BY run_after LIMIT 1",
                    placeholders
                ),
                params![now],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else { return Ok(None) };

        // Atomic claim: only one worker flips pending → running.
        let claimed = conn.execute(
            "UPDATE jobs SET status = 'running', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        fetch_job(&conn, &id)
    }

    async fn execute(&self, mut job: Job) {
        let Some(handler) = self.handlers.get(job.kind.as_str()) else {
            error!(job_id = %job.id, kind = %job.kind, "no handler for job");
            self.finish(&job.id, JobStatus::Failed, Some("no handler registered"));
            return;
        };

        info!(job_id = %job.id, kind = %job.kind, attempt = job.attempts + 1, "executing job");
        match handler.run(&job.payload).await {
            Ok(()) => self.finish(&job.id, JobStatus::Done, None),
            Err(reason) => {
                job.attempts += 1;
                if job.attempts >= job.max_attempts {
                    error!(job_id = %job.id, attempts = job.attempts, reason, "job failed permanently");
                    self.finish(&job.id, JobStatus::Failed, Some(&reason));
                } else {
                    // Exponential backoff: 2^attempts seconds.
                    let delay = Duration::seconds(1 << job.attempts.min(10));
                    let retry_at = (Utc::now() + delay).to_rfc3339();
                    warn!(job_id = %job.id, attempts = job.attempts, reason, retry_at = %retry_at, "job retry scheduled");
                    let conn = self.db.lock().unwrap();
                    let _ = conn.execute(
                        "UPDATE jobs SET status = 'pending', attempts = ?2,
                                run_after = ?3, last_error = ?4, updated_at = ?5
                         WHERE id = ?1",
                        params![
                            job.id,
                            job.attempts,
                            retry_at,
                            reason,
                            Utc::now().to_rfc3339()
                        ],
                    );
                }
            }
        }
    }

    fn finish(&self, job_id: &str, status: JobStatus, error: Option<&str>) {
        let conn = self.db.lock().unwrap();
        let _ = conn.execute(
            "UPDATE jobs SET status = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1",
            params![job_id, status.to_string(), error, Utc::now().to_rfc3339()],
        );
    }
}

fn fetch_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    let mut stmt = conn.prepare(
        "SELECT id, queue, kind, payload, status, attempts, max_attempts,
                run_after, dedup_key, last_error
         FROM jobs WHERE id = ?1",
    )?;
    let job = stmt
        .query_row(params![id], |row| {
            let payload: String = row.get(3)?;
            let status: String = row.get(4)?;
            Ok(Job {
                id: row.get(0)?,
                queue: row.get(1)?,
                kind: row.get(2)?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
                attempts: row.get::<_, i64>(5)? as u32,
                max_attempts: row.get::<_, i64>(6)? as u32,
                run_after: row.get(7)?,
                dedup_key: row.get(8)?,
                last_error: row.get(9)?,
            })
        })
        .optional()?;
    Ok(job)
}

/// Run `body` inside one transaction; commit is the success condition,
/// failure rolls everything back for the engine's retry policy.
pub fn transactional<T>(
    conn: &mut Connection,
    body: impl FnOnce(&rusqlite::Transaction<'_>) -> std::result::Result<T, String>,
) -> std::result::Result<T, String> {
    let tx = conn
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(|e| e.to_string())?;
    let out = body(&tx)?;
    tx.commit().map_err(|e| e.to_string())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: AtomicU32,
        runs: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        fn kind(&self) -> &'static str {
            "flaky"
        }
        async fn run(&self, _payload: &serde_json::Value) -> std::result::Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                Err("flaked".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn engine() -> WorkerEngine {
        let conn = Connection::open_in_memory().unwrap();
        WorkerEngine::new(Arc::new(Mutex::new(conn)), Queue::ALL.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn job_runs_once_on_success() {
        let mut engine = engine();
        let handler = Arc::new(Flaky {
            failures: AtomicU32::new(0),
            runs: AtomicU32::new(0),
        });
        engine.register(Arc::clone(&handler) as Arc<dyn JobHandler>);
        let handle = engine.handle();
        let id = handle
            .enqueue(Queue::Messaging, "flaky", &serde_json::json!({}), 3, None, None)
            .unwrap();

        engine.tick().await.unwrap();
        assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.job(&id).unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn failed_job_is_rescheduled_with_backoff_then_succeeds() {
        let mut engine = engine();
        let handler = Arc::new(Flaky {
            failures: AtomicU32::new(1),
            runs: AtomicU32::new(0),
        });
        engine.register(Arc::clone(&handler) as Arc<dyn JobHandler>);
        let handle = engine.handle();
        let id = handle
            .enqueue(Queue::Default, "flaky", &serde_json::json!({}), 3, None, None)
            .unwrap();

        engine.tick().await.unwrap();
        let job = handle.job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        let retry_at = chrono::DateTime::parse_from_rfc3339(&job.run_after).unwrap();
        assert!(retry_at > Utc::now());

        // Force the retry due now and tick again.
        {
            let conn = engine.db.lock().unwrap();
            conn.execute(
                "UPDATE jobs SET run_after = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .unwrap();
        }
        engine.tick().await.unwrap();
        assert_eq!(handle.job(&id).unwrap().unwrap().status, JobStatus::Done);
        assert_eq!(handler.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_permanently() {
        let mut engine = engine();
        let handler = Arc::new(Flaky {
            failures: AtomicU32::new(10),
            runs: AtomicU32::new(0),
        });
        engine.register(Arc::clone(&handler) as Arc<dyn JobHandler>);
        let handle = engine.handle();
        let id = handle
            .enqueue(Queue::Default, "flaky", &serde_json::json!({}), 2, None, None)
            .unwrap();

        for _ in 0..2 {
            {
                let conn = engine.db.lock().unwrap();
                conn.execute(
                    "UPDATE jobs SET run_after = ?1 WHERE id = ?2",
                    params![Utc::now().to_rfc3339(), id],
                )
                .unwrap();
            }
            engine.tick().await.unwrap();
        }
        let job = handle.job(&id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("flaked"));
    }

    #[tokio::test]
    async fn dedup_key_collapses_duplicate_enqueues() {
        let engine = engine();
        let handle = engine.handle();
        let a = handle
            .enqueue(
                Queue::Default,
                "reminder",
                &serde_json::json!({"appointment_id": "a1"}),
                3,
                Some("appt:a1:24h"),
                None,
            )
            .unwrap();
        let b = handle
            .enqueue(
                Queue::Default,
                "reminder",
                &serde_json::json!({"appointment_id": "a1"}),
                3,
                Some("appt:a1:24h"),
                None,
            )
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(handle.backlog().unwrap(), 1);
    }

    #[tokio::test]
    async fn transactional_rolls_back_on_error() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER);").unwrap();

        let result: std::result::Result<(), String> = transactional(&mut conn, |tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])
                .map_err(|e| e.to_string())?;
            Err("boom".to_string())
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
