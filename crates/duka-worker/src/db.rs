use rusqlite::Connection;

use crate::error::Result;

/// Initialise the jobs table and worker heartbeats. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id           TEXT PRIMARY KEY,
            queue        TEXT NOT NULL,
            kind         TEXT NOT NULL,
            payload      TEXT NOT NULL,
            status       TEXT NOT NULL DEFAULT 'pending',
            attempts     INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            run_after    TEXT NOT NULL,
            dedup_key    TEXT UNIQUE,
            last_error   TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_due
            ON jobs(status, queue, run_after);

        CREATE TABLE IF NOT EXISTS worker_heartbeats (
            worker_id TEXT PRIMARY KEY,
            queues    TEXT NOT NULL,
            beat_at   TEXT NOT NULL
        );",
    )?;
    Ok(())
}
