use rusqlite::Connection;

/// Initialise tool-layer tables: the tenant-namespaced knowledge base with
/// its FTS index, and handoff tickets. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kb_entries (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id  TEXT NOT NULL,
            topic      TEXT NOT NULL,
            body       TEXT NOT NULL,
            source     TEXT NOT NULL DEFAULT 'manual',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(tenant_id, topic)
        );
        CREATE INDEX IF NOT EXISTS idx_kb_tenant ON kb_entries(tenant_id);

        CREATE VIRTUAL TABLE IF NOT EXISTS kb_fts
            USING fts5(topic, body, content='kb_entries', content_rowid='id');

        CREATE TABLE IF NOT EXISTS handoff_tickets (
            id              TEXT PRIMARY KEY,
            tenant_id       TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            customer_id     TEXT NOT NULL,
            reason          TEXT NOT NULL,
            snapshot        TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'open',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_handoff_tenant
            ON handoff_tickets(tenant_id, status, created_at DESC);",
    )
}
