use rusqlite::Connection;

use crate::error::Result;

/// Initialise session-side tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS global_parties (
            id             TEXT PRIMARY KEY,
            phone_e164_enc TEXT NOT NULL,
            phone_hash     TEXT NOT NULL UNIQUE,
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS customers (
            id                   TEXT PRIMARY KEY,
            tenant_id            TEXT NOT NULL,
            phone_e164           TEXT NOT NULL,
            display_name         TEXT,
            timezone             TEXT,
            utc_offset_minutes   INTEGER,
            language_pref        TEXT,
            tags                 TEXT NOT NULL DEFAULT '[]',
            last_seen_at         TEXT,
            global_party_id      TEXT,
            consent_transactional INTEGER NOT NULL DEFAULT 1,
            consent_reminder      INTEGER NOT NULL DEFAULT 1,
            consent_promotional   INTEGER NOT NULL DEFAULT 0,
            marketing_opt_in      INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL,
            UNIQUE(tenant_id, phone_e164)
        );
        CREATE INDEX IF NOT EXISTS idx_customers_tenant
            ON customers(tenant_id, last_seen_at DESC);

        CREATE TABLE IF NOT EXISTS conversations (
            id                   TEXT PRIMARY KEY,
            tenant_id            TEXT NOT NULL,
            customer_id          TEXT NOT NULL,
            status               TEXT NOT NULL DEFAULT 'open',
            channel              TEXT NOT NULL DEFAULT 'whatsapp',
            last_intent          TEXT,
            operator_id          TEXT,
            metadata             TEXT NOT NULL DEFAULT '{}',
            turn_count           INTEGER NOT NULL DEFAULT 0,
            low_confidence_count INTEGER NOT NULL DEFAULT 0,
            clarify_count        INTEGER NOT NULL DEFAULT 0,
            tool_error_streak    INTEGER NOT NULL DEFAULT 0,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_tenant_customer
            ON conversations(tenant_id, customer_id, status);

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            tenant_id           TEXT NOT NULL,
            conversation_id     TEXT NOT NULL,
            direction           TEXT NOT NULL,
            kind                TEXT NOT NULL,
            body                TEXT NOT NULL,
            payload             TEXT,
            provider_message_id TEXT,
            delivery_status     TEXT,
            template_ref        TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_provider
            ON messages(provider_message_id);

        CREATE TABLE IF NOT EXISTS conversation_state (
            conversation_id TEXT PRIMARY KEY,
            tenant_id       TEXT NOT NULL,
            state_json      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS key_facts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id   TEXT NOT NULL,
            fact              TEXT NOT NULL,
            confidence        REAL NOT NULL,
            source_message_id TEXT,
            extracted_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_key_facts_conversation
            ON key_facts(conversation_id, id);

        CREATE TABLE IF NOT EXISTS intent_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id       TEXT NOT NULL,
            conversation_id TEXT NOT NULL,
            intent          TEXT NOT NULL,
            confidence      REAL NOT NULL,
            journey         TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_intent_events_tenant
            ON intent_events(tenant_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS conversation_summaries (
            conversation_id TEXT PRIMARY KEY,
            summary         TEXT NOT NULL,
            message_count   INTEGER NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )?;
    Ok(())
}
