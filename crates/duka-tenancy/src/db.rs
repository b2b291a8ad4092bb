use rusqlite::Connection;

use crate::error::Result;

/// Initialise tenancy, RBAC, and log tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id                   TEXT PRIMARY KEY,
            name                 TEXT NOT NULL,
            slug                 TEXT NOT NULL UNIQUE,
            status               TEXT NOT NULL DEFAULT 'trial',
            sender_number_enc    TEXT,
            sender_number_hash   TEXT,
            account_sid_enc      TEXT,
            auth_token_enc       TEXT,
            webhook_secret_enc   TEXT,
            timezone             TEXT NOT NULL DEFAULT 'Africa/Nairobi',
            utc_offset_minutes   INTEGER NOT NULL DEFAULT 180,
            quiet_start_hour     INTEGER,
            quiet_end_hour       INTEGER,
            tier                 TEXT NOT NULL DEFAULT 'starter',
            subscription_waived  INTEGER NOT NULL DEFAULT 0,
            bot_name             TEXT NOT NULL DEFAULT 'Duka Assistant',
            bot_intro            TEXT NOT NULL DEFAULT '',
            tone_style           TEXT NOT NULL DEFAULT 'friendly',
            default_language     TEXT NOT NULL DEFAULT 'en',
            allowed_languages    TEXT NOT NULL DEFAULT '[\"en\",\"sw\"]',
            max_chattiness_level INTEGER NOT NULL DEFAULT 2,
            catalog_link_base    TEXT,
            payments_enabled     INTEGER NOT NULL DEFAULT 1,
            handoff_policy       TEXT NOT NULL DEFAULT 'business_hours',
            daily_message_limit  INTEGER,
            kb_score_threshold   REAL,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tenants_sender
            ON tenants(sender_number_hash);

        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            email         TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_active     INTEGER NOT NULL DEFAULT 1,
            totp_enabled  INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tenant_users (
            id            TEXT PRIMARY KEY,
            tenant_id     TEXT NOT NULL,
            user_id       TEXT NOT NULL,
            invite_status TEXT NOT NULL DEFAULT 'pending',
            is_active     INTEGER NOT NULL DEFAULT 1,
            last_seen_at  TEXT,
            created_at    TEXT NOT NULL,
            UNIQUE(tenant_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_tenant_users_tenant
            ON tenant_users(tenant_id);

        CREATE TABLE IF NOT EXISTS permissions (
            id   TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS roles (
            id        TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name      TEXT NOT NULL,
            is_system INTEGER NOT NULL DEFAULT 0,
            UNIQUE(tenant_id, name)
        );

        CREATE TABLE IF NOT EXISTS role_permissions (
            role_id       TEXT NOT NULL,
            permission_id TEXT NOT NULL,
            PRIMARY KEY (role_id, permission_id)
        );

        CREATE TABLE IF NOT EXISTS tenant_user_roles (
            tenant_user_id TEXT NOT NULL,
            role_id        TEXT NOT NULL,
            PRIMARY KEY (tenant_user_id, role_id)
        );

        CREATE TABLE IF NOT EXISTS user_permissions (
            id             TEXT PRIMARY KEY,
            tenant_user_id TEXT NOT NULL,
            permission_id  TEXT NOT NULL,
            granted        INTEGER NOT NULL,
            reason         TEXT,
            created_at     TEXT NOT NULL,
            UNIQUE(tenant_user_id, permission_id)
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id         TEXT PRIMARY KEY,
            tenant_id  TEXT NOT NULL,
            key_hash   TEXT NOT NULL UNIQUE,
            label      TEXT NOT NULL,
            is_active  INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS webhook_log (
            id                  TEXT PRIMARY KEY,
            tenant_id           TEXT,
            provider            TEXT NOT NULL,
            provider_message_id TEXT,
            status              TEXT NOT NULL,
            payload_enc         TEXT,
            error               TEXT,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_log_tenant
            ON webhook_log(tenant_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS audit_log (
            id          TEXT PRIMARY KEY,
            tenant_id   TEXT NOT NULL,
            actor_id    TEXT,
            action      TEXT NOT NULL,
            target_kind TEXT NOT NULL,
            target_id   TEXT,
            before_json TEXT,
            after_json  TEXT,
            request_id  TEXT,
            ip          TEXT,
            user_agent  TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_log_tenant
            ON audit_log(tenant_id, created_at DESC);",
    )?;
    Ok(())
}
