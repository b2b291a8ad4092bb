use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use duka_cache::TtlCache;
use duka_core::types::TenantStatus;

use crate::crypto::SecretBox;
use crate::error::{Result, TenancyError};
use crate::types::{GatewayCredentials, Tenant, TenantPersona};

/// Tenant-config cache TTL. Invalidated on every write.
const TENANT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Everything needed to register a new tenant.
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub sender_number: String,
    pub account_sid: String,
    pub auth_token: String,
    pub webhook_secret: String,
    pub timezone: String,
    pub utc_offset_minutes: i32,
}

/// Tenant repository with an in-process config cache.
pub struct TenantStore {
    db: Arc<Mutex<Connection>>,
    crypto: Arc<SecretBox>,
    cache: TtlCache<Tenant>,
}

impl TenantStore {
    pub fn new(db: Arc<Mutex<Connection>>, crypto: Arc<SecretBox>) -> Self {
        Self {
            db,
            crypto,
            cache: TtlCache::new(),
        }
    }

    /// Register a tenant in `trial` status. The sender number must not be in
    /// use by any other active-or-trial tenant.
    pub fn create(&self, new: NewTenant) -> Result<Tenant> {
        let conn = self.db.lock().unwrap();
        self.check_sender_collision(&conn, &new.sender_number, None)?;

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let sender_hash = self.crypto.index_hash(&new.sender_number);

        conn.execute(
            "INSERT INTO tenants
             (id, name, slug, status, sender_number_enc, sender_number_hash,
              account_sid_enc, auth_token_enc, webhook_secret_enc,
              timezone, utc_offset_minutes, created_at, updated_at)
             VALUES (?1,?2,?3,'trial',?4,?5,?6,?7,?8,?9,?10,?11,?11)",
            params![
                id,
                new.name,
                new.slug,
                self.crypto.encrypt(&new.sender_number)?,
                sender_hash,
                self.crypto.encrypt(&new.account_sid)?,
                self.crypto.encrypt(&new.auth_token)?,
                self.crypto.encrypt(&new.webhook_secret)?,
                new.timezone,
                new.utc_offset_minutes,
                now,
            ],
        )?;
        crate::rbac::seed_tenant_roles(&conn, &id)?;
        info!(tenant_id = %id, slug = %new.slug, "tenant registered");

        self.fetch(&conn, &id)?.ok_or(TenancyError::TenantNotFound)
    }

    /// Look up by primary key, via the config cache.
    pub fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        if let Some(t) = self.cache.get(tenant_id) {
            return Ok(Some(t));
        }
        let conn = self.db.lock().unwrap();
        let tenant = self.fetch(&conn, tenant_id)?;
        if let Some(ref t) = tenant {
            self.cache.put(tenant_id, t.clone(), TENANT_CACHE_TTL);
        }
        Ok(tenant)
    }

    /// Resolve the tenant an inbound webhook targets, by exact recipient
    /// number match. Bypasses the cache — resolution happens once per
    /// webhook and must see fresh status.
    pub fn find_by_sender_number(&self, number: &str) -> Result<Option<Tenant>> {
        let hash = self.crypto.index_hash(number);
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tenants WHERE sender_number_hash = ?1
             AND status IN ('active','trial')",
        )?;
        let tenant = stmt.query_row(params![hash], row_to_tenant).optional()?;
        Ok(tenant)
    }

    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM tenants WHERE slug = ?1")?;
        Ok(stmt.query_row(params![slug], row_to_tenant).optional()?)
    }

    /// Decrypt the stored gateway credentials.
    pub fn credentials(&self, tenant: &Tenant) -> Result<GatewayCredentials> {
        let dec = |field: &Option<String>, name: &str| -> Result<String> {
            match field {
                Some(enc) => self.crypto.decrypt(enc),
                None => Err(TenancyError::InvalidInput(format!(
                    "tenant {} has no {} configured",
                    tenant.id, name
                ))),
            }
        };
        Ok(GatewayCredentials {
            sender_number: dec(&tenant.sender_number_enc, "sender_number")?,
            account_sid: dec(&tenant.account_sid_enc, "account_sid")?,
            auth_token: dec(&tenant.auth_token_enc, "auth_token")?,
            webhook_secret: dec(&tenant.webhook_secret_enc, "webhook_secret")?,
        })
    }

    /// Status transition. Activation re-checks the sender-number uniqueness
    /// invariant: two suspended tenants may share a number on paper, but at
    /// most one of them can come back up with it.
    pub fn set_status(&self, tenant_id: &str, status: TenantStatus) -> Result<()> {
        let conn = self.db.lock().unwrap();
        if status.is_serviceable() {
            let sender: Option<String> = conn
                .query_row(
                    "SELECT sender_number_enc FROM tenants WHERE id = ?1",
                    params![tenant_id],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            if let Some(enc) = sender {
                let number = self.crypto.decrypt(&enc)?;
                self.check_sender_collision(&conn, &number, Some(tenant_id))?;
            }
        }
        let n = conn.execute(
            "UPDATE tenants SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![tenant_id, status.to_string(), Utc::now().to_rfc3339()],
        )?;
        if n == 0 {
            return Err(TenancyError::TenantNotFound);
        }
        self.cache.remove(tenant_id);
        info!(tenant_id, status = %status, "tenant status changed");
        Ok(())
    }

    /// Update persona and runtime flags. Invalidates the config cache.
    pub fn update_persona(&self, tenant_id: &str, persona: &TenantPersona) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let n = conn.execute(
            "UPDATE tenants SET
                bot_name = ?2, bot_intro = ?3, tone_style = ?4,
                default_language = ?5, allowed_languages = ?6,
                max_chattiness_level = ?7, catalog_link_base = ?8,
                payments_enabled = ?9, handoff_policy = ?10, updated_at = ?11
             WHERE id = ?1",
            params![
                tenant_id,
                persona.bot_name,
                persona.bot_intro,
                persona.tone_style,
                persona.default_language,
                serde_json::to_string(&persona.allowed_languages)?,
                persona.max_chattiness_level,
                persona.catalog_link_base,
                persona.payments_enabled,
                persona.handoff_policy,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if n == 0 {
            return Err(TenancyError::TenantNotFound);
        }
        self.cache.remove(tenant_id);
        Ok(())
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    fn fetch(&self, conn: &Connection, tenant_id: &str) -> Result<Option<Tenant>> {
        let mut stmt = conn.prepare("SELECT * FROM tenants WHERE id = ?1")?;
        Ok(stmt.query_row(params![tenant_id], row_to_tenant).optional()?)
    }

    fn check_sender_collision(
        &self,
        conn: &Connection,
        number: &str,
        exclude_tenant: Option<&str>,
    ) -> Result<()> {
        let hash = self.crypto.index_hash(number);
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM tenants WHERE sender_number_hash = ?1
                 AND status IN ('active','trial')",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) if Some(id.as_str()) != exclude_tenant => Err(TenancyError::Conflict(
                "sender number is already in use by an active tenant".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Map a `SELECT *` tenants row. Column order matches the schema in `db.rs`.
fn row_to_tenant(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let status_str: String = row.get("status")?;
    let allowed_json: String = row.get("allowed_languages")?;
    let allowed_languages: Vec<String> =
        serde_json::from_str(&allowed_json).unwrap_or_else(|_| vec!["en".to_string()]);

    Ok(Tenant {
        id: row.get("id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        status: TenantStatus::from_str(&status_str).unwrap_or(TenantStatus::Suspended),
        sender_number_enc: row.get("sender_number_enc")?,
        account_sid_enc: row.get("account_sid_enc")?,
        auth_token_enc: row.get("auth_token_enc")?,
        webhook_secret_enc: row.get("webhook_secret_enc")?,
        timezone: row.get("timezone")?,
        utc_offset_minutes: row.get("utc_offset_minutes")?,
        quiet_start_hour: row
            .get::<_, Option<i64>>("quiet_start_hour")?
            .map(|h| h as u8),
        quiet_end_hour: row
            .get::<_, Option<i64>>("quiet_end_hour")?
            .map(|h| h as u8),
        tier: row.get("tier")?,
        subscription_waived: row.get::<_, i64>("subscription_waived")? != 0,
        persona: TenantPersona {
            bot_name: row.get("bot_name")?,
            bot_intro: row.get("bot_intro")?,
            tone_style: row.get("tone_style")?,
            default_language: row.get("default_language")?,
            allowed_languages,
            max_chattiness_level: row.get::<_, i64>("max_chattiness_level")? as u8,
            catalog_link_base: row.get("catalog_link_base")?,
            payments_enabled: row.get::<_, i64>("payments_enabled")? != 0,
            handoff_policy: row.get("handoff_policy")?,
        },
        daily_message_limit: row
            .get::<_, Option<i64>>("daily_message_limit")?
            .map(|v| v as u32),
        kb_score_threshold: row.get("kb_score_threshold")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> TenantStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        TenantStore::new(
            Arc::new(Mutex::new(conn)),
            Arc::new(SecretBox::new(&[3u8; 32]).unwrap()),
        )
    }

    fn new_tenant(slug: &str, number: &str) -> NewTenant {
        NewTenant {
            name: format!("{} Shop", slug),
            slug: slug.to_string(),
            sender_number: number.to_string(),
            account_sid: "AC123".to_string(),
            auth_token: "tok".to_string(),
            webhook_secret: "whsec".to_string(),
            timezone: "Africa/Nairobi".to_string(),
            utc_offset_minutes: 180,
        }
    }

    #[test]
    fn create_and_resolve_by_sender_number() {
        let store = store();
        let t = store.create(new_tenant("acme", "+254700000001")).unwrap();
        assert_eq!(t.status, TenantStatus::Trial);

        let found = store.find_by_sender_number("+254700000001").unwrap();
        assert_eq!(found.unwrap().id, t.id);
        assert!(store.find_by_sender_number("+254700000002").unwrap().is_none());
    }

    #[test]
    fn sender_number_unique_among_active_tenants() {
        let store = store();
        store.create(new_tenant("a", "+254700000001")).unwrap();
        let err = store.create(new_tenant("b", "+254700000001")).unwrap_err();
        assert!(matches!(err, TenancyError::Conflict(_)));
    }

    #[test]
    fn suspended_tenant_frees_its_number_until_reactivation() {
        let store = store();
        let t1 = store.create(new_tenant("a", "+254700000001")).unwrap();
        store.set_status(&t1.id, TenantStatus::Suspended).unwrap();

        // Number is free now.
        store.create(new_tenant("b", "+254700000001")).unwrap();

        // Reactivating the first tenant would collide.
        let err = store.set_status(&t1.id, TenantStatus::Active).unwrap_err();
        assert!(matches!(err, TenancyError::Conflict(_)));
    }

    #[test]
    fn credentials_round_trip_through_encryption() {
        let store = store();
        let t = store.create(new_tenant("acme", "+254700000001")).unwrap();
        // Stored encrypted.
        assert_ne!(t.webhook_secret_enc.as_deref(), Some("whsec"));
        let creds = store.credentials(&t).unwrap();
        assert_eq!(creds.webhook_secret, "whsec");
        assert_eq!(creds.sender_number, "+254700000001");
    }

    #[test]
    fn get_serves_from_cache_until_write() {
        let store = store();
        let t = store.create(new_tenant("acme", "+254700000001")).unwrap();
        assert!(store.get(&t.id).unwrap().is_some());

        let mut persona = store.get(&t.id).unwrap().unwrap().persona;
        persona.bot_name = "Makena".to_string();
        store.update_persona(&t.id, &persona).unwrap();

        assert_eq!(store.get(&t.id).unwrap().unwrap().persona.bot_name, "Makena");
    }
}
