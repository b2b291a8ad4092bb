use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use duka_tenancy::crypto::SecretBox;

use crate::error::Result;
use crate::types::{Customer, PreferenceUpdate};

/// Find or create the customer for `(tenant, phone)`. The phone is stored
/// as given (E.164); the cross-tenant linkage goes through `global_parties`
/// where the number is kept encrypted with a keyed hash for uniqueness.
pub fn get_or_create(
    conn: &Connection,
    crypto: &SecretBox,
    tenant_id: &str,
    phone_e164: &str,
) -> Result<Customer> {
    if let Some(c) = find_by_phone(conn, tenant_id, phone_e164)? {
        return Ok(c);
    }

    let party_id = ensure_global_party(conn, crypto, phone_e164)?;
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO customers
         (id, tenant_id, phone_e164, global_party_id, last_seen_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
        params![id, tenant_id, phone_e164, party_id, now],
    )?;
    info!(tenant_id, "customer created");

    // Read back — covers the concurrent-insert race on (tenant, phone).
    let customer = conn.query_row(
        "SELECT * FROM customers WHERE tenant_id = ?1 AND phone_e164 = ?2",
        params![tenant_id, phone_e164],
        row_to_customer,
    )?;
    Ok(customer)
}

/// Tenant-scoped lookup. Every query on customers carries the tenant.
pub fn find_by_phone(
    conn: &Connection,
    tenant_id: &str,
    phone_e164: &str,
) -> Result<Option<Customer>> {
    let mut stmt =
        conn.prepare("SELECT * FROM customers WHERE tenant_id = ?1 AND phone_e164 = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, phone_e164], row_to_customer)
        .optional()?)
}

pub fn get(conn: &Connection, tenant_id: &str, customer_id: &str) -> Result<Option<Customer>> {
    let mut stmt = conn.prepare("SELECT * FROM customers WHERE tenant_id = ?1 AND id = ?2")?;
    Ok(stmt
        .query_row(params![tenant_id, customer_id], row_to_customer)
        .optional()?)
}

pub fn touch_last_seen(conn: &Connection, tenant_id: &str, customer_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE customers SET last_seen_at = ?3, updated_at = ?3
         WHERE tenant_id = ?1 AND id = ?2",
        params![tenant_id, customer_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Apply explicit preference changes from the prefs subflow.
pub fn update_preferences(
    conn: &Connection,
    tenant_id: &str,
    customer_id: &str,
    update: &PreferenceUpdate,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    if let Some(ref lang) = update.language_pref {
        conn.execute(
            "UPDATE customers SET language_pref = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, customer_id, lang, now],
        )?;
    }
    if let Some(ref name) = update.display_name {
        conn.execute(
            "UPDATE customers SET display_name = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, customer_id, name, now],
        )?;
    }
    if let Some(opt_in) = update.marketing_opt_in {
        conn.execute(
            "UPDATE customers SET marketing_opt_in = ?3, consent_promotional = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, customer_id, opt_in, now],
        )?;
    }
    if let Some(v) = update.consent_reminder {
        conn.execute(
            "UPDATE customers SET consent_reminder = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, customer_id, v, now],
        )?;
    }
    if let Some(v) = update.consent_promotional {
        conn.execute(
            "UPDATE customers SET consent_promotional = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, customer_id, v, now],
        )?;
    }
    Ok(())
}

/// STOP / UNSUBSCRIBE: flip reminder and promotional consent off in one
/// statement. Transactional consent is non-revocable.
pub fn revoke_messaging_consent(
    conn: &Connection,
    tenant_id: &str,
    customer_id: &str,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE customers
         SET consent_reminder = 0, consent_promotional = 0, marketing_opt_in = 0,
             updated_at = ?3
         WHERE tenant_id = ?1 AND id = ?2",
        params![tenant_id, customer_id, Utc::now().to_rfc3339()],
    )?;
    if n > 0 {
        info!(tenant_id, customer_id, "messaging consent revoked (STOP)");
    }
    Ok(())
}

/// Insert-or-fetch the cross-tenant party row for a phone number.
fn ensure_global_party(conn: &Connection, crypto: &SecretBox, phone_e164: &str) -> Result<String> {
    let hash = crypto.index_hash(phone_e164);
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM global_parties WHERE phone_hash = ?1",
            params![hash],
            |row| row.get::<_, String>(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO global_parties (id, phone_e164_enc, phone_hash, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id,
            crypto.encrypt(phone_e164)?,
            hash,
            Utc::now().to_rfc3339()
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM global_parties WHERE phone_hash = ?1",
        params![hash],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn row_to_customer(row: &Row<'_>) -> rusqlite::Result<Customer> {
    let tags_json: String = row.get("tags")?;
    Ok(Customer {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        phone_e164: row.get("phone_e164")?,
        display_name: row.get("display_name")?,
        timezone: row.get("timezone")?,
        utc_offset_minutes: row.get("utc_offset_minutes")?,
        language_pref: row.get("language_pref")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        last_seen_at: row.get("last_seen_at")?,
        global_party_id: row.get("global_party_id")?,
        consent_transactional: row.get::<_, i64>("consent_transactional")? != 0,
        consent_reminder: row.get::<_, i64>("consent_reminder")? != 0,
        consent_promotional: row.get::<_, i64>("consent_promotional")? != 0,
        marketing_opt_in: row.get::<_, i64>("marketing_opt_in")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
