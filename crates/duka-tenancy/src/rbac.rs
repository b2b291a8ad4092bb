use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, TenancyError};

/// Permission codes known to the platform. Seeded once; referenced by code
/// everywhere else.
pub const ALL_PERMISSIONS: &[&str] = &[
    "catalog:view",
    "catalog:edit",
    "inbox:view",
    "inbox:respond",
    "orders:view",
    "orders:manage",
    "finance:withdraw:initiate",
    "finance:withdraw:approve",
    "team:manage",
    "audit:view",
];

/// System roles created for every new tenant: (name, permission codes).
const SYSTEM_ROLES: &[(&str, &[&str])] = &[
    ("Owner", ALL_PERMISSIONS),
    (
        "Manager",
        &[
            "catalog:view",
            "catalog:edit",
            "inbox:view",
            "inbox:respond",
            "orders:view",
            "orders:manage",
            "audit:view",
        ],
    ),
    ("Catalog Manager", &["catalog:view", "catalog:edit"]),
    (
        "Support Agent",
        &["inbox:view", "inbox:respond", "orders:view", "catalog:view"],
    ),
    (
        "Finance",
        &[
            "finance:withdraw:initiate",
            "finance:withdraw:approve",
            "orders:view",
            "audit:view",
        ],
    ),
];

/// Insert the permission if missing, return its id either way.
pub fn ensure_permission(conn: &Connection, code: &str) -> Result<String> {
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM permissions WHERE code = ?1",
            params![code],
            |row| row.get::<_, String>(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT OR IGNORE INTO permissions (id, code) VALUES (?1, ?2)",
        params![id, code],
    )?;
    // Read back — handles the race where two callers insert simultaneously.
    let id = conn.query_row(
        "SELECT id FROM permissions WHERE code = ?1",
        params![code],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn create_role(
    conn: &Connection,
    tenant_id: &str,
    name: &str,
    is_system: bool,
) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO roles (id, tenant_id, name, is_system) VALUES (?1, ?2, ?3, ?4)",
        params![id, tenant_id, name, is_system],
    )?;
    Ok(id)
}

/// System-seeded roles are immutable; mutations are rejected.
fn ensure_role_mutable(conn: &Connection, role_id: &str) -> Result<()> {
    let is_system: Option<bool> = conn
        .query_row(
            "SELECT is_system FROM roles WHERE id = ?1",
            params![role_id],
            |row| row.get::<_, i64>(0).map(|v| v != 0),
        )
        .optional()?;
    match is_system {
        None => Err(TenancyError::InvalidInput(format!(
            "role {} does not exist",
            role_id
        ))),
        Some(true) => Err(TenancyError::Conflict(
            "system roles cannot be modified".to_string(),
        )),
        Some(false) => Ok(()),
    }
}

pub fn add_role_permission(conn: &Connection, role_id: &str, code: &str) -> Result<()> {
    ensure_role_mutable(conn, role_id)?;
    let perm_id = ensure_permission(conn, code)?;
    conn.execute(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
        params![role_id, perm_id],
    )?;
    Ok(())
}

pub fn remove_role_permission(conn: &Connection, role_id: &str, code: &str) -> Result<()> {
    ensure_role_mutable(conn, role_id)?;
    conn.execute(
        "DELETE FROM role_permissions WHERE role_id = ?1
         AND permission_id = (SELECT id FROM permissions WHERE code = ?2)",
        params![role_id, code],
    )?;
    Ok(())
}

pub fn assign_role(conn: &Connection, tenant_user_id: &str, role_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO tenant_user_roles (tenant_user_id, role_id) VALUES (?1, ?2)",
        params![tenant_user_id, role_id],
    )?;
    Ok(())
}

pub fn unassign_role(conn: &Connection, tenant_user_id: &str, role_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM tenant_user_roles WHERE tenant_user_id = ?1 AND role_id = ?2",
        params![tenant_user_id, role_id],
    )?;
    Ok(())
}

/// Set a per-user override. `granted = false` is a deny that beats any role
/// grant; `granted = true` adds the permission outside of roles.
pub fn set_override(
    conn: &Connection,
    tenant_user_id: &str,
    code: &str,
    granted: bool,
    reason: Option<&str>,
) -> Result<()> {
    let perm_id = ensure_permission(conn, code)?;
    conn.execute(
        "INSERT INTO user_permissions (id, tenant_user_id, permission_id, granted, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(tenant_user_id, permission_id)
         DO UPDATE SET granted = excluded.granted, reason = excluded.reason",
        params![
            Uuid::now_v7().to_string(),
            tenant_user_id,
            perm_id,
            granted,
            reason,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn clear_override(conn: &Connection, tenant_user_id: &str, code: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM user_permissions WHERE tenant_user_id = ?1
         AND permission_id = (SELECT id FROM permissions WHERE code = ?2)",
        params![tenant_user_id, code],
    )?;
    Ok(())
}

/// Tenant-user ids holding `role_id` — the set whose scope caches must be
/// version-bumped after a role-permission mutation.
pub fn members_with_role(conn: &Connection, role_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT tenant_user_id FROM tenant_user_roles WHERE role_id = ?1")?;
    let rows = stmt.query_map(params![role_id], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_role(conn: &Connection, tenant_id: &str, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM roles WHERE tenant_id = ?1 AND name = ?2",
            params![tenant_id, name],
            |row| row.get(0),
        )
        .optional()?)
}

/// Compute effective scopes from scratch:
/// union of role permissions, then overrides — deny always wins.
pub fn compute_scopes(conn: &Connection, tenant_user_id: &str) -> Result<BTreeSet<String>> {
    let mut scopes: BTreeSet<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT p.code
             FROM tenant_user_roles tur
             JOIN role_permissions rp ON rp.role_id = tur.role_id
             JOIN permissions p ON p.id = rp.permission_id
             WHERE tur.tenant_user_id = ?1",
        )?;
        let rows = stmt.query_map(params![tenant_user_id], |row| row.get::<_, String>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    // Overrides: apply grants first, then denies, so a deny row removes the
    // permission regardless of any grant source.
    let overrides: Vec<(String, bool)> = {
        let mut stmt = conn.prepare(
            "SELECT p.code, up.granted
             FROM user_permissions up
             JOIN permissions p ON p.id = up.permission_id
             WHERE up.tenant_user_id = ?1",
        )?;
        let rows = stmt.query_map(params![tenant_user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
        })?;
        rows.filter_map(|r| r.ok()).collect()
    };

    for (code, _) in overrides.iter().filter(|(_, g)| *g) {
        scopes.insert(code.clone());
    }
    for (code, _) in overrides.iter().filter(|(_, g)| !*g) {
        scopes.remove(code);
    }

    Ok(scopes)
}

/// Seed the global permission catalog and the per-tenant system roles.
/// Idempotent — running on an already-seeded tenant is a no-op.
pub fn seed_tenant_roles(conn: &Connection, tenant_id: &str) -> Result<()> {
    for code in ALL_PERMISSIONS {
        ensure_permission(conn, code)?;
    }
    for (name, codes) in SYSTEM_ROLES {
        if find_role(conn, tenant_id, name)?.is_some() {
            continue;
        }
        let role_id = create_role(conn, tenant_id, name, true)?;
        for code in *codes {
            let perm_id = ensure_permission(conn, code)?;
            conn.execute(
                "INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)",
                params![role_id, perm_id],
            )?;
        }
    }
    info!(tenant_id, "system roles seeded");
    Ok(())
}
