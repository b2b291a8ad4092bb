use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{Result, TenancyError};
use crate::types::{InviteStatus, TenantUser, User};

/// Create a global operator identity. Email is unique across the platform.
pub fn create_user(conn: &Connection, email: &str, password: &str) -> Result<User> {
    if !email.contains('@') {
        return Err(TenancyError::InvalidInput(format!(
            "not an email address: {}",
            email
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| TenancyError::Crypto(e.to_string()))?
        .to_string();

    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, email, password_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, email, hash, now],
    )?;

    get_user(conn, &id)?.ok_or_else(|| TenancyError::UserNotFound(id))
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, password_hash, is_active, totp_enabled, created_at, updated_at
         FROM users WHERE id = ?1",
    )?;
    Ok(stmt.query_row(params![user_id], row_to_user).optional()?)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, password_hash, is_active, totp_enabled, created_at, updated_at
         FROM users WHERE email = ?1",
    )?;
    Ok(stmt.query_row(params![email], row_to_user).optional()?)
}

/// Constant-time password verification via argon2.
pub fn verify_password(user: &User, password: &str) -> bool {
    PasswordHash::new(&user.password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Invite a user into a tenant. The membership starts `pending` and cannot
/// act until accepted.
pub fn invite_member(conn: &Connection, tenant_id: &str, user_id: &str) -> Result<TenantUser> {
    let id = Uuid::now_v7().to_string();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO tenant_users (id, tenant_id, user_id, invite_status, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4)",
        params![id, tenant_id, user_id, now],
    )?;
    get_membership(conn, tenant_id, user_id)?.ok_or_else(|| TenancyError::UserNotFound(id))
}

pub fn accept_invite(conn: &Connection, tenant_id: &str, user_id: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE tenant_users SET invite_status = 'accepted'
         WHERE tenant_id = ?1 AND user_id = ?2 AND invite_status = 'pending'",
        params![tenant_id, user_id],
    )?;
    if n == 0 {
        return Err(TenancyError::MembershipInvalid {
            user_id: user_id.to_string(),
        });
    }
    Ok(())
}

pub fn revoke_member(conn: &Connection, tenant_id: &str, user_id: &str) -> Result<()> {
    let n = conn.execute(
        "UPDATE tenant_users SET invite_status = 'revoked', is_active = 0
         WHERE tenant_id = ?1 AND user_id = ?2",
        params![tenant_id, user_id],
    )?;
    if n == 0 {
        return Err(TenancyError::MembershipInvalid {
            user_id: user_id.to_string(),
        });
    }
    Ok(())
}

pub fn get_membership(
    conn: &Connection,
    tenant_id: &str,
    user_id: &str,
) -> Result<Option<TenantUser>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, user_id, invite_status, is_active, last_seen_at
         FROM tenant_users WHERE tenant_id = ?1 AND user_id = ?2",
    )?;
    Ok(stmt
        .query_row(params![tenant_id, user_id], row_to_membership)
        .optional()?)
}

pub fn get_membership_by_id(conn: &Connection, tenant_user_id: &str) -> Result<Option<TenantUser>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, user_id, invite_status, is_active, last_seen_at
         FROM tenant_users WHERE id = ?1",
    )?;
    Ok(stmt
        .query_row(params![tenant_user_id], row_to_membership)
        .optional()?)
}

pub fn touch_last_seen(conn: &Connection, tenant_user_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE tenant_users SET last_seen_at = ?2 WHERE id = ?1",
        params![tenant_user_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
        totp_enabled: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_membership(row: &Row<'_>) -> rusqlite::Result<TenantUser> {
    let status: String = row.get(3)?;
    Ok(TenantUser {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        user_id: row.get(2)?,
        invite_status: status.parse().unwrap_or(InviteStatus::Revoked),
        is_active: row.get::<_, i64>(4)? != 0,
        last_seen_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let conn = conn();
        let user = create_user(&conn, "amina@acme.co.ke", "correct horse").unwrap();
        assert!(verify_password(&user, "correct horse"));
        assert!(!verify_password(&user, "wrong"));
        assert_ne!(user.password_hash, "correct horse");
    }

    #[test]
    fn membership_must_be_accepted_to_be_usable() {
        let conn = conn();
        let user = create_user(&conn, "amina@acme.co.ke", "pw").unwrap();
        let m = invite_member(&conn, "t1", &user.id).unwrap();
        assert!(!m.is_usable());

        accept_invite(&conn, "t1", &user.id).unwrap();
        let m = get_membership(&conn, "t1", &user.id).unwrap().unwrap();
        assert!(m.is_usable());

        revoke_member(&conn, "t1", &user.id).unwrap();
        let m = get_membership(&conn, "t1", &user.id).unwrap().unwrap();
        assert!(!m.is_usable());
    }

    #[test]
    fn duplicate_email_rejected() {
        let conn = conn();
        create_user(&conn, "a@b.co", "pw").unwrap();
        assert!(create_user(&conn, "a@b.co", "pw2").is_err());
    }
}
