use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use duka_cache::{TtlCache, VersionCounters};

use crate::audit::{self, AuditEntry};
use crate::error::{Result, TenancyError};
use crate::rbac;
use crate::types::RequestContext;
use crate::users;

/// Scope cache TTL (T1). The version counter lives twice as long (T2) so a
/// counter never expires while cache entries computed against it are live.
const SCOPE_CACHE_TTL: Duration = Duration::from_secs(300);
const VERSION_TTL: Duration = Duration::from_secs(600);

/// Resolves tenant membership and effective scopes for operator requests.
///
/// Scopes are cached under `scopes:{tenant_user_id}:v{N}` where N is the
/// current value of `scope_version:{tenant_user_id}`. RBAC writes increment
/// the counter instead of deleting entries: an in-flight reader keeps its
/// version-N snapshot, the next reader computes against N+1. The stale window
/// is bounded by one version, never by a refill race.
pub struct ScopeResolver {
    db: Arc<Mutex<Connection>>,
    scopes: TtlCache<BTreeSet<String>>,
    versions: VersionCounters,
}

impl ScopeResolver {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self {
            db,
            scopes: TtlCache::new(),
            versions: VersionCounters::new(VERSION_TTL),
        }
    }

    /// Assemble the full request context for an authenticated operator call.
    ///
    /// Fails when the membership is missing, revoked, inactive, or still
    /// pending. Touches `last_seen_at` on success.
    #[instrument(skip(self), fields(tenant_id, user_id))]
    pub fn resolve_context(&self, tenant_id: &str, user_id: &str) -> Result<RequestContext> {
        let membership = {
            let conn = self.db.lock().unwrap();
            users::get_membership(&conn, tenant_id, user_id)?
        }
        .ok_or_else(|| TenancyError::MembershipInvalid {
            user_id: user_id.to_string(),
        })?;

        if !membership.is_usable() {
            return Err(TenancyError::MembershipInvalid {
                user_id: user_id.to_string(),
            });
        }

        let (scopes, scope_version) = self.effective_scopes(&membership.id)?;

        {
            let conn = self.db.lock().unwrap();
            users::touch_last_seen(&conn, &membership.id)?;
        }

        Ok(RequestContext {
            tenant_id: tenant_id.to_string(),
            tenant_user_id: membership.id,
            user_id: user_id.to_string(),
            scopes,
            request_id: Uuid::new_v4().to_string(),
            scope_version,
        })
    }

    /// Effective scopes for a membership, via the versioned cache.
    pub fn effective_scopes(&self, tenant_user_id: &str) -> Result<(BTreeSet<String>, u64)> {
        let version = self
            .versions
            .current(&format!("scope_version:{}", tenant_user_id));
        let key = format!("scopes:{}:v{}", tenant_user_id, version);

        if let Some(cached) = self.scopes.get(&key) {
            debug!(tenant_user_id, version, "scope cache hit");
            return Ok((cached, version));
        }

        let computed = {
            let conn = self.db.lock().unwrap();
            rbac::compute_scopes(&conn, tenant_user_id)?
        };
        self.scopes.put(&key, computed.clone(), SCOPE_CACHE_TTL);
        Ok((computed, version))
    }

    /// Bump the scope version for one membership. Called after every RBAC
    /// write that affects it. Atomic increment, never a delete.
    pub fn invalidate(&self, tenant_user_id: &str) {
        let v = self
            .versions
            .increment(&format!("scope_version:{}", tenant_user_id));
        debug!(tenant_user_id, version = v, "scope version bumped");
    }

    /// Enforce that `ctx` carries every scope in `required`.
    pub fn requires_scopes(&self, ctx: &RequestContext, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|s| !ctx.scopes.contains(**s))
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TenancyError::MissingScopes {
                missing: missing.join(", "),
            })
        }
    }

    // ── RBAC write wrappers — mutate, then bump versions ─────────────────────

    pub fn assign_role(&self, tenant_user_id: &str, role_id: &str) -> Result<()> {
        {
            let conn = self.db.lock().unwrap();
            rbac::assign_role(&conn, tenant_user_id, role_id)?;
        }
        self.invalidate(tenant_user_id);
        Ok(())
    }

    pub fn unassign_role(&self, tenant_user_id: &str, role_id: &str) -> Result<()> {
        {
            let conn = self.db.lock().unwrap();
            rbac::unassign_role(&conn, tenant_user_id, role_id)?;
        }
        self.invalidate(tenant_user_id);
        Ok(())
    }

    /// Role-permission mutations invalidate every member holding the role.
    pub fn add_role_permission(&self, role_id: &str, code: &str) -> Result<()> {
        let members = {
            let conn = self.db.lock().unwrap();
            rbac::add_role_permission(&conn, role_id, code)?;
            rbac::members_with_role(&conn, role_id)?
        };
        for m in members {
            self.invalidate(&m);
        }
        Ok(())
    }

    pub fn remove_role_permission(&self, role_id: &str, code: &str) -> Result<()> {
        let members = {
            let conn = self.db.lock().unwrap();
            rbac::remove_role_permission(&conn, role_id, code)?;
            rbac::members_with_role(&conn, role_id)?
        };
        for m in members {
            self.invalidate(&m);
        }
        Ok(())
    }

    pub fn set_override(
        &self,
        tenant_user_id: &str,
        code: &str,
        granted: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        {
            let conn = self.db.lock().unwrap();
            rbac::set_override(&conn, tenant_user_id, code, granted, reason)?;
        }
        self.invalidate(tenant_user_id);
        Ok(())
    }

    pub fn clear_override(&self, tenant_user_id: &str, code: &str) -> Result<()> {
        {
            let conn = self.db.lock().unwrap();
            rbac::clear_override(&conn, tenant_user_id, code)?;
        }
        self.invalidate(tenant_user_id);
        Ok(())
    }

    /// Four-eyes validation: approver must be a different, existing, active
    /// user than the initiator. Violations are always audit-logged with both
    /// ids before the error is returned.
    pub fn validate_four_eyes(
        &self,
        tenant_id: &str,
        action: &str,
        initiator_id: &str,
        approver_id: &str,
        request_id: &str,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();

        for id in [initiator_id, approver_id] {
            let user = users::get_user(&conn, id)?
                .ok_or_else(|| TenancyError::UserNotFound(id.to_string()))?;
            if !user.is_active {
                return Err(TenancyError::InvalidInput(format!(
                    "user {} is not active",
                    id
                )));
            }
        }

        if initiator_id == approver_id {
            audit::record(
                &conn,
                AuditEntry {
                    tenant_id: tenant_id.to_string(),
                    actor_id: Some(approver_id.to_string()),
                    action: format!("{}.four_eyes_violation", action),
                    target_kind: "user".to_string(),
                    target_id: Some(initiator_id.to_string()),
                    before: None,
                    after: Some(serde_json::json!({
                        "initiator_id": initiator_id,
                        "approver_id": approver_id,
                    })),
                    request_id: Some(request_id.to_string()),
                    ip: None,
                    user_agent: None,
                },
            )?;
            return Err(TenancyError::FourEyes {
                initiator: initiator_id.to_string(),
                approver: approver_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::rbac::{find_role, seed_tenant_roles};
    use crate::users::{accept_invite, create_user, invite_member};

    fn setup() -> (ScopeResolver, String, String) {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        seed_tenant_roles(&conn, "t1").unwrap();
        let user = create_user(&conn, "op@acme.co.ke", "pw").unwrap();
        invite_member(&conn, "t1", &user.id).unwrap();
        accept_invite(&conn, "t1", &user.id).unwrap();
        let resolver = ScopeResolver::new(Arc::new(Mutex::new(conn)));
        (resolver, user.id, "t1".to_string())
    }

    #[test]
    fn pending_membership_is_forbidden() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let user = create_user(&conn, "p@x.co", "pw").unwrap();
        invite_member(&conn, "t1", &user.id).unwrap();
        let resolver = ScopeResolver::new(Arc::new(Mutex::new(conn)));

        let err = resolver.resolve_context("t1", &user.id).unwrap_err();
        assert!(matches!(err, TenancyError::MembershipInvalid { .. }));
    }

    #[test]
    fn rbac_write_is_visible_on_next_read() {
        let (resolver, user_id, tenant_id) = setup();
        let ctx = resolver.resolve_context(&tenant_id, &user_id).unwrap();
        assert!(ctx.scopes.is_empty());

        let role = {
            let conn = resolver.db.lock().unwrap();
            find_role(&conn, "t1", "Catalog Manager").unwrap().unwrap()
        };
        resolver.assign_role(&ctx.tenant_user_id, &role).unwrap();

        let ctx2 = resolver.resolve_context(&tenant_id, &user_id).unwrap();
        assert!(ctx2.scopes.contains("catalog:edit"));
        assert_eq!(ctx2.scope_version, ctx.scope_version + 1);
    }

    #[test]
    fn deny_override_forbids_then_clearing_restores() {
        let (resolver, user_id, tenant_id) = setup();
        let ctx = resolver.resolve_context(&tenant_id, &user_id).unwrap();
        let role = {
            let conn = resolver.db.lock().unwrap();
            find_role(&conn, "t1", "Catalog Manager").unwrap().unwrap()
        };
        resolver.assign_role(&ctx.tenant_user_id, &role).unwrap();
        resolver
            .set_override(&ctx.tenant_user_id, "catalog:edit", false, None)
            .unwrap();

        let ctx = resolver.resolve_context(&tenant_id, &user_id).unwrap();
        assert!(resolver
            .requires_scopes(&ctx, &["catalog:edit"])
            .is_err());

        resolver
            .clear_override(&ctx.tenant_user_id, "catalog:edit")
            .unwrap();
        let ctx = resolver.resolve_context(&tenant_id, &user_id).unwrap();
        resolver.requires_scopes(&ctx, &["catalog:edit"]).unwrap();
    }

    #[test]
    fn four_eyes_rejects_same_user_and_logs() {
        let (resolver, user_id, tenant_id) = setup();
        let err = resolver
            .validate_four_eyes(&tenant_id, "withdrawal.approve", &user_id, &user_id, "req-1")
            .unwrap_err();
        assert!(matches!(err, TenancyError::FourEyes { .. }));

        let conn = resolver.db.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM audit_log WHERE action LIKE '%four_eyes_violation'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn four_eyes_accepts_distinct_active_users() {
        let (resolver, user_id, tenant_id) = setup();
        let other = {
            let conn = resolver.db.lock().unwrap();
            create_user(&conn, "second@acme.co.ke", "pw").unwrap()
        };
        resolver
            .validate_four_eyes(&tenant_id, "withdrawal.approve", &user_id, &other.id, "req-2")
            .unwrap();
    }
}
