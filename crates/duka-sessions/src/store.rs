use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, instrument};

use duka_cache::{LockRegistry, TtlCache};
use duka_tenancy::types::TenantPersona;

use crate::error::Result;
use crate::state::ConversationState;
use crate::types::KeyFact;

/// Persistent store for [`ConversationState`] with a live in-process cache
/// and the per-conversation advisory lock.
///
/// A turn holds the lock from load to save; contenders either wait (bounded)
/// or merge their message into the in-flight turn via the lock registry's
/// merge buffer.
pub struct StateStore {
    db: Arc<Mutex<Connection>>,
    live: TtlCache<ConversationState>,
    locks: Arc<LockRegistry>,
    state_ttl: Duration,
    lock_timeout: Duration,
}

impl StateStore {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        locks: Arc<LockRegistry>,
        state_ttl: Duration,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            db,
            live: TtlCache::new(),
            locks,
            state_ttl,
            lock_timeout,
        }
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    fn lock_key(conversation_id: &str) -> String {
        format!("conv:{}", conversation_id)
    }

    /// Acquire the conversation lock for one turn.
    pub async fn lock_turn(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<OwnedMutexGuard<()>, duka_cache::LockTimeout> {
        self.locks
            .acquire(&Self::lock_key(conversation_id), self.lock_timeout)
            .await
    }

    pub fn turn_in_flight(&self, conversation_id: &str) -> bool {
        self.locks.is_held(&Self::lock_key(conversation_id))
    }

    /// Queue a message for the turn currently holding the lock.
    pub fn merge_into_turn(&self, conversation_id: &str, text: String) {
        self.locks.push_merge(&Self::lock_key(conversation_id), text);
    }

    pub fn drain_merged(&self, conversation_id: &str) -> Vec<String> {
        self.locks.drain_merged(&Self::lock_key(conversation_id))
    }

    /// Load state for a conversation, rebuilding from the persisted row when
    /// the live copy has expired, or creating a fresh one.
    ///
    /// Callers must hold the conversation lock.
    #[instrument(skip(self, persona), fields(tenant_id, conversation_id))]
    pub fn load(
        &self,
        tenant_id: &str,
        conversation_id: &str,
        customer_id: &str,
        customer_phone: &str,
        persona: &TenantPersona,
    ) -> Result<ConversationState> {
        if let Some(state) = self.live.get(conversation_id) {
            debug!("live state hit");
            return Ok(state);
        }

        let conn = self.db.lock().unwrap();
        let persisted: Option<String> = conn
            .query_row(
                "SELECT state_json FROM conversation_state
                 WHERE conversation_id = ?1 AND tenant_id = ?2",
                params![conversation_id, tenant_id],
                |row| row.get(0),
            )
            .optional()?;

        let state = match persisted {
            Some(json) => match serde_json::from_str::<ConversationState>(&json) {
                Ok(mut s) => {
                    // Persona may have changed since the state was written.
                    s.persona = persona.clone();
                    s
                }
                Err(e) => {
                    // A schema drift in persisted state must not wedge the
                    // conversation; start over.
                    tracing::warn!(conversation_id, error = %e, "state JSON unreadable; rebuilding");
                    ConversationState::new(
                        tenant_id,
                        conversation_id,
                        customer_id,
                        customer_phone,
                        persona.clone(),
                    )
                }
            },
            None => ConversationState::new(
                tenant_id,
                conversation_id,
                customer_id,
                customer_phone,
                persona.clone(),
            ),
        };
        Ok(state)
    }

    /// Persist state and refresh the live copy.
    ///
    /// Callers must hold the conversation lock.
    pub fn save(&self, state: &ConversationState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT INTO conversation_state (conversation_id, tenant_id, state_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id)
                 DO UPDATE SET state_json = excluded.state_json, updated_at = excluded.updated_at",
                params![
                    state.conversation_id,
                    state.tenant_id,
                    json,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        self.live
            .put(&state.conversation_id, state.clone(), self.state_ttl);
        Ok(())
    }

    /// Drop both the live copy and the persisted row (conversation closed).
    pub fn evict(&self, tenant_id: &str, conversation_id: &str) -> Result<()> {
        self.live.remove(conversation_id);
        let conn = self.db.lock().unwrap();
        conn.execute(
            "DELETE FROM conversation_state WHERE conversation_id = ?1 AND tenant_id = ?2",
            params![conversation_id, tenant_id],
        )?;
        Ok(())
    }

    // ── key facts & summary ──────────────────────────────────────────────────

    /// Append-only fact log; feeds the periodic summary job.
    pub fn append_key_fact(&self, conversation_id: &str, fact: &KeyFact) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO key_facts (conversation_id, fact, confidence, source_message_id, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                fact.fact,
                fact.confidence,
                fact.source_message_id,
                fact.extracted_at,
            ],
        )?;
        Ok(())
    }

    pub fn key_facts(&self, conversation_id: &str) -> Result<Vec<KeyFact>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT fact, confidence, source_message_id, extracted_at
             FROM key_facts WHERE conversation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(KeyFact {
                fact: row.get(0)?,
                confidence: row.get(1)?,
                source_message_id: row.get(2)?,
                extracted_at: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        message_count: u64,
    ) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO conversation_summaries (conversation_id, summary, message_count, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(conversation_id)
             DO UPDATE SET summary = excluded.summary,
                           message_count = excluded.message_count,
                           updated_at = excluded.updated_at",
            params![
                conversation_id,
                summary,
                message_count as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn summary(&self, conversation_id: &str) -> Result<Option<(String, u64)>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT summary, message_count FROM conversation_summaries
                 WHERE conversation_id = ?1",
                params![conversation_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> StateStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        StateStore::new(
            Arc::new(Mutex::new(conn)),
            Arc::new(LockRegistry::new()),
            Duration::from_secs(1800),
            Duration::from_secs(1),
        )
    }

    fn persona() -> TenantPersona {
        TenantPersona {
            bot_name: "Makena".into(),
            bot_intro: String::new(),
            tone_style: "friendly".into(),
            default_language: "en".into(),
            allowed_languages: vec!["en".into()],
            max_chattiness_level: 2,
            catalog_link_base: None,
            payments_enabled: true,
            handoff_policy: "business_hours".into(),
        }
    }

    #[tokio::test]
    async fn state_survives_save_and_reload() {
        let store = store();
        let _guard = store.lock_turn("conv1").await.unwrap();

        let mut state = store
            .load("t1", "conv1", "c1", "+254700000001", &persona())
            .unwrap();
        state.casual_turns = 2;
        state.order_id = Some("ord_9".into());
        store.save(&state).unwrap();

        // Simulate live-cache expiry by evicting only the cached copy.
        store.live.remove("conv1");
        let reloaded = store
            .load("t1", "conv1", "c1", "+254700000001", &persona())
            .unwrap();
        assert_eq!(reloaded.casual_turns, 2);
        assert_eq!(reloaded.order_id.as_deref(), Some("ord_9"));
    }

    #[tokio::test]
    async fn evict_removes_persisted_state() {
        let store = store();
        let _guard = store.lock_turn("conv1").await.unwrap();
        let state = store
            .load("t1", "conv1", "c1", "+254700000001", &persona())
            .unwrap();
        store.save(&state).unwrap();
        store.evict("t1", "conv1").unwrap();

        let fresh = store
            .load("t1", "conv1", "c1", "+254700000001", &persona())
            .unwrap();
        assert_eq!(fresh.turn_count, 0);
    }

    #[tokio::test]
    async fn merge_buffer_feeds_in_flight_turn() {
        let store = store();
        let _guard = store.lock_turn("conv1").await.unwrap();
        assert!(store.turn_in_flight("conv1"));
        store.merge_into_turn("conv1", "na bei?".into());
        assert_eq!(store.drain_merged("conv1"), vec!["na bei?"]);
    }

    #[test]
    fn key_facts_are_append_only_in_order() {
        let store = store();
        for (i, fact) in ["prefers delivery", "budget 50k"].iter().enumerate() {
            store
                .append_key_fact(
                    "conv1",
                    &KeyFact {
                        fact: fact.to_string(),
                        confidence: 0.9,
                        source_message_id: Some(format!("m{}", i)),
                        extracted_at: Utc::now().to_rfc3339(),
                    },
                )
                .unwrap();
        }
        let facts = store.key_facts("conv1").unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].fact, "prefers delivery");
    }
}
