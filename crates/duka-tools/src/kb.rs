use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::contract::{ToolError, ToolResult};

/// One retrieved snippet with its normalized relevance score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbHit {
    pub snippet: String,
    pub score: f64,
    pub source: String,
}

/// Tenant-partitioned knowledge store backed by SQLite FTS5.
///
/// Every read and write is constrained to one namespace, `tenant:{id}`.
/// The namespace argument is explicit and checked against the tenant making
/// the call — a mismatch is a hard error, not an empty result.
pub struct KnowledgeStore {
    db: Arc<Mutex<Connection>>,
}

impl KnowledgeStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn namespace(tenant_id: &str) -> String {
        format!("tenant:{}", tenant_id)
    }

    /// Reject any attempt to read a namespace other than the caller's own.
    fn check_namespace(tenant_id: &str, namespace: &str) -> ToolResult<()> {
        if namespace != Self::namespace(tenant_id) {
            return Err(ToolError::Permanent(format!(
                "cross-namespace read rejected: {} under tenant {}",
                namespace, tenant_id
            )));
        }
        Ok(())
    }

    /// Insert or update one entry, keeping the FTS index in sync.
    pub fn upsert(
        &self,
        tenant_id: &str,
        topic: &str,
        body: &str,
        source: &str,
    ) -> ToolResult<()> {
        let conn = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM kb_entries WHERE tenant_id = ?1 AND topic = ?2",
                params![tenant_id, topic],
                |row| row.get(0),
            )
            .ok();

        if let Some(id) = existing {
            // External-content FTS: delete the old index row, then re-add.
            conn.execute(
                "INSERT INTO kb_fts(kb_fts, rowid, topic, body)
                 SELECT 'delete', id, topic, body FROM kb_entries WHERE id = ?1",
                params![id],
            )
            .map_err(ToolError::from_sqlite)?;
            conn.execute(
                "UPDATE kb_entries SET body = ?2, source = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, body, source, now],
            )
            .map_err(ToolError::from_sqlite)?;
            conn.execute(
                "INSERT INTO kb_fts(rowid, topic, body) VALUES (?1, ?2, ?3)",
                params![id, topic, body],
            )
            .map_err(ToolError::from_sqlite)?;
        } else {
            conn.execute(
                "INSERT INTO kb_entries (tenant_id, topic, body, source, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![tenant_id, topic, body, source, now],
            )
            .map_err(ToolError::from_sqlite)?;
            let id = conn.last_insert_rowid();
            conn.execute(
                "INSERT INTO kb_fts(rowid, topic, body) VALUES (?1, ?2, ?3)",
                params![id, topic, body],
            )
            .map_err(ToolError::from_sqlite)?;
        }
        Ok(())
    }

    /// Full-text retrieval inside one tenant namespace.
    ///
    /// Scores are bm25 ranks normalized into (0, 1]; callers compare against
    /// the tenant's retrieval threshold.
    pub fn retrieve(
        &self,
        tenant_id: &str,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> ToolResult<Vec<KbHit>> {
        Self::check_namespace(tenant_id, namespace)?;

        let sanitized = fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT e.body, e.topic, bm25(kb_fts) AS rank
                 FROM kb_entries e
                 JOIN kb_fts f ON e.id = f.rowid
                 WHERE e.tenant_id = ?1 AND kb_fts MATCH ?2
                 ORDER BY rank
                 LIMIT ?3",
            )
            .map_err(ToolError::from_sqlite)?;

        let rows = stmt
            .query_map(params![tenant_id, sanitized, k as i64], |row| {
                let body: String = row.get(0)?;
                let topic: String = row.get(1)?;
                let rank: f64 = row.get(2)?;
                Ok((body, topic, rank))
            })
            .map_err(ToolError::from_sqlite)?;

        let hits = rows
            .filter_map(|r| r.ok())
            .map(|(body, topic, rank)| {
                // bm25: smaller (more negative) is better. Map onto (0, 1].
                let strength = (-rank).max(0.0);
                KbHit {
                    snippet: body,
                    score: strength / (1.0 + strength),
                    source: topic,
                }
            })
            .collect::<Vec<_>>();

        debug!(tenant_id, query, hits = hits.len(), "kb retrieval");
        Ok(hits)
    }
}

/// Turn free text into a safe FTS5 query: bare terms, OR-joined. Quotes and
/// operators from user text must not reach the MATCH parser.
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> KnowledgeStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        KnowledgeStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn retrieval_is_namespace_isolated() {
        let kb = store();
        kb.upsert("t1", "returns", "Returns accepted within 14 days with receipt", "manual")
            .unwrap();
        kb.upsert("t2", "returns", "No returns on sale items", "manual")
            .unwrap();

        let hits = kb
            .retrieve("t1", &KnowledgeStore::namespace("t1"), "returns policy", 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("14 days"));
    }

    #[test]
    fn cross_namespace_read_is_a_hard_error() {
        let kb = store();
        let err = kb
            .retrieve("t1", "tenant:t2", "anything", 5)
            .unwrap_err();
        assert!(matches!(err, ToolError::Permanent(_)));
    }

    #[test]
    fn scores_are_normalized_and_ordered() {
        let kb = store();
        kb.upsert("t1", "delivery", "We deliver within Nairobi same day", "manual")
            .unwrap();
        kb.upsert("t1", "hours", "Open Monday to Saturday 9am-6pm", "manual")
            .unwrap();

        let hits = kb
            .retrieve("t1", &KnowledgeStore::namespace("t1"), "delivery Nairobi", 5)
            .unwrap();
        assert!(!hits.is_empty());
        for h in &hits {
            assert!(h.score > 0.0 && h.score <= 1.0);
        }
        assert!(hits[0].snippet.contains("deliver"));
    }

    #[test]
    fn upsert_replaces_existing_topic() {
        let kb = store();
        kb.upsert("t1", "hours", "Open 9-5", "manual").unwrap();
        kb.upsert("t1", "hours", "Open 8-8 every day", "manual").unwrap();

        let hits = kb
            .retrieve("t1", &KnowledgeStore::namespace("t1"), "open hours", 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("8-8"));
    }

    #[test]
    fn user_quotes_do_not_break_match() {
        let kb = store();
        kb.upsert("t1", "warranty", "One year warranty on electronics", "manual")
            .unwrap();
        let hits = kb
            .retrieve(
                "t1",
                &KnowledgeStore::namespace("t1"),
                "\"warranty\" OR (1=1",
                5,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
