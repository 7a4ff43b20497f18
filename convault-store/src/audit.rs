//! Append-only audit log.
//!
//! Every store, fetch, and deletion leaves exactly one entry. Actor
//! identifiers are masked before they reach this module's callers' SQL, and
//! aggregate counts are noised so the log itself cannot be used to
//! reconstruct a user's message volume over time. Entries are never updated
//! or deleted by any code path in this crate.

use crate::error::StoreResult;
use chrono::Utc;
use duckdb::{params, Connection};
use rand::Rng;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Maximum absolute perturbation applied to logged record counts.
const COUNT_NOISE_BOUND: i64 = 3;

/// How many leading characters of a pseudonym survive masking.
const MASK_PREFIX_LEN: usize = 8;

/// One immutable audit log line.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub entry_id: String,
    pub event_type: String,
    pub actor_id: String,
    pub details: String,
    pub logged_at: i64,
}

/// Append-only audit log sharing the store's DuckDB connection.
#[derive(Clone)]
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLog {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Appends one entry. `actor_id` must already be masked; callers use
    /// [`mask_identifier`] for anything derived from a pseudonym.
    pub fn record(&self, event_type: &str, actor_id: &str, details: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (entry_id, event_type, actor_id, details, logged_at) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                event_type,
                actor_id,
                details,
                Utc::now().timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub fn entries(&self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT entry_id, event_type, actor_id, details, logged_at \
             FROM audit_log ORDER BY logged_at DESC LIMIT {limit}"
        ))?;
        let entries = stmt
            .query_map([], |row| {
                Ok(AuditEntry {
                    entry_id: row.get(0)?,
                    event_type: row.get(1)?,
                    actor_id: row.get(2)?,
                    details: row.get(3)?,
                    logged_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    /// Number of entries recorded for one event type.
    pub fn count_for_event(&self, event_type: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE event_type = ?",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Masks an identifier for audit use: first eight characters plus `***`.
pub fn mask_identifier(id: &str) -> String {
    let prefix: String = id.chars().take(MASK_PREFIX_LEN).collect();
    format!("{prefix}***")
}

/// Applies a small uniform perturbation to a record count before logging,
/// clamped at zero.
pub fn noised_count(n: usize) -> usize {
    let noise = rand::rng().random_range(-COUNT_NOISE_BOUND..=COUNT_NOISE_BOUND);
    (n as i64 + noise).max(0) as usize
}

pub(crate) fn initialize_audit_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            entry_id VARCHAR PRIMARY KEY,
            event_type VARCHAR NOT NULL,
            actor_id VARCHAR NOT NULL,
            details VARCHAR NOT NULL,
            logged_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_event ON audit_log(event_type);
        CREATE INDEX IF NOT EXISTS idx_audit_logged ON audit_log(logged_at DESC);
        "#,
    )?;
    Ok(())
}
