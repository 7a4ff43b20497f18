//! Encrypted conversation store with k-anonymized reads.
//!
//! Every write goes through the cipher codec (no code path persists
//! plaintext) and is keyed by the SHA-256 pseudonym of the real user id
//! (no code path persists the real id). Reads widen the scan to same-`mode`
//! peer rows before filtering back to the caller, so query volume alone
//! cannot single a user out.

use crate::audit::{self, mask_identifier, noised_count, AuditLog};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use convault_crypto::{
    decrypt, decrypt_with_fallback, encrypt, integrity_token, pseudonymize, DerivedKey, Envelope,
    KeyManager, KeyProvenance,
};
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Maximum accepted message id length.
const MAX_MESSAGE_ID_LEN: usize = 128;

/// Maximum accepted length for `mode` / `message_type` tags.
const MAX_TAG_LEN: usize = 64;

/// Conversational role of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(StoreError::Validation(format!("unknown role: {s}"))),
        }
    }
}

/// Identifiers and timestamps of a newly inserted record. Never carries the
/// plaintext back to the caller.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    pub pseudonymous_user_id: String,
    pub message_id: String,
    pub created_at: i64,
    pub retention_deadline: i64,
    pub integrity_token: String,
}

/// One decrypted conversational turn, as returned to collaborators.
#[derive(Clone, Debug)]
pub struct DecryptedMessage {
    pub role: Role,
    pub mode: String,
    pub message_type: String,
    pub content: String,
    pub created_at: i64,
}

/// One decrypted derived-analysis record.
#[derive(Clone, Debug)]
pub struct DecryptedAnalysis {
    pub analysis_type: String,
    pub content: String,
    pub created_at: i64,
}

/// Scan-level statistics for a k-anonymized fetch.
#[derive(Clone, Copy, Debug, Default)]
pub struct CohortStats {
    /// Total rows touched by the widened query (own + decoy).
    pub rows_scanned: usize,
    /// Distinct pseudonymous ids among the scanned rows.
    pub distinct_pseudonyms: usize,
}

/// Per-table deletion count inside a certificate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableCount {
    pub table: String,
    pub rows_deleted: usize,
}

/// Proof-of-deletion record. Contains only pseudonymous/batch identifiers
/// and row counts, never the deleted content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionCertificate {
    pub certificate_id: String,
    /// Pseudonymous user id for on-demand erasure, or a batch identifier for
    /// scheduled retention sweeps.
    pub subject: String,
    pub deleted: Vec<TableCount>,
    pub issued_at: i64,
}

struct RawMessageRow {
    pseudo_user_id: String,
    message_id: String,
    envelope: String,
    role: String,
    mode: String,
    message_type: String,
    created_at: i64,
    integrity_token: String,
}

/// Encrypted conversation store backed by DuckDB.
#[derive(Clone)]
pub struct ConversationStore {
    conn: Arc<Mutex<Connection>>,
    keys: Arc<KeyManager>,
    audit: AuditLog,
    message_retention: Duration,
    analysis_retention: Duration,
    cohort_size: usize,
}

impl ConversationStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path, keys: KeyManager, config: &StoreConfig) -> StoreResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "256MB", 2)?;
        Self::from_connection(conn, keys, config)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(keys: KeyManager, config: &StoreConfig) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, keys, config)
    }

    fn from_connection(
        conn: Connection,
        keys: KeyManager,
        config: &StoreConfig,
    ) -> StoreResult<Self> {
        initialize_schema(&conn)?;
        audit::initialize_audit_schema(&conn)?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            audit: AuditLog::new(conn.clone()),
            conn,
            keys: Arc::new(keys),
            message_retention: config.message_retention,
            analysis_retention: config.analysis_retention,
            cohort_size: config.cohort_size,
        })
    }

    /// The audit log backing this store.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Encrypts and persists one conversational turn.
    ///
    /// A duplicate `message_id` for the same user is rejected, not silently
    /// overwritten. The returned record carries identifiers only.
    pub fn store(
        &self,
        real_id: &str,
        message_id: &str,
        role: Role,
        mode: &str,
        message_type: &str,
        plaintext: &str,
    ) -> StoreResult<StoredRecord> {
        if plaintext.is_empty() {
            return Err(StoreError::Validation("message content is empty".into()));
        }
        if message_id.is_empty() || message_id.len() > MAX_MESSAGE_ID_LEN {
            return Err(StoreError::Validation(format!(
                "message_id must be 1..={MAX_MESSAGE_ID_LEN} characters"
            )));
        }
        validate_tag("mode", mode)?;
        validate_tag("message_type", message_type)?;

        let pseudo = pseudonymize(real_id)?;
        let envelope = encrypt(self.keys.key(), plaintext.as_bytes())?;
        let created_at = Utc::now().timestamp_micros();
        let retention_deadline = created_at + duration_micros(self.message_retention);
        let token = integrity_token(&pseudo, message_id, created_at);

        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            r#"
            INSERT OR IGNORE INTO messages (
                pseudo_user_id, message_id, ciphertext_envelope,
                role, mode, message_type,
                created_at, retention_deadline, integrity_token
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                pseudo,
                message_id,
                envelope.to_wire(),
                role.as_str(),
                mode,
                message_type,
                created_at,
                retention_deadline,
                token,
            ],
        )?;
        drop(conn);

        if affected == 0 {
            return Err(StoreError::Validation(
                "duplicate message_id for this user".into(),
            ));
        }

        self.audit.record(
            "message_stored",
            &mask_identifier(&pseudo),
            &format!("role={} mode={mode}", role.as_str()),
        )?;

        Ok(StoredRecord {
            pseudonymous_user_id: pseudo,
            message_id: message_id.to_string(),
            created_at,
            retention_deadline,
            integrity_token: token,
        })
    }

    /// Encrypts and persists one derived-analysis blob under a generated id.
    pub fn store_analysis(
        &self,
        real_id: &str,
        analysis_type: &str,
        plaintext: &str,
    ) -> StoreResult<StoredRecord> {
        if plaintext.is_empty() {
            return Err(StoreError::Validation("analysis content is empty".into()));
        }
        validate_tag("analysis_type", analysis_type)?;

        let pseudo = pseudonymize(real_id)?;
        let analysis_id = Uuid::new_v4().to_string();
        let envelope = encrypt(self.keys.key(), plaintext.as_bytes())?;
        let created_at = Utc::now().timestamp_micros();
        let retention_deadline = created_at + duration_micros(self.analysis_retention);
        let token = integrity_token(&pseudo, &analysis_id, created_at);

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO analysis (
                pseudo_user_id, analysis_id, analysis_type,
                ciphertext_envelope, created_at, retention_deadline
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                pseudo,
                analysis_id,
                analysis_type,
                envelope.to_wire(),
                created_at,
                retention_deadline,
            ],
        )?;
        drop(conn);

        self.audit.record(
            "analysis_stored",
            &mask_identifier(&pseudo),
            &format!("analysis_type={analysis_type}"),
        )?;

        Ok(StoredRecord {
            pseudonymous_user_id: pseudo,
            message_id: analysis_id,
            created_at,
            retention_deadline,
            integrity_token: token,
        })
    }

    /// Fetches the caller's most recent messages, newest first.
    pub fn fetch(&self, real_id: &str, limit: usize) -> StoreResult<Vec<DecryptedMessage>> {
        self.fetch_with_stats(real_id, limit).map(|(msgs, _)| msgs)
    }

    /// Like [`fetch`](Self::fetch), additionally reporting how wide the
    /// k-anonymity scan was.
    ///
    /// Peer-selection rule: decoys are the most recent rows, from any other
    /// user, whose `mode` matches any mode the caller has used, up to
    /// `limit * cohort_size` rows. The caller's own newest rows are always
    /// part of the scan; decoys only widen it, they never displace results.
    pub fn fetch_with_stats(
        &self,
        real_id: &str,
        limit: usize,
    ) -> StoreResult<(Vec<DecryptedMessage>, CohortStats)> {
        let pseudo = pseudonymize(real_id)?;
        if limit == 0 {
            return Ok((Vec::new(), CohortStats::default()));
        }
        let scan_limit = limit.saturating_mul(self.cohort_size);

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT pseudo_user_id, message_id, ciphertext_envelope, role, mode, message_type, \
                    created_at, integrity_token \
             FROM messages WHERE pseudo_user_id = ? \
             ORDER BY created_at DESC LIMIT {limit}"
        ))?;
        let own: Vec<RawMessageRow> = stmt
            .query_map(params![pseudo], |row| {
                Ok(RawMessageRow {
                    pseudo_user_id: row.get(0)?,
                    message_id: row.get(1)?,
                    envelope: row.get(2)?,
                    role: row.get(3)?,
                    mode: row.get(4)?,
                    message_type: row.get(5)?,
                    created_at: row.get(6)?,
                    integrity_token: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        // Anonymity-set widening: touch same-mode peer rows so volume and
        // timing are not trivially attributable to one pseudonym. Only the
        // pseudonym column is read; decoy content is never decrypted.
        let mut stmt = conn.prepare(&format!(
            "SELECT pseudo_user_id FROM messages \
             WHERE pseudo_user_id <> ? \
               AND mode IN (SELECT DISTINCT mode FROM messages WHERE pseudo_user_id = ?) \
             ORDER BY created_at DESC LIMIT {scan_limit}"
        ))?;
        let decoys: Vec<String> = stmt
            .query_map(params![pseudo, pseudo], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut distinct: HashSet<&str> = decoys.iter().map(|s| s.as_str()).collect();
        if !own.is_empty() {
            distinct.insert(pseudo.as_str());
        }
        let stats = CohortStats {
            rows_scanned: own.len() + decoys.len(),
            distinct_pseudonyms: distinct.len(),
        };

        let mut messages = Vec::with_capacity(own.len());
        for raw in &own {
            if let Some(msg) = self.decrypt_message_row(raw) {
                messages.push(msg);
            }
        }
        messages.truncate(limit);

        self.audit.record(
            "history_fetched",
            &mask_identifier(&pseudo),
            &format!("~{} records", noised_count(messages.len())),
        )?;

        Ok((messages, stats))
    }

    /// Fetches the caller's most recent analysis records, newest first.
    pub fn fetch_analysis(
        &self,
        real_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<DecryptedAnalysis>> {
        let pseudo = pseudonymize(real_id)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT analysis_id, analysis_type, ciphertext_envelope, created_at \
             FROM analysis WHERE pseudo_user_id = ? \
             ORDER BY created_at DESC LIMIT {limit}"
        ))?;
        let rows: Vec<(String, String, String, i64)> = stmt
            .query_map(params![pseudo], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut records = Vec::with_capacity(rows.len());
        for (analysis_id, analysis_type, wire, created_at) in rows {
            match self.decrypt_wire(&wire) {
                Some(content) => records.push(DecryptedAnalysis {
                    analysis_type,
                    content,
                    created_at,
                }),
                None => {
                    warn!(
                        record = %mask_identifier(&analysis_id),
                        "skipping undecryptable analysis row"
                    );
                }
            }
        }

        self.audit.record(
            "analysis_fetched",
            &mask_identifier(&pseudo),
            &format!("~{} records", noised_count(records.len())),
        )?;

        Ok(records)
    }

    /// Deletes every record for one user across all tables, in one
    /// transaction, and issues a deletion certificate.
    ///
    /// Atomic: a partially-erased identity is a worse failure mode than a
    /// retried whole operation, so any failure rolls everything back and no
    /// certificate is issued.
    pub fn delete_all(&self, real_id: &str) -> StoreResult<DeletionCertificate> {
        let pseudo = pseudonymize(real_id)?;

        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN TRANSACTION;")?;
        let outcome = (|| -> StoreResult<DeletionCertificate> {
            let messages =
                conn.execute("DELETE FROM messages WHERE pseudo_user_id = ?", params![pseudo])?;
            let analysis =
                conn.execute("DELETE FROM analysis WHERE pseudo_user_id = ?", params![pseudo])?;

            let cert = DeletionCertificate {
                certificate_id: Uuid::new_v4().to_string(),
                subject: pseudo.clone(),
                deleted: vec![
                    TableCount {
                        table: "messages".into(),
                        rows_deleted: messages,
                    },
                    TableCount {
                        table: "analysis".into(),
                        rows_deleted: analysis,
                    },
                ],
                issued_at: Utc::now().timestamp_micros(),
            };
            insert_certificate(&conn, &cert)?;
            Ok(cert)
        })();

        let cert = match outcome {
            Ok(cert) => {
                conn.execute_batch("COMMIT;")?;
                cert
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                return Err(e);
            }
        };
        drop(conn);

        let summary: String = cert
            .deleted
            .iter()
            .map(|tc| format!("{}={}", tc.table, tc.rows_deleted))
            .collect::<Vec<_>>()
            .join(" ");
        self.audit.record(
            "identity_erased",
            &mask_identifier(&pseudo),
            &format!("certificate={} {summary}", cert.certificate_id),
        )?;

        Ok(cert)
    }

    /// Re-encrypts rows still readable only under a legacy key.
    ///
    /// Rows that decrypt under the current key are untouched; rows that
    /// decrypt under a legacy key are rewritten under the current key; rows
    /// that decrypt under no key are left in place and logged (the fetch
    /// path skips them). Returns the number of rows migrated.
    pub fn reencrypt_legacy_rows(&self, legacy: &[DerivedKey]) -> StoreResult<usize> {
        let mut migrated = 0;
        migrated += self.reencrypt_table("messages", "message_id", legacy)?;
        migrated += self.reencrypt_table("analysis", "analysis_id", legacy)?;
        if migrated > 0 {
            self.audit.record(
                "legacy_reencryption",
                "system",
                &format!("{migrated} rows rewritten under current key"),
            )?;
        }
        Ok(migrated)
    }

    // `table` and `id_column` are compile-time constants from
    // `reencrypt_legacy_rows`, never caller input.
    fn reencrypt_table(
        &self,
        table: &str,
        id_column: &str,
        legacy: &[DerivedKey],
    ) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT pseudo_user_id, {id_column}, ciphertext_envelope FROM {table}"
        ))?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut migrated = 0;
        for (pseudo, id, wire) in &rows {
            let envelope = match Envelope::parse(wire) {
                Ok(env) => env,
                Err(_) => {
                    warn!(table, record = %mask_identifier(id), "row is not a valid envelope");
                    continue;
                }
            };
            match decrypt_with_fallback(self.keys.key(), legacy, &envelope) {
                Ok((_, KeyProvenance::Current)) => {}
                Ok((plaintext, KeyProvenance::Legacy(_))) => {
                    let rewritten = encrypt(self.keys.key(), &plaintext)?;
                    conn.execute(
                        &format!(
                            "UPDATE {table} SET ciphertext_envelope = ? \
                             WHERE pseudo_user_id = ? AND {id_column} = ?"
                        ),
                        params![rewritten.to_wire(), pseudo, id],
                    )?;
                    migrated += 1;
                }
                Err(_) => {
                    warn!(table, record = %mask_identifier(id), "row decrypts under no known key");
                }
            }
        }
        Ok(migrated)
    }

    /// The raw stored envelope for one message, if present. Exposed for
    /// at-rest inspection (operational checks, tests); the value is
    /// ciphertext wire format, never plaintext.
    pub fn stored_envelope(
        &self,
        real_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<String>> {
        let pseudo = pseudonymize(real_id)?;
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT ciphertext_envelope FROM messages \
             WHERE pseudo_user_id = ? AND message_id = ?",
            params![pseudo, message_id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(wire) => Ok(Some(wire)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Rows remaining for a user across all record tables. Zero after a
    /// successful erasure.
    pub fn rows_remaining(&self, real_id: &str) -> StoreResult<usize> {
        let pseudo = pseudonymize(real_id)?;
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM messages WHERE pseudo_user_id = ?) \
                  + (SELECT COUNT(*) FROM analysis WHERE pseudo_user_id = ?)",
            params![pseudo, pseudo],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Most recently issued deletion certificates, newest first.
    pub fn certificates(&self, limit: usize) -> StoreResult<Vec<DeletionCertificate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT certificate_id, subject, deleted_json, issued_at \
             FROM deletion_certificates ORDER BY issued_at DESC LIMIT {limit}"
        ))?;
        let rows: Vec<(String, String, String, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(conn);

        let mut certs = Vec::with_capacity(rows.len());
        for (certificate_id, subject, deleted_json, issued_at) in rows {
            let deleted: Vec<TableCount> = serde_json::from_str(&deleted_json)?;
            certs.push(DeletionCertificate {
                certificate_id,
                subject,
                deleted,
                issued_at,
            });
        }
        Ok(certs)
    }

    fn decrypt_message_row(&self, raw: &RawMessageRow) -> Option<DecryptedMessage> {
        let expected = integrity_token(&raw.pseudo_user_id, &raw.message_id, raw.created_at);
        if expected != raw.integrity_token {
            warn!(
                record = %mask_identifier(&raw.message_id),
                "integrity token mismatch, skipping row"
            );
            return None;
        }
        let content = self.decrypt_wire(&raw.envelope).or_else(|| {
            warn!(
                record = %mask_identifier(&raw.message_id),
                "skipping undecryptable message row"
            );
            None
        })?;
        let role: Role = raw.role.parse().ok()?;
        Some(DecryptedMessage {
            role,
            mode: raw.mode.clone(),
            message_type: raw.message_type.clone(),
            content,
            created_at: raw.created_at,
        })
    }

    /// Parses and decrypts one stored envelope. Anything that is not valid
    /// wire format is treated as plaintext-or-corrupt and never returned as
    /// if it decrypted.
    fn decrypt_wire(&self, wire: &str) -> Option<String> {
        let envelope = Envelope::parse(wire).ok()?;
        let plaintext = decrypt(self.keys.key(), &envelope).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

fn validate_tag(name: &str, value: &str) -> StoreResult<()> {
    if value.is_empty() || value.len() > MAX_TAG_LEN {
        return Err(StoreError::Validation(format!(
            "{name} must be 1..={MAX_TAG_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(StoreError::Validation(format!(
            "{name} contains disallowed characters"
        )));
    }
    Ok(())
}

pub(crate) fn duration_micros(d: Duration) -> i64 {
    d.as_micros() as i64
}

pub(crate) fn insert_certificate(
    conn: &Connection,
    cert: &DeletionCertificate,
) -> StoreResult<()> {
    let deleted_json = serde_json::to_string(&cert.deleted)?;
    conn.execute(
        "INSERT INTO deletion_certificates (certificate_id, subject, deleted_json, issued_at) \
         VALUES (?, ?, ?, ?)",
        params![cert.certificate_id, cert.subject, deleted_json, cert.issued_at],
    )?;
    Ok(())
}

fn initialize_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            pseudo_user_id VARCHAR NOT NULL,
            message_id VARCHAR NOT NULL,
            ciphertext_envelope TEXT NOT NULL,
            role VARCHAR NOT NULL,
            mode VARCHAR NOT NULL,
            message_type VARCHAR NOT NULL,
            created_at BIGINT NOT NULL,
            retention_deadline BIGINT NOT NULL,
            integrity_token VARCHAR NOT NULL,
            PRIMARY KEY (pseudo_user_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_deadline ON messages(retention_deadline);
        CREATE INDEX IF NOT EXISTS idx_messages_mode ON messages(mode);

        CREATE TABLE IF NOT EXISTS analysis (
            pseudo_user_id VARCHAR NOT NULL,
            analysis_id VARCHAR NOT NULL,
            analysis_type VARCHAR NOT NULL,
            ciphertext_envelope TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            retention_deadline BIGINT NOT NULL,
            PRIMARY KEY (pseudo_user_id, analysis_id)
        );
        CREATE INDEX IF NOT EXISTS idx_analysis_deadline ON analysis(retention_deadline);

        CREATE TABLE IF NOT EXISTS deletion_certificates (
            certificate_id VARCHAR PRIMARY KEY,
            subject VARCHAR NOT NULL,
            deleted_json TEXT NOT NULL,
            issued_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convault_crypto::KdfParams;

    fn fast_config() -> StoreConfig {
        StoreConfig {
            secret: "inline-test-secret-0123456789".into(),
            kdf_iterations: 1_000,
            ..StoreConfig::default()
        }
    }

    fn open_with_secret(secret: &str) -> (ConversationStore, KeyManager) {
        let cfg = StoreConfig {
            secret: secret.into(),
            ..fast_config()
        };
        let keys = cfg.key_manager().unwrap();
        let store = ConversationStore::open_in_memory(cfg.key_manager().unwrap(), &cfg).unwrap();
        (store, keys)
    }

    #[test]
    fn corrupt_envelope_is_skipped_not_fatal() {
        let (store, _) = open_with_secret("inline-test-secret-0123456789");
        store
            .store("U1", "m1", Role::User, "general", "text", "first")
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store
            .store("U1", "m2", Role::User, "general", "text", "second")
            .unwrap();

        // Corrupt one row directly.
        let pseudo = pseudonymize("U1").unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE messages SET ciphertext_envelope = 'not:an:envelope' \
                 WHERE pseudo_user_id = ? AND message_id = 'm1'",
                params![pseudo],
            )
            .unwrap();
        }

        let messages = store.fetch("U1", 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "second");
    }

    #[test]
    fn tampered_created_at_fails_integrity_check() {
        let (store, _) = open_with_secret("inline-test-secret-0123456789");
        store
            .store("U1", "m1", Role::User, "general", "text", "hello")
            .unwrap();

        let pseudo = pseudonymize("U1").unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE messages SET created_at = created_at + 1 WHERE pseudo_user_id = ?",
                params![pseudo],
            )
            .unwrap();
        }

        assert!(store.fetch("U1", 10).unwrap().is_empty());
    }

    #[test]
    fn legacy_rows_are_migrated_to_current_key() {
        let (store, _) = open_with_secret("inline-test-secret-0123456789");
        let legacy = KeyManager::from_secret(
            "legacy-operator-secret-000001",
            &KdfParams { iterations: 1_000 },
        )
        .unwrap();

        store
            .store("U1", "m1", Role::User, "general", "text", "placeholder")
            .unwrap();

        // Rewrite the row as if it had been written under the legacy key.
        let legacy_wire = encrypt(legacy.key(), b"written long ago").unwrap().to_wire();
        let pseudo = pseudonymize("U1").unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE messages SET ciphertext_envelope = ? WHERE pseudo_user_id = ?",
                params![legacy_wire, pseudo],
            )
            .unwrap();
        }

        // Unreadable under the current key alone.
        assert!(store.fetch("U1", 10).unwrap().is_empty());

        let migrated = store
            .reencrypt_legacy_rows(std::slice::from_ref(legacy.key()))
            .unwrap();
        assert_eq!(migrated, 1);

        let messages = store.fetch("U1", 10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "written long ago");

        // Second pass finds nothing left to migrate.
        assert_eq!(
            store
                .reencrypt_legacy_rows(std::slice::from_ref(legacy.key()))
                .unwrap(),
            0
        );
    }
}
