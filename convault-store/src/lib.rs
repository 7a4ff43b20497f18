//! Convault store: encrypted, pseudonymized conversation persistence.
//!
//! Layers, bottom up:
//!
//! - [`ConversationStore`]: DuckDB-backed record store. Content is
//!   AEAD-encrypted before it touches SQL, users exist only as SHA-256
//!   pseudonyms, and reads are widened across a same-mode cohort.
//! - [`AuditLog`]: append-only trail with masked actors and noised counts.
//! - [`RetentionSweeper`] / [`RetentionScheduler`]: scheduled deletion of
//!   expired rows, certified when anything was removed.
//! - [`ErasureService`]: on-demand whole-identity deletion with a verified
//!   [`DeletionCertificate`].
//! - [`ConversationService`]: async facade with per-operation deadlines.
//!
//! Configuration comes from the environment via [`StoreConfig::from_env`].

mod audit;
mod config;
mod conversation_store;
mod erasure;
mod error;
mod retention;
mod service;

pub use audit::{mask_identifier, noised_count, AuditEntry, AuditLog};
pub use config::StoreConfig;
pub use conversation_store::{
    CohortStats, ConversationStore, DecryptedAnalysis, DecryptedMessage, DeletionCertificate,
    Role, StoredRecord, TableCount,
};
pub use erasure::ErasureService;
pub use error::{StoreError, StoreResult};
pub use retention::{
    create_retention_scheduler, RetentionScheduler, RetentionSweeper, SchedulerHandle,
    SweepState, SweepSummary,
};
pub use service::ConversationService;

/// Open a DuckDB database, recovering from a stale WAL left by an unclean
/// shutdown by removing it and retrying once.
pub(crate) fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StoreResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::warn!(
                    wal = %wal_path.display(),
                    "DuckDB open failed, removing stale WAL and retrying"
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
    ))?;
    Ok(())
}
