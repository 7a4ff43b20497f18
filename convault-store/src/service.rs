//! Async facade over the blocking store.
//!
//! DuckDB work runs on tokio's blocking pool; each operation carries a
//! deadline from [`StoreConfig::op_timeout`]. A timed-out operation returns
//! [`StoreError::Timeout`] without partial effects (single-statement writes
//! are atomic, deletes are transactional), so callers can retry safely.

use crate::config::StoreConfig;
use crate::conversation_store::{
    ConversationStore, DecryptedAnalysis, DecryptedMessage, DeletionCertificate, Role,
    StoredRecord,
};
use crate::erasure::ErasureService;
use crate::error::{StoreError, StoreResult};
use crate::retention::{RetentionSweeper, SweepSummary};
use std::time::Duration;

/// Async entry point for conversation persistence.
#[derive(Clone)]
pub struct ConversationService {
    store: ConversationStore,
    erasure: ErasureService,
    sweeper: RetentionSweeper,
    op_timeout: Duration,
}

impl ConversationService {
    pub fn new(store: ConversationStore, config: &StoreConfig) -> Self {
        Self {
            erasure: ErasureService::new(store.clone()),
            sweeper: RetentionSweeper::new(store.clone()),
            store,
            op_timeout: config.op_timeout,
        }
    }

    /// The underlying blocking store, for wiring schedulers and tests.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The sweeper this service uses for [`run_retention_sweep`](Self::run_retention_sweep).
    pub fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }

    /// Stores one conversational turn. `role` is the wire-level string
    /// (`"user"` or `"assistant"`); anything else is a validation error.
    pub async fn store_message(
        &self,
        real_id: &str,
        message_id: &str,
        role: &str,
        mode: &str,
        message_type: &str,
        content: &str,
    ) -> StoreResult<StoredRecord> {
        let role: Role = role.parse()?;
        let store = self.store.clone();
        let (real_id, message_id, mode, message_type, content) = (
            real_id.to_string(),
            message_id.to_string(),
            mode.to_string(),
            message_type.to_string(),
            content.to_string(),
        );
        self.run_blocking("store_message", move || {
            store.store(&real_id, &message_id, role, &mode, &message_type, &content)
        })
        .await
    }

    pub async fn fetch_history(
        &self,
        real_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<DecryptedMessage>> {
        let store = self.store.clone();
        let real_id = real_id.to_string();
        self.run_blocking("fetch_history", move || store.fetch(&real_id, limit))
            .await
    }

    pub async fn store_analysis(
        &self,
        real_id: &str,
        analysis_type: &str,
        content: &str,
    ) -> StoreResult<StoredRecord> {
        let store = self.store.clone();
        let (real_id, analysis_type, content) = (
            real_id.to_string(),
            analysis_type.to_string(),
            content.to_string(),
        );
        self.run_blocking("store_analysis", move || {
            store.store_analysis(&real_id, &analysis_type, &content)
        })
        .await
    }

    pub async fn fetch_analysis(
        &self,
        real_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<DecryptedAnalysis>> {
        let store = self.store.clone();
        let real_id = real_id.to_string();
        self.run_blocking("fetch_analysis", move || store.fetch_analysis(&real_id, limit))
            .await
    }

    /// Erases one user's records and returns the verified certificate.
    pub async fn erase_identity(&self, real_id: &str) -> StoreResult<DeletionCertificate> {
        let erasure = self.erasure.clone();
        let real_id = real_id.to_string();
        self.run_blocking("erase_identity", move || erasure.erase(&real_id))
            .await
    }

    /// Runs a retention sweep immediately.
    pub async fn run_retention_sweep(&self) -> StoreResult<SweepSummary> {
        let sweeper = self.sweeper.clone();
        self.run_blocking("retention_sweep", move || sweeper.sweep())
            .await
    }

    async fn run_blocking<T: Send + 'static>(
        &self,
        op: &'static str,
        f: impl FnOnce() -> StoreResult<T> + Send + 'static,
    ) -> StoreResult<T> {
        let task = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(self.op_timeout, task).await {
            Err(_) => Err(StoreError::Timeout(op)),
            Ok(Err(join_err)) => Err(StoreError::Internal(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}
