//! Scheduled retention enforcement.
//!
//! A [`RetentionSweeper`] deletes rows whose retention deadline has passed,
//! in bounded batches so a backlog never holds the connection lock for one
//! long transaction. A [`RetentionScheduler`] runs the sweeper on a fixed
//! interval inside a tokio task and exposes a handle for manual sweeps and
//! shutdown.

use crate::conversation_store::{insert_certificate, ConversationStore, DeletionCertificate, TableCount};
use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use duckdb::{params, Connection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows deleted per batch during a sweep.
const SWEEP_BATCH_SIZE: usize = 500;

/// Whether a sweep is currently running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Sweeping,
}

/// Outcome of one completed sweep.
#[derive(Clone, Debug, Default)]
pub struct SweepSummary {
    pub messages_deleted: usize,
    pub analysis_deleted: usize,
    pub batches: usize,
    /// Set when at least one row was deleted and a certificate was issued.
    pub certificate_id: Option<String>,
}

impl SweepSummary {
    pub fn total_deleted(&self) -> usize {
        self.messages_deleted + self.analysis_deleted
    }
}

/// Deletes expired rows in batches and certifies the result.
#[derive(Clone)]
pub struct RetentionSweeper {
    store: ConversationStore,
    conn: Arc<Mutex<Connection>>,
    sweeping: Arc<AtomicBool>,
}

impl RetentionSweeper {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            conn: store.connection(),
            store,
            sweeping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SweepState {
        if self.sweeping.load(Ordering::SeqCst) {
            SweepState::Sweeping
        } else {
            SweepState::Idle
        }
    }

    /// Runs one full sweep over both record tables.
    ///
    /// Concurrent sweeps are collapsed: if one is already running, this call
    /// returns an empty summary instead of doubling up on the same rows. A
    /// sweep that deletes nothing issues no certificate.
    pub fn sweep(&self) -> StoreResult<SweepSummary> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sweep already in progress, skipping");
            return Ok(SweepSummary::default());
        }

        let result = self.sweep_inner();
        self.sweeping.store(false, Ordering::SeqCst);
        result
    }

    fn sweep_inner(&self) -> StoreResult<SweepSummary> {
        let cutoff = Utc::now().timestamp_micros();
        let mut summary = SweepSummary::default();

        summary.messages_deleted =
            self.sweep_table("messages", "message_id", cutoff, &mut summary.batches)?;
        summary.analysis_deleted =
            self.sweep_table("analysis", "analysis_id", cutoff, &mut summary.batches)?;

        if summary.total_deleted() > 0 {
            let cert = DeletionCertificate {
                certificate_id: Uuid::new_v4().to_string(),
                subject: format!("retention-sweep-{cutoff}"),
                deleted: vec![
                    TableCount {
                        table: "messages".into(),
                        rows_deleted: summary.messages_deleted,
                    },
                    TableCount {
                        table: "analysis".into(),
                        rows_deleted: summary.analysis_deleted,
                    },
                ],
                issued_at: Utc::now().timestamp_micros(),
            };
            {
                let conn = self.conn.lock().unwrap();
                insert_certificate(&conn, &cert)?;
            }
            summary.certificate_id = Some(cert.certificate_id);
            info!(
                deleted = summary.total_deleted(),
                batches = summary.batches,
                "retention sweep complete"
            );
        } else {
            debug!("retention sweep found nothing expired");
        }

        Ok(summary)
    }

    // `table` and `id_column` are fixed strings from `sweep_inner`, never
    // caller input. DuckDB has no DELETE .. LIMIT, so each batch selects
    // expired keys and deletes them through an IN clause.
    fn sweep_table(
        &self,
        table: &str,
        id_column: &str,
        cutoff: i64,
        batches: &mut usize,
    ) -> StoreResult<usize> {
        let mut deleted = 0;
        loop {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT pseudo_user_id, {id_column} FROM {table} \
                 WHERE retention_deadline <= ? LIMIT {SWEEP_BATCH_SIZE}"
            ))?;
            let keys: Vec<(String, String)> = stmt
                .query_map(params![cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);

            if keys.is_empty() {
                drop(conn);
                break;
            }

            let predicates: Vec<String> = keys
                .iter()
                .map(|(pseudo, id)| {
                    format!(
                        "(pseudo_user_id = '{}' AND {id_column} = '{}')",
                        pseudo.replace('\'', "''"),
                        id.replace('\'', "''"),
                    )
                })
                .collect();
            let affected = conn.execute(
                &format!("DELETE FROM {table} WHERE {}", predicates.join(" OR ")),
                [],
            )?;
            drop(conn);

            deleted += affected;
            *batches += 1;
            self.store.audit().record(
                "scheduled_deletion",
                "system",
                &format!("table={table} rows={affected}"),
            )?;

            if keys.len() < SWEEP_BATCH_SIZE {
                break;
            }
        }
        Ok(deleted)
    }
}

enum SchedulerCommand {
    SweepNow,
    Stop,
}

/// Handle to a running [`RetentionScheduler`]. Cloneable; dropping all
/// handles stops the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Triggers an immediate sweep outside the regular interval.
    pub async fn sweep_now(&self) -> StoreResult<()> {
        self.tx
            .send(SchedulerCommand::SweepNow)
            .await
            .map_err(|_| StoreError::Internal("retention scheduler is gone".into()))
    }

    /// Asks the scheduler to shut down after any in-flight sweep.
    pub async fn stop(&self) -> StoreResult<()> {
        self.tx
            .send(SchedulerCommand::Stop)
            .await
            .map_err(|_| StoreError::Internal("retention scheduler is gone".into()))
    }
}

/// Periodic driver for a [`RetentionSweeper`].
pub struct RetentionScheduler {
    sweeper: RetentionSweeper,
    interval: Duration,
    rx: mpsc::Receiver<SchedulerCommand>,
}

/// Builds a scheduler and its control handle. Call
/// [`RetentionScheduler::run`] inside a tokio task to start it.
pub fn create_retention_scheduler(
    sweeper: RetentionSweeper,
    interval: Duration,
) -> (RetentionScheduler, SchedulerHandle) {
    let (tx, rx) = mpsc::channel(8);
    (
        RetentionScheduler {
            sweeper,
            interval,
            rx,
        },
        SchedulerHandle { tx },
    )
}

impl RetentionScheduler {
    /// Runs until [`SchedulerHandle::stop`] is called or every handle is
    /// dropped. Sweeps execute on the blocking pool so the runtime's async
    /// workers never sit behind the connection lock.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup does not
        // always begin with a sweep.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "retention scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Self::run_sweep(self.sweeper.clone()).await;
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::SweepNow) => {
                            Self::run_sweep(self.sweeper.clone()).await;
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            info!("retention scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn run_sweep(sweeper: RetentionSweeper) {
        let result = tokio::task::spawn_blocking(move || sweeper.sweep()).await;
        match result {
            Ok(Ok(summary)) if summary.total_deleted() > 0 => {
                debug!(deleted = summary.total_deleted(), "scheduled sweep finished");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "scheduled sweep failed"),
            Err(e) => error!(error = %e, "sweep task panicked"),
        }
    }
}
