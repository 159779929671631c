//! # Ledger Posting
//!
//! Every cash transaction is mirrored into the accounting ledger as a
//! journal entry. Posting is a secondary effect: the cash write has already
//! committed, so a ledger failure must never fail the cash operation.
//!
//! ## Best-Effort Posting with Retry
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CashTransaction committed                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerGateway::post_best_effort(&tx)                                  │
//! │       │                                                                 │
//! │       ├── poster Ok ────────────► Posted                               │
//! │       ├── poster Err ─► outbox ─► Queued     (warn!)                   │
//! │       └── outbox Err ───────────► Lost       (error!)                  │
//! │                                                                         │
//! │  LedgerRetryProcessor (background task)                                │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  every retry_interval:                                          │   │
//! │  │    get_pending(batch_size, max_attempts)                        │   │
//! │  │    for each: decode payload → post → mark_posted / mark_failed  │   │
//! │  │  on shutdown: stop                                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{CashTransaction, JournalEntry};
use tally_db::{Database, LedgerOutboxRepository};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::LedgerSettings;
use crate::error::{EngineError, EngineResult};

// =============================================================================
// Poster Contract
// =============================================================================

/// Failure reported by a ledger poster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger could not be reached. Retrying may help.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the entry.
    #[error("Ledger rejected entry: {0}")]
    Rejected(String),
}

/// Posts journal entries to the accounting ledger.
///
/// Implementations must be idempotent per `transaction_id`: the retry
/// processor may deliver an entry more than once.
#[async_trait]
pub trait LedgerPoster: Send + Sync {
    async fn post_journal_entry(&self, entry: &JournalEntry) -> Result<(), LedgerError>;
}

/// Accepts every entry without posting it anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLedgerPoster;

#[async_trait]
impl LedgerPoster for NoOpLedgerPoster {
    async fn post_journal_entry(&self, entry: &JournalEntry) -> Result<(), LedgerError> {
        debug!(transaction_id = %entry.transaction_id, "Ledger posting skipped");
        Ok(())
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// What happened to a best-effort posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingOutcome {
    Posted,
    /// Posting failed; the entry waits in the outbox.
    Queued,
    /// Posting failed and the outbox write failed too.
    Lost,
}

/// Posts cash transactions to the ledger without ever failing the caller.
#[derive(Clone)]
pub struct LedgerGateway {
    poster: Arc<dyn LedgerPoster>,
    outbox: LedgerOutboxRepository,
    clock: Arc<dyn Clock>,
}

impl LedgerGateway {
    pub fn new(db: &Database, poster: Arc<dyn LedgerPoster>, clock: Arc<dyn Clock>) -> Self {
        LedgerGateway {
            poster,
            outbox: db.ledger_outbox(),
            clock,
        }
    }

    /// Posts the journal entry for `tx`; failures are logged and queued.
    pub async fn post_best_effort(&self, tx: &CashTransaction) -> PostingOutcome {
        let entry = JournalEntry::from(tx);

        let err = match self.poster.post_journal_entry(&entry).await {
            Ok(()) => {
                debug!(
                    transaction_id = %entry.transaction_id,
                    transaction_type = %entry.transaction_type,
                    "Journal entry posted"
                );
                return PostingOutcome::Posted;
            }
            Err(err) => err,
        };

        warn!(
            transaction_id = %entry.transaction_id,
            transaction_type = %entry.transaction_type,
            error = %err,
            "Ledger posting failed, queuing for retry"
        );

        match self.outbox.enqueue(&entry, &err.to_string(), self.clock.now()).await {
            Ok(_) => PostingOutcome::Queued,
            Err(db_err) => {
                error!(
                    transaction_id = %entry.transaction_id,
                    error = %db_err,
                    "Could not queue ledger posting"
                );
                PostingOutcome::Lost
            }
        }
    }

    /// Posts every transaction in order.
    pub async fn post_all(&self, txs: &[CashTransaction]) -> Vec<PostingOutcome> {
        let mut outcomes = Vec::with_capacity(txs.len());
        for tx in txs {
            outcomes.push(self.post_best_effort(tx).await);
        }
        outcomes
    }
}

// =============================================================================
// Retry Processor
// =============================================================================

/// Counts from one drain of the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub posted: usize,
    pub failed: usize,
    /// Failures that used up the last attempt.
    pub dead_lettered: usize,
}

/// Drains the ledger outbox on an interval.
pub struct LedgerRetryProcessor {
    tenant_id: String,
    outbox: LedgerOutboxRepository,
    poster: Arc<dyn LedgerPoster>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the retry processor.
#[derive(Clone)]
pub struct LedgerRetryHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl LedgerRetryHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Shutdown channel closed".into()))
    }
}

impl LedgerRetryProcessor {
    /// Creates a new processor and returns a handle.
    pub fn new(
        tenant_id: impl Into<String>,
        db: &Database,
        poster: Arc<dyn LedgerPoster>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> (Self, LedgerRetryHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = LedgerRetryProcessor {
            tenant_id: tenant_id.into(),
            outbox: db.ledger_outbox(),
            poster,
            clock,
            settings,
            shutdown_rx,
        };

        (processor, LedgerRetryHandle { shutdown_tx })
    }

    /// Runs the retry loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!(tenant_id = %self.tenant_id, "Ledger retry processor starting");

        let mut interval = tokio::time::interval(self.settings.retry_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.process_batch().await {
                        error!(?e, "Failed to process ledger outbox batch");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Ledger retry processor shutting down");
                    break;
                }
            }
        }

        info!("Ledger retry processor stopped");
    }

    /// Posts one batch of pending outbox entries.
    pub async fn process_batch(&self) -> EngineResult<RetryReport> {
        let entries = self
            .outbox
            .get_pending(&self.tenant_id, self.settings.batch_size, self.settings.max_attempts)
            .await?;

        if entries.is_empty() {
            debug!("No pending ledger postings");
            return Ok(RetryReport::default());
        }

        let mut report = RetryReport::default();
        for entry in entries {
            let result = match serde_json::from_str::<JournalEntry>(&entry.payload) {
                Ok(journal) => self.poster.post_journal_entry(&journal).await,
                Err(e) => Err(LedgerError::Rejected(format!("Unreadable payload: {e}"))),
            };

            let now = self.clock.now();
            match result {
                Ok(()) => {
                    self.outbox.mark_posted(&entry.id, now).await?;
                    report.posted += 1;
                }
                Err(err) => {
                    self.outbox.mark_failed(&entry.id, &err.to_string(), now).await?;
                    report.failed += 1;

                    if entry.attempts + 1 >= i64::from(self.settings.max_attempts) {
                        report.dead_lettered += 1;
                        error!(
                            outbox_id = %entry.id,
                            transaction_id = %entry.cash_transaction_id,
                            attempts = entry.attempts + 1,
                            error = %err,
                            "Ledger posting abandoned after max attempts"
                        );
                    }
                }
            }
        }

        info!(
            posted = report.posted,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            "Ledger outbox batch processed"
        );
        Ok(report)
    }
}

// =============================================================================
// Test Support
// =============================================================================


// =============================================================================
// Unit Tests
// =============================================================================
