//! # Ledger Outbox Repository
//!
//! Durable queue for journal postings that failed when the cash transaction
//! was written.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Cash operation commits                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  LedgerGateway::post_best_effort(entry)                                │
//! │       │                                                                 │
//! │       ├── Ok  ───────────────► nothing stored                          │
//! │       │                                                                 │
//! │       └── Err ───────────────► enqueue(entry, error)                   │
//! │                                 attempts = 1, posted_at = NULL          │
//! │                                                                         │
//! │  LedgerRetryProcessor (interval)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  get_pending(limit, max_attempts)  oldest first                        │
//! │       │                                                                 │
//! │       ├── Ok  ───────────────► mark_posted(id)                         │
//! │       └── Err ───────────────► mark_failed(id, error)  attempts += 1   │
//! │                                                                         │
//! │  Rows with attempts >= max_attempts are dead letters: they stay in     │
//! │  the table for an operator and are never picked up again.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `cash_transaction_id` is unique, so the same posting is never queued
//! twice.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DbResult;
use tally_core::{JournalEntry, LedgerOutboxEntry};

const OUTBOX_COLUMNS: &str = r#"
    id, tenant_id, cash_transaction_id, transaction_type, payload,
    attempts, last_error, created_at, attempted_at, posted_at
"#;

/// Repository for ledger outbox operations.
#[derive(Debug, Clone)]
pub struct LedgerOutboxRepository {
    pool: SqlitePool,
}

impl LedgerOutboxRepository {
    /// Creates a new LedgerOutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerOutboxRepository { pool }
    }

    /// Queues a journal entry whose first posting attempt failed.
    ///
    /// Returns `false` when the transaction was already queued.
    pub async fn enqueue(
        &self,
        entry: &JournalEntry,
        error: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let payload = serde_json::to_string(entry)?;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_outbox (
                id, tenant_id, cash_transaction_id, transaction_type, payload,
                attempts, last_error, created_at, attempted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?7)
            ON CONFLICT (cash_transaction_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.tenant_id)
        .bind(&entry.transaction_id)
        .bind(entry.transaction_type)
        .bind(payload)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let queued = result.rows_affected() == 1;
        if queued {
            warn!(
                transaction_id = %entry.transaction_id,
                error = %error,
                "Ledger posting queued for retry"
            );
        }
        Ok(queued)
    }

    /// Unposted entries still under the attempt limit, oldest first.
    pub async fn get_pending(
        &self,
        tenant_id: &str,
        limit: u32,
        max_attempts: u32,
    ) -> DbResult<Vec<LedgerOutboxEntry>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM ledger_outbox
             WHERE tenant_id = ?1 AND posted_at IS NULL AND attempts < ?2
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?3"
        );
        let entries = sqlx::query_as::<_, LedgerOutboxEntry>(&sql)
            .bind(tenant_id)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Marks an entry as posted.
    pub async fn mark_posted(&self, id: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE ledger_outbox SET
                posted_at = ?2,
                attempted_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(outbox_id = %id, "Ledger posting delivered");
        Ok(())
    }

    /// Records another failed attempt.
    pub async fn mark_failed(&self, id: &str, error: &str, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE ledger_outbox SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts entries the retry processor will still pick up.
    pub async fn count_pending(&self, tenant_id: &str, max_attempts: u32) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_outbox
             WHERE tenant_id = ?1 AND posted_at IS NULL AND attempts < ?2",
        )
        .bind(tenant_id)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts entries that exhausted their attempts.
    pub async fn count_dead_letters(&self, tenant_id: &str, max_attempts: u32) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_outbox
             WHERE tenant_id = ?1 AND posted_at IS NULL AND attempts >= ?2",
        )
        .bind(tenant_id)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{at, db, TENANT};
    use tally_core::{CashTransactionType, Money};

    fn entry(id: &str) -> JournalEntry {
        JournalEntry {
            transaction_id: id.to_string(),
            tenant_id: TENANT.to_string(),
            transaction_type: CashTransactionType::SalePayment,
            amount: Money::from_cents(1_250),
            description: None,
            reference_type: Some("sale".to_string()),
            reference_id: Some("sale-1".to_string()),
            performed_by: "user-a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let db = db().await;
        let outbox = db.ledger_outbox();

        assert!(outbox.enqueue(&entry("tx-1"), "timeout", at(0)).await.unwrap());
        assert!(!outbox.enqueue(&entry("tx-1"), "timeout", at(1)).await.unwrap());

        let pending = outbox.get_pending(TENANT, 10, 5).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));

        let payload: JournalEntry = serde_json::from_str(&pending[0].payload).unwrap();
        assert_eq!(payload, entry("tx-1"));
    }

    #[tokio::test]
    async fn test_posted_entries_leave_the_queue() {
        let db = db().await;
        let outbox = db.ledger_outbox();
        outbox.enqueue(&entry("tx-1"), "timeout", at(0)).await.unwrap();
        outbox.enqueue(&entry("tx-2"), "timeout", at(1)).await.unwrap();

        let pending = outbox.get_pending(TENANT, 10, 5).await.unwrap();
        assert_eq!(pending[0].cash_transaction_id, "tx-1");
        outbox.mark_posted(&pending[0].id, at(2)).await.unwrap();

        assert_eq!(outbox.count_pending(TENANT, 5).await.unwrap(), 1);
        assert_eq!(outbox.count_pending("tenant-2", 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failures_become_dead_letters() {
        let db = db().await;
        let outbox = db.ledger_outbox();
        outbox.enqueue(&entry("tx-1"), "timeout", at(0)).await.unwrap();

        let id = outbox.get_pending(TENANT, 10, 3).await.unwrap()[0].id.clone();
        outbox.mark_failed(&id, "refused", at(1)).await.unwrap();
        assert_eq!(outbox.count_pending(TENANT, 3).await.unwrap(), 1);

        outbox.mark_failed(&id, "refused", at(2)).await.unwrap();
        assert_eq!(outbox.count_pending(TENANT, 3).await.unwrap(), 0);
        assert_eq!(outbox.count_dead_letters(TENANT, 3).await.unwrap(), 1);
        assert!(outbox.get_pending(TENANT, 10, 3).await.unwrap().is_empty());
    }
}
