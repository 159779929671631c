//! # Cash Transaction Repository
//!
//! The append-only audit trail, plus the atomic increment every manual
//! balance movement goes through.
//!
//! ## Atomic Increment
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Read-modify-write (lost update):                                      │
//! │                                                                         │
//! │    A: read 100          B: read 100                                    │
//! │    A: write 100 + 50    B: write 100 − 20     → 80, A's +50 is lost    │
//! │                                                                         │
//! │  Atomic increment (this module):                                       │
//! │                                                                         │
//! │    BEGIN                                                               │
//! │      UPDATE cash_drawers                                               │
//! │         SET current_balance = current_balance + ?                      │
//! │       WHERE id = ? AND status = 'open'                                 │
//! │      RETURNING current_balance          → balance_after               │
//! │      INSERT INTO cash_transactions (..., balance_after)                │
//! │    COMMIT                                                              │
//! │                                                                         │
//! │  Writers serialize on the UPDATE; each sees the other's result.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no update or delete path for transactions.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::drawer::explain_guard_miss;
use tally_core::{CashTransaction, DrawerStatus, Money, NewCashTransaction};

const TRANSACTION_COLUMNS: &str = r#"
    id, tenant_id, cash_drawer_id, transaction_type, amount, balance_after,
    reference_type, reference_id, description, performed_by, transaction_date
"#;

/// Repository for cash transaction operations.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Applies `new.amount` to an open drawer and records the transaction.
    ///
    /// Both writes happen in one SQL transaction whose first statement is
    /// the increment, so concurrent calls never lose an update and every
    /// `balance_after` is the running total at that point.
    ///
    /// ## Errors
    /// * `DbError::Domain(InvalidDrawerStatus)` - drawer is not open
    /// * `DbError::NotFound` - no such active drawer in the tenant
    pub async fn record(
        &self,
        tenant_id: &str,
        drawer_id: &str,
        new: &NewCashTransaction,
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<CashTransaction> {
        let mut tx = self.pool.begin().await?;

        let balance_after: Option<Money> = sqlx::query_scalar(
            r#"
            UPDATE cash_drawers SET
                current_balance = current_balance + ?1,
                updated_at = ?2
            WHERE id = ?3 AND tenant_id = ?4 AND is_active = 1 AND status = 'open'
            RETURNING current_balance
            "#,
        )
        .bind(new.amount)
        .bind(now)
        .bind(drawer_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?;

        let balance_after = match balance_after {
            Some(balance) => balance,
            None => {
                return Err(
                    explain_guard_miss(&mut tx, tenant_id, drawer_id, DrawerStatus::Open).await,
                )
            }
        };

        let row = CashTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            cash_drawer_id: drawer_id.to_string(),
            transaction_type: new.transaction_type,
            amount: new.amount,
            balance_after,
            reference_type: new.reference_type.clone(),
            reference_id: new.reference_id.clone(),
            description: new.description.clone(),
            performed_by: performed_by.to_string(),
            transaction_date: now,
        };
        insert_transaction(&mut tx, &row).await?;
        tx.commit().await?;

        debug!(
            drawer_id = %drawer_id,
            transaction_type = %row.transaction_type,
            amount = %row.amount,
            balance_after = %row.balance_after,
            "Cash transaction recorded"
        );
        Ok(row)
    }

    /// Lists a drawer's most recent transactions, newest first.
    pub async fn list_for_drawer(
        &self,
        tenant_id: &str,
        drawer_id: &str,
        limit: u32,
    ) -> DbResult<Vec<CashTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM cash_transactions
             WHERE tenant_id = ?1 AND cash_drawer_id = ?2
             ORDER BY transaction_date DESC, rowid DESC
             LIMIT ?3"
        );
        let rows = sqlx::query_as::<_, CashTransaction>(&sql)
            .bind(tenant_id)
            .bind(drawer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Gets a transaction by ID.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<CashTransaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM cash_transactions WHERE id = ?1 AND tenant_id = ?2"
        );
        let row = sqlx::query_as::<_, CashTransaction>(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }
}

/// Inserts one audit row on the caller's connection.
///
/// Only called from inside the transactions that also moved the balance.
pub(crate) async fn insert_transaction(
    conn: &mut SqliteConnection,
    row: &CashTransaction,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO cash_transactions (
            id, tenant_id, cash_drawer_id, transaction_type, amount, balance_after,
            reference_type, reference_id, description, performed_by, transaction_date
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&row.id)
    .bind(&row.tenant_id)
    .bind(&row.cash_drawer_id)
    .bind(row.transaction_type)
    .bind(row.amount)
    .bind(row.balance_after)
    .bind(&row.reference_type)
    .bind(&row.reference_id)
    .bind(&row.description)
    .bind(&row.performed_by)
    .bind(row.transaction_date)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};
    use crate::repository::test_support::{at, db, open_drawer, TENANT};
    use tally_core::{CashTransactionType, CoreError};

    #[tokio::test]
    async fn test_balance_after_is_running_total() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 10_000).await;

        let amounts = [5_000, -1_250, 300, -8_000, 42];
        let mut expected = 10_000;
        for (i, cents) in amounts.iter().enumerate() {
            let new = NewCashTransaction::new(CashTransactionType::Adjustment, Money::from_cents(*cents));
            let row = db
                .transactions()
                .record(TENANT, &drawer.id, &new, "user-a", at(10 + i as i64))
                .await
                .unwrap();
            expected += cents;
            assert_eq!(row.balance_after, Money::from_cents(expected));
        }

        let current = db.drawers().get(TENANT, &drawer.id).await.unwrap().unwrap();
        assert_eq!(current.current_balance, Money::from_cents(10_000 + amounts.iter().sum::<i64>()));
    }

    #[tokio::test]
    async fn test_record_requires_open_drawer() {
        let db = db().await;
        let drawer = db
            .drawers()
            .insert(TENANT, "user-a", "Closed", None, at(0))
            .await
            .unwrap();

        let new = NewCashTransaction::new(CashTransactionType::SalePayment, Money::from_cents(100));
        let err = db
            .transactions()
            .record(TENANT, &drawer.id, &new, "user-a", at(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidDrawerStatus { .. })
        ));

        let rows = db
            .transactions()
            .list_for_drawer(TENANT, &drawer.id, 50)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_record_is_tenant_scoped() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 0).await;

        let new = NewCashTransaction::new(CashTransactionType::SalePayment, Money::from_cents(100));
        let err = db
            .transactions()
            .record("tenant-2", &drawer.id, &new, "user-a", at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 0).await;
        for i in 0..5 {
            let new = NewCashTransaction::new(CashTransactionType::SalePayment, Money::from_cents(100))
                .with_reference("sale", format!("sale-{i}"));
            db.transactions()
                .record(TENANT, &drawer.id, &new, "user-a", at(10 + i))
                .await
                .unwrap();
        }

        let rows = db
            .transactions()
            .list_for_drawer(TENANT, &drawer.id, 3)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].reference_id.as_deref(), Some("sale-4"));
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("tally.db")).max_connections(8))
            .await
            .unwrap();
        let drawer = open_drawer(&db, "user-a", 0).await;

        let mut handles = Vec::new();
        for i in 0..40i64 {
            let repo = db.transactions();
            let drawer_id = drawer.id.clone();
            handles.push(tokio::spawn(async move {
                let cents = if i % 4 == 0 { -50 } else { 100 };
                let new = NewCashTransaction::new(CashTransactionType::Adjustment, Money::from_cents(cents));
                repo.record(TENANT, &drawer_id, &new, "user-a", at(100 + i))
                    .await
                    .unwrap()
            }));
        }
        let mut balances = Vec::new();
        for handle in handles {
            balances.push(handle.await.unwrap().balance_after.cents());
        }

        let expected: i64 = (0..40i64).map(|i| if i % 4 == 0 { -50 } else { 100 }).sum();
        let current = db.drawers().get(TENANT, &drawer.id).await.unwrap().unwrap();
        assert_eq!(current.current_balance.cents(), expected);

        // The last writer to commit saw the final total
        assert!(balances.contains(&expected));
    }
}
