//! # Cash Transfer Repository
//!
//! Drawer to drawer transfer requests and the atomic procedure that answers
//! them.
//!
//! ## process_transfer_request
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  1. UPDATE cash_transfer_requests SET status = ?, responded_at = ?     │
//! │       WHERE id = ? AND status = 'pending'          ← no row: stop      │
//! │                                                                         │
//! │  rejected ──► COMMIT                                                   │
//! │                                                                         │
//! │  approved:                                                             │
//! │  2. UPDATE cash_drawers SET current_balance = current_balance − amt    │
//! │       WHERE id = from AND status = 'open'                              │
//! │         AND current_balance >= amt                 ← no row: ROLLBACK  │
//! │  3. UPDATE cash_drawers SET current_balance = current_balance + amt    │
//! │       WHERE id = to AND status = 'open'            ← no row: ROLLBACK  │
//! │  4. INSERT transfer_out (−amt, balance_after = source after debit)     │
//! │  5. INSERT transfer_in  (+amt, balance_after = dest after credit)      │
//! │  COMMIT                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A rollback at step 2 or 3 leaves the request pending, so it can be
//! approved once both drawers are open and the source holds enough cash.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::drawer::{explain_guard_miss, DRAWER_COLUMNS};
use crate::repository::transaction::insert_transaction;
use tally_core::{
    CashDrawer, CashTransaction, CashTransactionType, CashTransferRequest, CoreError, DrawerStatus,
    Money, TransferAction, TransferOutcome, TransferStatus,
};

const TRANSFER_REFERENCE: &str = "cash_transfer";

const REQUEST_COLUMNS: &str = r#"
    id, tenant_id, from_drawer_id, from_user_id, to_drawer_id, to_user_id,
    amount, reason, status, requested_at, responded_at, responded_by
"#;

/// Repository for cash transfer requests.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    /// Creates a new TransferRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    /// Inserts a transfer request between two drawers.
    ///
    /// The status is always `pending`; there is no auto-approve path.
    pub async fn create(
        &self,
        from: &CashDrawer,
        to: &CashDrawer,
        amount: Money,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<CashTransferRequest> {
        let request = CashTransferRequest {
            id: Uuid::new_v4().to_string(),
            tenant_id: from.tenant_id.clone(),
            from_drawer_id: from.id.clone(),
            from_user_id: from.user_id.clone(),
            to_drawer_id: to.id.clone(),
            to_user_id: to.user_id.clone(),
            amount,
            reason: reason.map(str::to_string),
            status: TransferStatus::Pending,
            requested_at: now,
            responded_at: None,
            responded_by: None,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_transfer_requests (
                id, tenant_id, from_drawer_id, from_user_id, to_drawer_id, to_user_id,
                amount, reason, status, requested_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
            "#,
        )
        .bind(&request.id)
        .bind(&request.tenant_id)
        .bind(&request.from_drawer_id)
        .bind(&request.from_user_id)
        .bind(&request.to_drawer_id)
        .bind(&request.to_user_id)
        .bind(request.amount)
        .bind(&request.reason)
        .bind(request.requested_at)
        .execute(&self.pool)
        .await?;

        info!(
            request_id = %request.id,
            from_drawer_id = %request.from_drawer_id,
            to_drawer_id = %request.to_drawer_id,
            amount = %amount,
            "Transfer requested"
        );
        Ok(request)
    }

    /// Gets a transfer request by ID.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<CashTransferRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM cash_transfer_requests WHERE id = ?1 AND tenant_id = ?2"
        );
        let request = sqlx::query_as::<_, CashTransferRequest>(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(request)
    }

    /// Lists requests where the user is the source or the destination,
    /// newest first.
    pub async fn list_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> DbResult<Vec<CashTransferRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM cash_transfer_requests
             WHERE tenant_id = ?1 AND (from_user_id = ?2 OR to_user_id = ?2)
             ORDER BY requested_at DESC, rowid DESC"
        );
        let requests = sqlx::query_as::<_, CashTransferRequest>(&sql)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = requests.len(), user_id = %user_id, "Listed transfer requests");
        Ok(requests)
    }

    /// Withdraws a pending request. Only the requester may cancel.
    pub async fn cancel(
        &self,
        tenant_id: &str,
        request_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<CashTransferRequest> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE cash_transfer_requests SET
                status = 'cancelled',
                responded_at = ?1,
                responded_by = ?2
            WHERE id = ?3 AND tenant_id = ?4 AND status = 'pending' AND from_user_id = ?2
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let cancelled = sqlx::query_as::<_, CashTransferRequest>(&sql)
            .bind(now)
            .bind(user_id)
            .bind(request_id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;

        let request = match cancelled {
            Some(request) => request,
            None => {
                let current = fetch_request(&mut tx, tenant_id, request_id).await?;
                return Err(match current {
                    None => DbError::not_found("CashTransferRequest", request_id),
                    Some(r) if r.status.is_terminal() => not_pending(&r),
                    Some(_) => DbError::Domain(CoreError::NotRequester {
                        request_id: request_id.to_string(),
                    }),
                });
            }
        };
        tx.commit().await?;

        info!(request_id = %request_id, "Transfer request cancelled");
        Ok(request)
    }

    /// Answers a pending request atomically.
    ///
    /// On approval the source drawer is debited only if it still holds at
    /// least `amount`; this is the authoritative overdraw check. Both drawers
    /// must be active and open at the moment of approval.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - request or destination drawer missing
    /// * `DbError::Domain(RequestNotPending)` - already answered
    /// * `DbError::Domain(InvalidDrawerStatus)` - either drawer is closed;
    ///   the request stays pending
    /// * `DbError::Domain(InsufficientBalance)` - source balance too low;
    ///   the request stays pending
    pub async fn process(
        &self,
        tenant_id: &str,
        request_id: &str,
        action: TransferAction,
        responded_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<TransferOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE cash_transfer_requests SET
                status = ?1,
                responded_at = ?2,
                responded_by = ?3
            WHERE id = ?4 AND tenant_id = ?5 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let answered = sqlx::query_as::<_, CashTransferRequest>(&sql)
            .bind(action.status())
            .bind(now)
            .bind(responded_by)
            .bind(request_id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;

        let request = match answered {
            Some(request) => request,
            None => {
                let current = fetch_request(&mut tx, tenant_id, request_id).await?;
                return Err(match current {
                    Some(r) => not_pending(&r),
                    None => DbError::not_found("CashTransferRequest", request_id),
                });
            }
        };

        if action == TransferAction::Rejected {
            tx.commit().await?;
            info!(request_id = %request_id, "Transfer request rejected");
            return Ok(TransferOutcome {
                request,
                transactions: Vec::new(),
            });
        }

        let source_after =
            guarded_debit(&mut tx, tenant_id, &request.from_drawer_id, request.amount, now).await?;
        let dest_after = credit(&mut tx, tenant_id, &request.to_drawer_id, request.amount, now).await?;

        let transfer_out = CashTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            cash_drawer_id: request.from_drawer_id.clone(),
            transaction_type: CashTransactionType::TransferOut,
            amount: -request.amount,
            balance_after: source_after,
            reference_type: Some(TRANSFER_REFERENCE.to_string()),
            reference_id: Some(request.id.clone()),
            description: request.reason.clone(),
            performed_by: responded_by.to_string(),
            transaction_date: now,
        };
        let transfer_in = CashTransaction {
            id: Uuid::new_v4().to_string(),
            cash_drawer_id: request.to_drawer_id.clone(),
            transaction_type: CashTransactionType::TransferIn,
            amount: request.amount,
            balance_after: dest_after,
            ..transfer_out.clone()
        };
        insert_transaction(&mut tx, &transfer_out).await?;
        insert_transaction(&mut tx, &transfer_in).await?;

        tx.commit().await?;

        info!(
            request_id = %request.id,
            amount = %request.amount,
            source_balance = %source_after,
            destination_balance = %dest_after,
            "Transfer approved"
        );
        Ok(TransferOutcome {
            request,
            transactions: vec![transfer_out, transfer_in],
        })
    }
}

async fn fetch_request(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    request_id: &str,
) -> DbResult<Option<CashTransferRequest>> {
    let sql = format!(
        "SELECT {REQUEST_COLUMNS} FROM cash_transfer_requests WHERE id = ?1 AND tenant_id = ?2"
    );
    let request = sqlx::query_as::<_, CashTransferRequest>(&sql)
        .bind(request_id)
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(request)
}

fn not_pending(request: &CashTransferRequest) -> DbError {
    DbError::Domain(CoreError::RequestNotPending {
        request_id: request.id.clone(),
        status: request.status.to_string(),
    })
}

/// Debits `amount` only if the drawer is open and still covers it.
///
/// Returns the balance after the debit. Shared with the bank transfer
/// procedure.
pub(crate) async fn guarded_debit(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    drawer_id: &str,
    amount: Money,
    now: DateTime<Utc>,
) -> DbResult<Money> {
    let debited: Option<Money> = sqlx::query_scalar(
        r#"
        UPDATE cash_drawers SET
            current_balance = current_balance - ?1,
            updated_at = ?2
        WHERE id = ?3 AND tenant_id = ?4 AND is_active = 1
          AND status = 'open' AND current_balance >= ?1
        RETURNING current_balance
        "#,
    )
    .bind(amount)
    .bind(now)
    .bind(drawer_id)
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(balance) = debited {
        return Ok(balance);
    }

    let sql = format!(
        "SELECT {DRAWER_COLUMNS} FROM cash_drawers
         WHERE id = ?1 AND tenant_id = ?2 AND is_active = 1"
    );
    let drawer = sqlx::query_as::<_, CashDrawer>(&sql)
        .bind(drawer_id)
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("CashDrawer", drawer_id))?;

    tally_core::drawer::ensure_open(&drawer)?;
    if let Err(e) = tally_core::drawer::check_sufficient_funds(drawer.current_balance, amount) {
        warn!(
            drawer_id = %drawer_id,
            available = %drawer.current_balance,
            requested = %amount,
            "Guarded debit refused"
        );
        return Err(e.into());
    }

    Err(DbError::Internal(format!("guarded debit on drawer {drawer_id} matched no row")))
}

/// Credits `amount` to an open drawer.
async fn credit(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    drawer_id: &str,
    amount: Money,
    now: DateTime<Utc>,
) -> DbResult<Money> {
    let credited: Option<Money> = sqlx::query_scalar(
        r#"
        UPDATE cash_drawers SET
            current_balance = current_balance + ?1,
            updated_at = ?2
        WHERE id = ?3 AND tenant_id = ?4 AND is_active = 1 AND status = 'open'
        RETURNING current_balance
        "#,
    )
    .bind(amount)
    .bind(now)
    .bind(drawer_id)
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await?;

    match credited {
        Some(balance) => Ok(balance),
        None => Err(explain_guard_miss(conn, tenant_id, drawer_id, DrawerStatus::Open).await),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Database;
    use crate::repository::test_support::{at, db, open_drawer, TENANT};
    use tally_core::NewCashTransaction;

    async fn balance(db: &Database, drawer_id: &str) -> i64 {
        db.drawers()
            .get(TENANT, drawer_id)
            .await
            .unwrap()
            .unwrap()
            .current_balance
            .cents()
    }

    #[tokio::test]
    async fn test_create_forces_pending() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 0).await;

        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(12_000), Some("float"), at(2))
            .await
            .unwrap();
        let stored = db.transfers().get(TENANT, &request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);
        assert_eq!(stored, request);
    }

    #[tokio::test]
    async fn test_approval_moves_cash_and_records_pair() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 2_000).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(12_000), None, at(2))
            .await
            .unwrap();

        let outcome = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(3))
            .await
            .unwrap();

        assert_eq!(outcome.request.status, TransferStatus::Approved);
        assert_eq!(outcome.request.responded_at, Some(at(3)));
        assert_eq!(outcome.request.responded_by.as_deref(), Some("user-b"));

        let [out, inn] = outcome.transactions.as_slice() else {
            panic!("expected two transactions");
        };
        assert_eq!(out.transaction_type, CashTransactionType::TransferOut);
        assert_eq!(out.amount, Money::from_cents(-12_000));
        assert_eq!(out.balance_after, Money::from_cents(3_000));
        assert_eq!(inn.transaction_type, CashTransactionType::TransferIn);
        assert_eq!(inn.amount, Money::from_cents(12_000));
        assert_eq!(inn.balance_after, Money::from_cents(14_000));

        // Conservation: the sum across both drawers is unchanged
        assert_eq!(balance(&db, &a.id).await, 3_000);
        assert_eq!(balance(&db, &b.id).await, 14_000);
    }

    #[tokio::test]
    async fn test_second_approval_is_rejected() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 0).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(5_000), None, at(2))
            .await
            .unwrap();

        db.transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(3))
            .await
            .unwrap();
        let err = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(4))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DbError::Domain(CoreError::RequestNotPending { .. })
        ));
        assert_eq!(balance(&db, &a.id).await, 10_000);
        assert_eq!(balance(&db, &b.id).await, 5_000);
    }

    #[tokio::test]
    async fn test_guard_refuses_when_balance_dropped_after_request() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 0).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(12_000), None, at(2))
            .await
            .unwrap();

        // Payout after the request was made
        let payout = NewCashTransaction::new(
            CashTransactionType::ExpensePayment,
            Money::from_cents(-10_000),
        );
        db.transactions()
            .record(TENANT, &a.id, &payout, "user-a", at(3))
            .await
            .unwrap();

        let err = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InsufficientBalance { available, requested })
                if available == Money::from_cents(5_000) && requested == Money::from_cents(12_000)
        ));

        // Whole transaction rolled back: request still pending, no rows
        let stored = db.transfers().get(TENANT, &request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);
        assert_eq!(balance(&db, &a.id).await, 5_000);
        assert_eq!(balance(&db, &b.id).await, 0);
        let b_rows = db.transactions().list_for_drawer(TENANT, &b.id, 50).await.unwrap();
        assert_eq!(b_rows.len(), 1); // opening only
    }

    #[tokio::test]
    async fn test_approval_into_closed_drawer_rolls_back() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 2_000).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(5_000), None, at(2))
            .await
            .unwrap();
        db.drawers().close(TENANT, &b.id, "user-b", at(3)).await.unwrap();

        let err = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidDrawerStatus { ref drawer_id, current, expected })
                if *drawer_id == b.id
                    && current == DrawerStatus::Closed
                    && expected == DrawerStatus::Open
        ));

        // The debit on the source was undone with the rest
        let stored = db.transfers().get(TENANT, &request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);
        assert_eq!(balance(&db, &a.id).await, 15_000);
        assert_eq!(balance(&db, &b.id).await, 2_000);
        let a_rows = db.transactions().list_for_drawer(TENANT, &a.id, 50).await.unwrap();
        assert_eq!(a_rows.len(), 1);
    }

    #[tokio::test]
    async fn test_approval_from_closed_drawer_is_refused() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 0).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(5_000), None, at(2))
            .await
            .unwrap();
        db.drawers().close(TENANT, &a.id, "user-a", at(3)).await.unwrap();

        let err = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(4))
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_domain(),
            Some(CoreError::InvalidDrawerStatus { current: DrawerStatus::Closed, .. })
        ));
        assert_eq!(balance(&db, &a.id).await, 15_000);
        assert_eq!(balance(&db, &b.id).await, 0);

        // Reopened drawers can settle the same request
        db.drawers()
            .open(TENANT, &a.id, Money::from_cents(15_000), "user-a", at(5))
            .await
            .unwrap();
        db.transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(6))
            .await
            .unwrap();
        assert_eq!(balance(&db, &a.id).await, 10_000);
        assert_eq!(balance(&db, &b.id).await, 5_000);
    }

    #[tokio::test]
    async fn test_exact_balance_approval_succeeds() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 7_500).await;
        let b = open_drawer(&db, "user-b", 0).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(7_500), None, at(2))
            .await
            .unwrap();

        db.transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(3))
            .await
            .unwrap();
        assert_eq!(balance(&db, &a.id).await, 0);
        assert_eq!(balance(&db, &b.id).await, 7_500);
    }

    #[tokio::test]
    async fn test_rejection_moves_nothing() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 0).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(5_000), None, at(2))
            .await
            .unwrap();

        let outcome = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Rejected, "user-b", at(3))
            .await
            .unwrap();
        assert_eq!(outcome.request.status, TransferStatus::Rejected);
        assert!(outcome.transactions.is_empty());
        assert_eq!(balance(&db, &a.id).await, 15_000);
    }

    #[tokio::test]
    async fn test_cancel_only_by_requester() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 0).await;
        let request = db
            .transfers()
            .create(&a, &b, Money::from_cents(5_000), None, at(2))
            .await
            .unwrap();

        let err = db
            .transfers()
            .cancel(TENANT, &request.id, "user-b", at(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::NotRequester { .. })));

        let cancelled = db
            .transfers()
            .cancel(TENANT, &request.id, "user-a", at(3))
            .await
            .unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);

        // Terminal: cannot be approved afterwards
        let err = db
            .transfers()
            .process(TENANT, &request.id, TransferAction::Approved, "user-b", at(4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::RequestNotPending { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_for_user_covers_both_sides() {
        let db = db().await;
        let a = open_drawer(&db, "user-a", 15_000).await;
        let b = open_drawer(&db, "user-b", 15_000).await;
        let c = open_drawer(&db, "user-c", 15_000).await;

        db.transfers().create(&a, &b, Money::from_cents(100), None, at(2)).await.unwrap();
        db.transfers().create(&b, &a, Money::from_cents(200), None, at(3)).await.unwrap();
        db.transfers().create(&b, &c, Money::from_cents(300), None, at(4)).await.unwrap();

        let for_a = db.transfers().list_for_user(TENANT, "user-a").await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].amount, Money::from_cents(200));

        let for_c = db.transfers().list_for_user(TENANT, "user-c").await.unwrap();
        assert_eq!(for_c.len(), 1);
    }

    #[tokio::test]
    async fn test_process_unknown_request() {
        let db = db().await;
        let err = db
            .transfers()
            .process(TENANT, "missing", TransferAction::Approved, "user-b", at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
