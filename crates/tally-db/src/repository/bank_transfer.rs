//! # Bank Transfer Repository
//!
//! Requests to deposit drawer cash into a bank account. Same shape as the
//! drawer to drawer procedure, with a single `bank_deposit` row on approval.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::transaction::insert_transaction;
use crate::repository::transfer::guarded_debit;
use tally_core::{
    BankTransferOutcome, BankTransferRequest, CashDrawer, CashTransaction, CashTransactionType,
    CoreError, Money, TransferAction, TransferStatus,
};

const BANK_REFERENCE: &str = "bank_transfer";

const REQUEST_COLUMNS: &str = r#"
    id, tenant_id, cash_drawer_id, user_id, amount, bank_account, reference,
    reason, status, requested_at, responded_at, responded_by
"#;

/// Repository for bank transfer requests.
#[derive(Debug, Clone)]
pub struct BankTransferRepository {
    pool: SqlitePool,
}

impl BankTransferRepository {
    /// Creates a new BankTransferRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BankTransferRepository { pool }
    }

    /// Inserts a pending deposit request for the drawer's owner.
    pub async fn create(
        &self,
        drawer: &CashDrawer,
        amount: Money,
        bank_account: &str,
        reference: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<BankTransferRequest> {
        let request = BankTransferRequest {
            id: Uuid::new_v4().to_string(),
            tenant_id: drawer.tenant_id.clone(),
            cash_drawer_id: drawer.id.clone(),
            user_id: drawer.user_id.clone(),
            amount,
            bank_account: bank_account.to_string(),
            reference: reference.map(str::to_string),
            reason: reason.map(str::to_string),
            status: TransferStatus::Pending,
            requested_at: now,
            responded_at: None,
            responded_by: None,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_bank_transfer_requests (
                id, tenant_id, cash_drawer_id, user_id, amount, bank_account,
                reference, reason, status, requested_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
            "#,
        )
        .bind(&request.id)
        .bind(&request.tenant_id)
        .bind(&request.cash_drawer_id)
        .bind(&request.user_id)
        .bind(request.amount)
        .bind(&request.bank_account)
        .bind(&request.reference)
        .bind(&request.reason)
        .bind(request.requested_at)
        .execute(&self.pool)
        .await?;

        info!(
            request_id = %request.id,
            drawer_id = %request.cash_drawer_id,
            amount = %amount,
            "Bank transfer requested"
        );
        Ok(request)
    }

    /// Gets a bank transfer request by ID.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<BankTransferRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM cash_bank_transfer_requests
             WHERE id = ?1 AND tenant_id = ?2"
        );
        let request = sqlx::query_as::<_, BankTransferRequest>(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(request)
    }

    /// Lists the user's deposit requests, newest first.
    pub async fn list_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> DbResult<Vec<BankTransferRequest>> {
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM cash_bank_transfer_requests
             WHERE tenant_id = ?1 AND user_id = ?2
             ORDER BY requested_at DESC, rowid DESC"
        );
        let requests = sqlx::query_as::<_, BankTransferRequest>(&sql)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(requests)
    }

    /// Answers a pending deposit request atomically.
    ///
    /// Approval re-verifies the drawer with a guarded debit and records a
    /// `bank_deposit` row. A closed drawer or an insufficient balance rolls
    /// back and leaves the request pending.
    pub async fn process(
        &self,
        tenant_id: &str,
        request_id: &str,
        action: TransferAction,
        responded_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<BankTransferOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE cash_bank_transfer_requests SET
                status = ?1,
                responded_at = ?2,
                responded_by = ?3
            WHERE id = ?4 AND tenant_id = ?5 AND status = 'pending'
            RETURNING {REQUEST_COLUMNS}
            "#
        );
        let answered = sqlx::query_as::<_, BankTransferRequest>(&sql)
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
                let current_sql = format!(
                    "SELECT {REQUEST_COLUMNS} FROM cash_bank_transfer_requests
                     WHERE id = ?1 AND tenant_id = ?2"
                );
                let current = sqlx::query_as::<_, BankTransferRequest>(&current_sql)
                    .bind(request_id)
                    .bind(tenant_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                return Err(match current {
                    Some(r) => DbError::Domain(CoreError::RequestNotPending {
                        request_id: r.id,
                        status: r.status.to_string(),
                    }),
                    None => DbError::not_found("BankTransferRequest", request_id),
                });
            }
        };

        if action == TransferAction::Rejected {
            tx.commit().await?;
            info!(request_id = %request_id, "Bank transfer rejected");
            return Ok(BankTransferOutcome {
                request,
                transaction: None,
            });
        }

        let balance_after =
            guarded_debit(&mut tx, tenant_id, &request.cash_drawer_id, request.amount, now).await?;

        let deposit = CashTransaction {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            cash_drawer_id: request.cash_drawer_id.clone(),
            transaction_type: CashTransactionType::BankDeposit,
            amount: -request.amount,
            balance_after,
            reference_type: Some(BANK_REFERENCE.to_string()),
            reference_id: Some(request.id.clone()),
            description: Some(format!("Deposit to {}", request.bank_account)),
            performed_by: responded_by.to_string(),
            transaction_date: now,
        };
        insert_transaction(&mut tx, &deposit).await?;
        tx.commit().await?;

        info!(
            request_id = %request.id,
            amount = %request.amount,
            balance_after = %balance_after,
            "Bank transfer approved"
        );
        Ok(BankTransferOutcome {
            request,
            transaction: Some(deposit),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
