//! # Cash Drawer Repository
//!
//! Database operations for the drawer lifecycle.
//!
//! ## Lifecycle Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert   status = 'closed', balances 0, is_active = 1                 │
//! │                                                                         │
//! │  open     ┌──────────────── SINGLE TRANSACTION ─────────────────────┐  │
//! │           │ UPDATE cash_drawers SET status = 'open', ...            │  │
//! │           │   WHERE id = ? AND status = 'closed'   ← guard          │  │
//! │           │ INSERT cash_transactions ('opening_balance')            │  │
//! │           └─────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  close    ┌──────────────── SINGLE TRANSACTION ─────────────────────┐  │
//! │           │ UPDATE cash_drawers SET status = 'closed', ...          │  │
//! │           │   WHERE id = ? AND status = 'open'     ← guard          │  │
//! │           │ INSERT cash_transactions ('closing_balance')            │  │
//! │           └─────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The guarded UPDATE is always the first statement, so two clients opening
//! the same drawer serialize on SQLite's write lock and the loser sees zero
//! rows affected.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::transaction::insert_transaction;
use tally_core::{CashDrawer, CashTransaction, CashTransactionType, CoreError, DrawerStatus, Money};

pub(crate) const DRAWER_COLUMNS: &str = r#"
    id, tenant_id, user_id, drawer_name, opening_balance, current_balance,
    status, opened_at, closed_at, location_name, is_active, created_at, updated_at
"#;

/// Repository for cash drawer database operations.
#[derive(Debug, Clone)]
pub struct DrawerRepository {
    pool: SqlitePool,
}

impl DrawerRepository {
    /// Creates a new DrawerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DrawerRepository { pool }
    }

    /// Gets a drawer by ID within a tenant.
    pub async fn get(&self, tenant_id: &str, id: &str) -> DbResult<Option<CashDrawer>> {
        let sql = format!(
            "SELECT {DRAWER_COLUMNS} FROM cash_drawers WHERE id = ?1 AND tenant_id = ?2"
        );
        let drawer = sqlx::query_as::<_, CashDrawer>(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(drawer)
    }

    /// Gets the user's single active drawer, if one was initialized.
    pub async fn get_active_for_user(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> DbResult<Option<CashDrawer>> {
        debug!(tenant_id = %tenant_id, user_id = %user_id, "Fetching active drawer");

        let sql = format!(
            "SELECT {DRAWER_COLUMNS} FROM cash_drawers
             WHERE tenant_id = ?1 AND user_id = ?2 AND is_active = 1"
        );
        let drawer = sqlx::query_as::<_, CashDrawer>(&sql)
            .bind(tenant_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(drawer)
    }

    /// Lists every active drawer in the tenant (transfer destinations).
    pub async fn list_active(&self, tenant_id: &str) -> DbResult<Vec<CashDrawer>> {
        let sql = format!(
            "SELECT {DRAWER_COLUMNS} FROM cash_drawers
             WHERE tenant_id = ?1 AND is_active = 1
             ORDER BY drawer_name"
        );
        let drawers = sqlx::query_as::<_, CashDrawer>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = drawers.len(), "Listed active drawers");
        Ok(drawers)
    }

    /// Inserts the user's drawer in the `closed` state with zero balances.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - the user already has an active drawer
    pub async fn insert(
        &self,
        tenant_id: &str,
        user_id: &str,
        drawer_name: &str,
        location_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> DbResult<CashDrawer> {
        let drawer = CashDrawer {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            drawer_name: drawer_name.to_string(),
            opening_balance: Money::zero(),
            current_balance: Money::zero(),
            status: DrawerStatus::Closed,
            opened_at: None,
            closed_at: None,
            location_name: location_name.map(str::to_string),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_drawers (
                id, tenant_id, user_id, drawer_name, opening_balance, current_balance,
                status, opened_at, closed_at, location_name, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&drawer.id)
        .bind(&drawer.tenant_id)
        .bind(&drawer.user_id)
        .bind(&drawer.drawer_name)
        .bind(drawer.opening_balance)
        .bind(drawer.current_balance)
        .bind(drawer.status)
        .bind(drawer.opened_at)
        .bind(drawer.closed_at)
        .bind(&drawer.location_name)
        .bind(drawer.is_active)
        .bind(drawer.created_at)
        .bind(drawer.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("active drawer for user", user_id),
            other => other,
        })?;

        info!(drawer_id = %drawer.id, user_id = %user_id, "Drawer initialized");
        Ok(drawer)
    }

    /// Opens a closed drawer and records the `opening_balance` transaction.
    ///
    /// Sets opening and current balance, stamps `opened_at` and clears
    /// `closed_at`. The recorded transaction has
    /// `amount == balance_after == opening_balance`.
    pub async fn open(
        &self,
        tenant_id: &str,
        drawer_id: &str,
        opening_balance: Money,
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<(CashDrawer, CashTransaction)> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE cash_drawers SET
                status = 'open',
                opening_balance = ?1,
                current_balance = ?1,
                opened_at = ?2,
                closed_at = NULL,
                updated_at = ?2
            WHERE id = ?3 AND tenant_id = ?4 AND is_active = 1 AND status = 'closed'
            RETURNING {DRAWER_COLUMNS}
            "#
        );
        let drawer = sqlx::query_as::<_, CashDrawer>(&sql)
            .bind(opening_balance)
            .bind(now)
            .bind(drawer_id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;

        let drawer = match drawer {
            Some(drawer) => drawer,
            None => {
                return Err(
                    explain_guard_miss(&mut tx, tenant_id, drawer_id, DrawerStatus::Closed).await,
                )
            }
        };

        let row = snapshot_transaction(&drawer, CashTransactionType::OpeningBalance, performed_by, now);
        insert_transaction(&mut tx, &row).await?;
        tx.commit().await?;

        info!(
            drawer_id = %drawer.id,
            opening_balance = %opening_balance,
            "Drawer opened"
        );
        Ok((drawer, row))
    }

    /// Closes an open drawer and records the `closing_balance` snapshot.
    ///
    /// The balance is frozen; the snapshot has
    /// `amount == balance_after == current_balance`.
    pub async fn close(
        &self,
        tenant_id: &str,
        drawer_id: &str,
        performed_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<(CashDrawer, CashTransaction)> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE cash_drawers SET
                status = 'closed',
                closed_at = ?1,
                updated_at = ?1
            WHERE id = ?2 AND tenant_id = ?3 AND is_active = 1 AND status = 'open'
            RETURNING {DRAWER_COLUMNS}
            "#
        );
        let drawer = sqlx::query_as::<_, CashDrawer>(&sql)
            .bind(now)
            .bind(drawer_id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;

        let drawer = match drawer {
            Some(drawer) => drawer,
            None => {
                return Err(
                    explain_guard_miss(&mut tx, tenant_id, drawer_id, DrawerStatus::Open).await,
                )
            }
        };

        let row = snapshot_transaction(&drawer, CashTransactionType::ClosingBalance, performed_by, now);
        insert_transaction(&mut tx, &row).await?;
        tx.commit().await?;

        info!(
            drawer_id = %drawer.id,
            closing_balance = %drawer.current_balance,
            "Drawer closed"
        );
        Ok((drawer, row))
    }

    /// Retires a drawer. Drawers are never deleted.
    pub async fn deactivate(
        &self,
        tenant_id: &str,
        drawer_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE cash_drawers SET is_active = 0, updated_at = ?1
             WHERE id = ?2 AND tenant_id = ?3 AND is_active = 1",
        )
        .bind(now)
        .bind(drawer_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CashDrawer", drawer_id));
        }
        info!(drawer_id = %drawer_id, "Drawer deactivated");
        Ok(())
    }
}

/// Builds the opening/closing snapshot row for a drawer.
fn snapshot_transaction(
    drawer: &CashDrawer,
    transaction_type: CashTransactionType,
    performed_by: &str,
    now: DateTime<Utc>,
) -> CashTransaction {
    CashTransaction {
        id: Uuid::new_v4().to_string(),
        tenant_id: drawer.tenant_id.clone(),
        cash_drawer_id: drawer.id.clone(),
        transaction_type,
        amount: drawer.current_balance,
        balance_after: drawer.current_balance,
        reference_type: Some("cash_drawer".to_string()),
        reference_id: Some(drawer.id.clone()),
        description: None,
        performed_by: performed_by.to_string(),
        transaction_date: now,
    }
}

/// Works out why a guarded drawer UPDATE matched no row.
///
/// Runs on the same connection as the failed guard so it sees the same
/// snapshot.
pub(crate) async fn explain_guard_miss(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    drawer_id: &str,
    expected: DrawerStatus,
) -> DbError {
    let sql = format!(
        "SELECT {DRAWER_COLUMNS} FROM cash_drawers
         WHERE id = ?1 AND tenant_id = ?2 AND is_active = 1"
    );
    let current = sqlx::query_as::<_, CashDrawer>(&sql)
        .bind(drawer_id)
        .bind(tenant_id)
        .fetch_optional(&mut *conn)
        .await;

    match current {
        Ok(Some(drawer)) => DbError::Domain(CoreError::InvalidDrawerStatus {
            drawer_id: drawer.id,
            current: drawer.status,
            expected,
        }),
        Ok(None) => DbError::not_found("CashDrawer", drawer_id),
        Err(e) => e.into(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{at, db, open_drawer, TENANT};

    #[tokio::test]
    async fn test_insert_starts_closed_with_zero_balance() {
        let db = db().await;
        let drawer = db
            .drawers()
            .insert(TENANT, "user-a", "Front counter", Some("Main St"), at(0))
            .await
            .unwrap();

        let fetched = db
            .drawers()
            .get_active_for_user(TENANT, "user-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, drawer);
        assert_eq!(fetched.status, DrawerStatus::Closed);
        assert!(fetched.current_balance.is_zero());
    }

    #[tokio::test]
    async fn test_one_active_drawer_per_user() {
        let db = db().await;
        db.drawers()
            .insert(TENANT, "user-a", "First", None, at(0))
            .await
            .unwrap();

        let err = db
            .drawers()
            .insert(TENANT, "user-a", "Second", None, at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Same user in another tenant is a different drawer
        assert!(db
            .drawers()
            .insert("tenant-2", "user-a", "Other tenant", None, at(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_open_and_close_record_snapshots() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 10_000).await;
        assert_eq!(drawer.status, DrawerStatus::Open);
        assert_eq!(drawer.opening_balance, Money::from_cents(10_000));
        assert_eq!(drawer.current_balance, Money::from_cents(10_000));
        assert_eq!(drawer.opened_at, Some(at(1)));

        let (closed, snapshot) = db
            .drawers()
            .close(TENANT, &drawer.id, "user-a", at(5))
            .await
            .unwrap();
        assert_eq!(closed.status, DrawerStatus::Closed);
        assert_eq!(closed.closed_at, Some(at(5)));
        assert_eq!(snapshot.transaction_type, CashTransactionType::ClosingBalance);
        assert_eq!(snapshot.amount, Money::from_cents(10_000));
        assert_eq!(snapshot.balance_after, Money::from_cents(10_000));

        let history = db
            .transactions()
            .list_for_drawer(TENANT, &drawer.id, 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].transaction_type, CashTransactionType::ClosingBalance);
        assert_eq!(history[1].transaction_type, CashTransactionType::OpeningBalance);
    }

    #[tokio::test]
    async fn test_reopen_starts_new_cycle() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 10_000).await;
        db.drawers()
            .close(TENANT, &drawer.id, "user-a", at(5))
            .await
            .unwrap();

        let (reopened, _) = db
            .drawers()
            .open(TENANT, &drawer.id, Money::from_cents(2_500), "user-a", at(10))
            .await
            .unwrap();
        assert_eq!(reopened.current_balance, Money::from_cents(2_500));
        assert_eq!(reopened.closed_at, None);
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 0).await;

        let err = db
            .drawers()
            .open(TENANT, &drawer.id, Money::from_cents(500), "user-a", at(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::InvalidDrawerStatus {
                current: DrawerStatus::Open,
                expected: DrawerStatus::Closed,
                ..
            })
        ));

        // Balance untouched by the rejected open
        let current = db.drawers().get(TENANT, &drawer.id).await.unwrap().unwrap();
        assert!(current.current_balance.is_zero());
    }

    #[tokio::test]
    async fn test_close_unknown_drawer() {
        let db = db().await;
        let err = db
            .drawers()
            .close(TENANT, "missing", "user-a", at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_deactivated_drawer_is_not_listed() {
        let db = db().await;
        let drawer = open_drawer(&db, "user-a", 0).await;
        open_drawer(&db, "user-b", 0).await;

        db.drawers().deactivate(TENANT, &drawer.id, at(3)).await.unwrap();

        let active = db.drawers().list_active(TENANT).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, "user-b");
        assert!(db
            .drawers()
            .get_active_for_user(TENANT, "user-a")
            .await
            .unwrap()
            .is_none());
    }
}
