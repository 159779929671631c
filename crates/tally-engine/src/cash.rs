//! # Cash Drawer Service
//!
//! Per-user drawer lifecycle, manual cash movements, and the approval flow for
//! drawer-to-drawer and drawer-to-bank transfers.
//!
//! ## Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  respond_to_transfer_request(id, Approved)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  TransferRepository::process   ← one SQL transaction:                  │
//! │       │                          pending → approved (guarded)          │
//! │       │                          debit WHERE balance >= amount         │
//! │       │                          credit, transfer_out + transfer_in    │
//! │       ▼                                                                 │
//! │  LedgerGateway::post_all       ← best effort, failures → outbox        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  refresh snapshot              ← drawer, drawers, transactions, requests│
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Notice::info / Notice::error                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot
//! The service keeps the last fetched drawer state for the acting user. It
//! never computes balances locally: after every write the affected state is
//! re-read from the database. The snapshot only feeds early rejections
//! (closed drawer, short balance, request already answered); the guarded
//! statements inside each procedure are authoritative.

use std::sync::Arc;

use tally_core::drawer::{
    check_sufficient_funds, ensure_can_close, ensure_can_open, ensure_distinct_drawers,
    ensure_open, ensure_pending, ensure_recordable,
};
use tally_core::validation;
use tally_core::{
    ActorScope, BankTransferRequest, CashDrawer, CashTransaction, CashTransactionType,
    CashTransferRequest, Money, NewCashTransaction, TransferAction,
};
use tally_db::{Database, DbError};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::CashSettings;
use crate::error::{EngineError, EngineResult};
use crate::ledger::LedgerGateway;
use crate::notify::{Notice, Notifier};

/// Last fetched drawer state for the acting user.
#[derive(Debug, Clone, Default)]
pub struct DrawerSnapshot {
    pub current_drawer: Option<CashDrawer>,
    /// Every active drawer in the tenant, for choosing a transfer target.
    pub drawers: Vec<CashDrawer>,
    /// Most recent transactions of the current drawer, newest first.
    pub transactions: Vec<CashTransaction>,
    pub transfer_requests: Vec<CashTransferRequest>,
    pub bank_transfer_requests: Vec<BankTransferRequest>,
}

/// Cash drawer operations on behalf of one user in one tenant.
pub struct CashDrawerService {
    scope: ActorScope,
    db: Database,
    ledger: LedgerGateway,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: CashSettings,
    state: RwLock<DrawerSnapshot>,
}

impl CashDrawerService {
    pub fn new(
        scope: ActorScope,
        db: Database,
        ledger: LedgerGateway,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: CashSettings,
    ) -> Self {
        CashDrawerService {
            scope,
            db,
            ledger,
            notifier,
            clock,
            settings,
            state: RwLock::new(DrawerSnapshot::default()),
        }
    }

    pub fn scope(&self) -> &ActorScope {
        &self.scope
    }

    // =========================================================================
    // Snapshot Getters
    // =========================================================================

    pub async fn snapshot(&self) -> DrawerSnapshot {
        self.state.read().await.clone()
    }

    pub async fn current_drawer(&self) -> Option<CashDrawer> {
        self.state.read().await.current_drawer.clone()
    }

    pub async fn drawers(&self) -> Vec<CashDrawer> {
        self.state.read().await.drawers.clone()
    }

    pub async fn transactions(&self) -> Vec<CashTransaction> {
        self.state.read().await.transactions.clone()
    }

    pub async fn transfer_requests(&self) -> Vec<CashTransferRequest> {
        self.state.read().await.transfer_requests.clone()
    }

    pub async fn bank_transfer_requests(&self) -> Vec<BankTransferRequest> {
        self.state.read().await.bank_transfer_requests.clone()
    }

    // =========================================================================
    // Drawer Lifecycle
    // =========================================================================

    /// Creates the user's drawer, closed with zero balances.
    pub async fn initialize_drawer(&self) -> EngineResult<CashDrawer> {
        let result = self.try_initialize_drawer().await;
        self.report(result, "Could not create cash drawer", |drawer| {
            Notice::info("Cash drawer created", format!("{} is ready", drawer.drawer_name))
        })
    }

    /// Returns the user's drawer, creating it first if there is none.
    pub async fn ensure_drawer(&self) -> EngineResult<CashDrawer> {
        let existing = self
            .db
            .drawers()
            .get_active_for_user(&self.scope.tenant_id, &self.scope.user_id)
            .await;

        let drawer = match existing {
            Ok(Some(drawer)) => drawer,
            Ok(None) => self.initialize_drawer().await?,
            Err(err) => {
                let err = EngineError::from(err);
                self.fail("Could not load cash drawer", &err);
                return Err(err);
            }
        };

        self.refresh().await;
        Ok(drawer)
    }

    /// Opens a closed drawer with `opening_balance` in it.
    pub async fn open_drawer(&self, opening_balance: Money) -> EngineResult<CashDrawer> {
        let result = self.try_open_drawer(opening_balance).await;
        self.report(result, "Could not open drawer", |drawer| {
            Notice::info("Drawer opened", format!("Opening balance {}", drawer.opening_balance))
        })
    }

    /// Closes an open drawer, recording its final balance.
    pub async fn close_drawer(&self) -> EngineResult<CashDrawer> {
        let result = self.try_close_drawer().await;
        self.report(result, "Could not close drawer", |drawer| {
            Notice::info("Drawer closed", format!("Closing balance {}", drawer.current_balance))
        })
    }

    /// Records a manual cash movement against the open drawer.
    ///
    /// The sign of `amount` is the direction: positive for cash in.
    pub async fn record_cash_transaction(
        &self,
        transaction_type: CashTransactionType,
        amount: Money,
        description: Option<&str>,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
    ) -> EngineResult<CashTransaction> {
        let mut new = NewCashTransaction::new(transaction_type, amount);
        if let Some(description) = description {
            new = new.with_description(description);
        }
        new.reference_type = reference_type.map(str::to_string);
        new.reference_id = reference_id.map(str::to_string);

        let result = self.try_record(&new).await;
        self.report(result, "Could not record transaction", |tx| {
            Notice::info("Transaction recorded", format!("Balance is now {}", tx.balance_after))
        })
    }

    // =========================================================================
    // Cash Transfers
    // =========================================================================

    /// Asks the owner of `to_drawer_id` to accept `amount` from this drawer.
    pub async fn create_transfer_request(
        &self,
        to_drawer_id: &str,
        amount: Money,
        reason: Option<&str>,
    ) -> EngineResult<CashTransferRequest> {
        let result = self.try_create_transfer(to_drawer_id, amount, reason).await;
        self.report(result, "Could not request transfer", |request| {
            Notice::info("Transfer requested", format!("{} awaiting approval", request.amount))
        })
    }

    /// Approves or rejects a pending transfer.
    pub async fn respond_to_transfer_request(
        &self,
        request_id: &str,
        action: TransferAction,
    ) -> EngineResult<CashTransferRequest> {
        let result = self.try_respond_to_transfer(request_id, action).await;
        self.report(result, "Could not answer transfer request", |request| {
            Notice::info(
                format!("Transfer {}", request.status),
                format!("{} from {}", request.amount, request.from_user_id),
            )
        })
    }

    /// Withdraws one of this user's pending transfer requests.
    pub async fn cancel_transfer_request(&self, request_id: &str) -> EngineResult<CashTransferRequest> {
        let result = self.try_cancel_transfer(request_id).await;
        self.report(result, "Could not cancel transfer request", |request| {
            Notice::info("Transfer cancelled", format!("Request for {} withdrawn", request.amount))
        })
    }

    // =========================================================================
    // Bank Transfers
    // =========================================================================

    /// Asks for `amount` to be deposited from this drawer into `bank_account`.
    pub async fn create_bank_transfer_request(
        &self,
        amount: Money,
        bank_account: &str,
        reference: Option<&str>,
        reason: Option<&str>,
    ) -> EngineResult<BankTransferRequest> {
        let result = self
            .try_create_bank_transfer(amount, bank_account, reference, reason)
            .await;
        self.report(result, "Could not request bank deposit", |request| {
            Notice::info(
                "Bank deposit requested",
                format!("{} to {}", request.amount, request.bank_account),
            )
        })
    }

    /// Approves or rejects a pending bank deposit. Approval debits the drawer.
    pub async fn respond_to_bank_transfer_request(
        &self,
        request_id: &str,
        action: TransferAction,
    ) -> EngineResult<BankTransferRequest> {
        let result = self.try_respond_to_bank_transfer(request_id, action).await;
        self.report(result, "Could not answer bank deposit", |request| {
            Notice::info(
                format!("Bank deposit {}", request.status),
                format!("{} to {}", request.amount, request.bank_account),
            )
        })
    }

    // =========================================================================
    // Fetches
    // =========================================================================
    //
    // A failed fetch leaves the snapshot as it was and raises a warning.

    pub async fn fetch_current_drawer(&self) -> Option<CashDrawer> {
        match self.load_current_drawer().await {
            Ok(drawer) => {
                self.state.write().await.current_drawer = drawer.clone();
                drawer
            }
            Err(err) => {
                self.warn_fetch("drawer", &err);
                self.current_drawer().await
            }
        }
    }

    pub async fn fetch_all_drawers(&self) -> Vec<CashDrawer> {
        match self.db.drawers().list_active(&self.scope.tenant_id).await {
            Ok(drawers) => {
                self.state.write().await.drawers = drawers.clone();
                drawers
            }
            Err(err) => {
                self.warn_fetch("drawers", &err.into());
                self.drawers().await
            }
        }
    }

    /// The current drawer's most recent transactions, newest first.
    pub async fn fetch_transactions(&self) -> Vec<CashTransaction> {
        let drawer_id = match self.current_drawer().await {
            Some(drawer) => drawer.id,
            None => return Vec::new(),
        };

        let fetched = self
            .db
            .transactions()
            .list_for_drawer(&self.scope.tenant_id, &drawer_id, self.settings.transaction_history_limit)
            .await;

        match fetched {
            Ok(transactions) => {
                self.state.write().await.transactions = transactions.clone();
                transactions
            }
            Err(err) => {
                self.warn_fetch("transactions", &err.into());
                self.transactions().await
            }
        }
    }

    /// Requests where this user is the sender or the receiver.
    pub async fn fetch_transfer_requests(&self) -> Vec<CashTransferRequest> {
        match self.refresh_transfer_requests().await {
            Ok(requests) => requests,
            Err(err) => {
                self.warn_fetch("transfer requests", &err);
                self.transfer_requests().await
            }
        }
    }

    pub async fn fetch_bank_transfer_requests(&self) -> Vec<BankTransferRequest> {
        let fetched = self
            .db
            .bank_transfers()
            .list_for_user(&self.scope.tenant_id, &self.scope.user_id)
            .await;

        match fetched {
            Ok(requests) => {
                self.state.write().await.bank_transfer_requests = requests.clone();
                requests
            }
            Err(err) => {
                self.warn_fetch("bank deposits", &err.into());
                self.bank_transfer_requests().await
            }
        }
    }

    /// Re-reads everything in the snapshot.
    pub async fn refresh(&self) {
        self.fetch_current_drawer().await;
        self.fetch_all_drawers().await;
        self.fetch_transactions().await;
        self.fetch_transfer_requests().await;
        self.fetch_bank_transfer_requests().await;
    }

    // =========================================================================
    // Operation Bodies
    // =========================================================================

    async fn try_initialize_drawer(&self) -> EngineResult<CashDrawer> {
        let name = format!("{} drawer", self.scope.user_id);
        validation::validate_drawer_name(&name)?;

        let drawer = self
            .db
            .drawers()
            .insert(&self.scope.tenant_id, &self.scope.user_id, &name, None, self.clock.now())
            .await?;

        self.state.write().await.current_drawer = Some(drawer.clone());
        Ok(drawer)
    }

    async fn try_open_drawer(&self, opening_balance: Money) -> EngineResult<CashDrawer> {
        validation::validate_opening_balance(opening_balance)?;
        let drawer = self.require_drawer().await?;
        ensure_can_open(&drawer)?;

        let (drawer, opening) = self
            .db
            .drawers()
            .open(
                &self.scope.tenant_id,
                &drawer.id,
                opening_balance,
                &self.scope.user_id,
                self.clock.now(),
            )
            .await?;

        self.ledger.post_best_effort(&opening).await;
        self.refresh().await;
        Ok(drawer)
    }

    async fn try_close_drawer(&self) -> EngineResult<CashDrawer> {
        let drawer = self.require_drawer().await?;
        ensure_can_close(&drawer)?;

        let (drawer, closing) = self
            .db
            .drawers()
            .close(&self.scope.tenant_id, &drawer.id, &self.scope.user_id, self.clock.now())
            .await?;

        self.ledger.post_best_effort(&closing).await;
        self.refresh().await;
        Ok(drawer)
    }

    async fn try_record(&self, new: &NewCashTransaction) -> EngineResult<CashTransaction> {
        ensure_recordable(new.transaction_type)?;
        validation::validate_transaction_amount(new.amount)?;
        validation::validate_description(new.description.as_deref())?;
        validation::validate_reference(new.reference_type.as_deref())?;
        validation::validate_reference(new.reference_id.as_deref())?;

        let drawer = self.require_drawer().await?;
        ensure_open(&drawer)?;

        let tx = self
            .db
            .transactions()
            .record(&self.scope.tenant_id, &drawer.id, new, &self.scope.user_id, self.clock.now())
            .await?;

        self.ledger.post_best_effort(&tx).await;
        self.fetch_current_drawer().await;
        self.fetch_transactions().await;
        Ok(tx)
    }

    async fn try_create_transfer(
        &self,
        to_drawer_id: &str,
        amount: Money,
        reason: Option<&str>,
    ) -> EngineResult<CashTransferRequest> {
        validation::validate_transfer_amount(amount)?;
        validation::validate_reason(reason)?;

        let from = self.require_drawer().await?;
        ensure_distinct_drawers(&from.id, to_drawer_id)?;

        let to = self
            .db
            .drawers()
            .get(&self.scope.tenant_id, to_drawer_id)
            .await?
            .filter(|drawer| drawer.is_active)
            .ok_or_else(|| EngineError::from(DbError::not_found("CashDrawer", to_drawer_id)))?;

        // Early rejections against the snapshot; approval re-checks in SQL
        ensure_open(&from)?;
        ensure_open(&to)?;
        check_sufficient_funds(from.current_balance, amount)?;

        let request = self
            .db
            .transfers()
            .create(&from, &to, amount, reason, self.clock.now())
            .await?;

        self.refresh_transfer_requests().await?;
        Ok(request)
    }

    async fn try_respond_to_transfer(
        &self,
        request_id: &str,
        action: TransferAction,
    ) -> EngineResult<CashTransferRequest> {
        if let Some(known) = self
            .transfer_requests()
            .await
            .into_iter()
            .find(|request| request.id == request_id)
        {
            ensure_pending(&known.id, known.status)?;
        }

        let outcome = self
            .db
            .transfers()
            .process(&self.scope.tenant_id, request_id, action, &self.scope.user_id, self.clock.now())
            .await?;

        self.ledger.post_all(&outcome.transactions).await;
        self.refresh().await;
        Ok(outcome.request)
    }

    async fn try_cancel_transfer(&self, request_id: &str) -> EngineResult<CashTransferRequest> {
        let request = self
            .db
            .transfers()
            .cancel(&self.scope.tenant_id, request_id, &self.scope.user_id, self.clock.now())
            .await?;

        self.refresh_transfer_requests().await?;
        Ok(request)
    }

    async fn try_create_bank_transfer(
        &self,
        amount: Money,
        bank_account: &str,
        reference: Option<&str>,
        reason: Option<&str>,
    ) -> EngineResult<BankTransferRequest> {
        validation::validate_transfer_amount(amount)?;
        validation::validate_bank_account(bank_account)?;
        validation::validate_reference(reference)?;
        validation::validate_reason(reason)?;

        let drawer = self.require_drawer().await?;
        ensure_open(&drawer)?;
        check_sufficient_funds(drawer.current_balance, amount)?;

        let request = self
            .db
            .bank_transfers()
            .create(&drawer, amount, bank_account.trim(), reference, reason, self.clock.now())
            .await?;

        self.fetch_bank_transfer_requests().await;
        Ok(request)
    }

    async fn try_respond_to_bank_transfer(
        &self,
        request_id: &str,
        action: TransferAction,
    ) -> EngineResult<BankTransferRequest> {
        if let Some(known) = self
            .bank_transfer_requests()
            .await
            .into_iter()
            .find(|request| request.id == request_id)
        {
            ensure_pending(&known.id, known.status)?;
        }

        let outcome = self
            .db
            .bank_transfers()
            .process(&self.scope.tenant_id, request_id, action, &self.scope.user_id, self.clock.now())
            .await?;

        if let Some(deposit) = &outcome.transaction {
            self.ledger.post_best_effort(deposit).await;
        }
        self.refresh().await;
        Ok(outcome.request)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// The snapshot drawer, loading it when the snapshot is empty.
    async fn require_drawer(&self) -> EngineResult<CashDrawer> {
        if let Some(drawer) = self.current_drawer().await {
            return Ok(drawer);
        }

        let drawer = self
            .load_current_drawer()
            .await?
            .ok_or_else(|| EngineError::NoActiveDrawer {
                user_id: self.scope.user_id.clone(),
            })?;

        self.state.write().await.current_drawer = Some(drawer.clone());
        Ok(drawer)
    }

    async fn load_current_drawer(&self) -> EngineResult<Option<CashDrawer>> {
        let drawer = self
            .db
            .drawers()
            .get_active_for_user(&self.scope.tenant_id, &self.scope.user_id)
            .await?;
        Ok(drawer)
    }

    async fn refresh_transfer_requests(&self) -> EngineResult<Vec<CashTransferRequest>> {
        let requests = self
            .db
            .transfers()
            .list_for_user(&self.scope.tenant_id, &self.scope.user_id)
            .await?;
        self.state.write().await.transfer_requests = requests.clone();
        Ok(requests)
    }

    /// Sends the success or failure notice for a finished mutation.
    fn report<T>(
        &self,
        result: EngineResult<T>,
        failure_title: &str,
        success: impl FnOnce(&T) -> Notice,
    ) -> EngineResult<T> {
        match &result {
            Ok(value) => {
                let notice = success(value);
                info!(
                    tenant_id = %self.scope.tenant_id,
                    user_id = %self.scope.user_id,
                    "{}",
                    notice.title
                );
                self.notifier.notify(&notice);
            }
            Err(err) => self.fail(failure_title, err),
        }
        result
    }

    fn fail(&self, title: &str, err: &EngineError) {
        if err.is_validation() || err.rule_violation().is_some() {
            warn!(user_id = %self.scope.user_id, error = %err, "{}", title);
        } else {
            error!(user_id = %self.scope.user_id, error = %err, "{}", title);
        }
        self.notifier.notify(&Notice::error(title, err.to_string()));
    }

    fn warn_fetch(&self, what: &str, err: &EngineError) {
        warn!(user_id = %self.scope.user_id, error = %err, "Failed to fetch {}", what);
        self.notifier
            .notify(&Notice::warning(format!("Could not load {what}"), err.to_string()));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
