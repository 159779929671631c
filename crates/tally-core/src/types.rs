//! # Domain Types
//!
//! Core domain types used throughout Tally POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │   CashDrawer    │   │ CashTransaction │   │ CashTransferRequest │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  id (UUID)      │◄──│  cash_drawer_id │   │  from_drawer_id     │   │
//! │  │  user_id        │   │  type           │   │  to_drawer_id       │   │
//! │  │  status         │   │  amount (±)     │   │  amount (> 0)       │   │
//! │  │  current_balance│   │  balance_after  │   │  status             │   │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────┐   │
//! │  │  DrawerStatus   │   │ TransferStatus  │   │ BankTransferRequest │   │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────────  │   │
//! │  │  Closed         │   │  Pending        │   │  cash_drawer_id     │   │
//! │  │  Open           │   │  Approved       │   │  bank_account       │   │
//! │  │  Suspended      │   │  Rejected       │   │  amount (> 0)       │   │
//! │  └─────────────────┘   │  Cancelled      │   └─────────────────────┘   │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tenancy
//! Every persisted entity carries `tenant_id`. Nothing in this module knows
//! how rows are scoped; the repositories in tally-db filter every query by it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Actor Scope
// =============================================================================

/// The tenant and user on whose behalf an engine operates.
///
/// Passed to the services at construction time instead of being read from
/// ambient session state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActorScope {
    pub tenant_id: String,
    pub user_id: String,
}

impl ActorScope {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        ActorScope {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
        }
    }
}

// =============================================================================
// Drawer Status
// =============================================================================

/// Lifecycle state of a cash drawer.
///
/// ```text
///            open_drawer
///   Closed ─────────────► Open
///     ▲                    │
///     └────────────────────┘
///            close_drawer
///
///   Suspended: reserved, no transition enters or leaves it
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DrawerStatus {
    Closed,
    Open,
    Suspended,
}

impl Default for DrawerStatus {
    fn default() -> Self {
        DrawerStatus::Closed
    }
}

impl DrawerStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DrawerStatus::Closed => "closed",
            DrawerStatus::Open => "open",
            DrawerStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for DrawerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cash Drawer
// =============================================================================

/// A user's cash register balance record.
///
/// One active drawer per user per tenant. Drawers are never deleted; a
/// retired drawer has `is_active = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashDrawer {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub drawer_name: String,
    /// Balance the drawer was opened with in the current cycle.
    pub opening_balance: Money,
    /// Signed; may go negative through payouts.
    pub current_balance: Money,
    pub status: DrawerStatus,
    #[ts(as = "Option<String>")]
    pub opened_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
    pub location_name: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CashDrawer {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == DrawerStatus::Open
    }
}

// =============================================================================
// Cash Transaction Type
// =============================================================================

/// What a cash transaction represents.
///
/// The type is also the key the ledger poster uses to pick accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashTransactionType {
    OpeningBalance,
    ClosingBalance,
    SalePayment,
    SaleRefund,
    CustomerPayment,
    SupplierPayment,
    ExpensePayment,
    BankDeposit,
    TransferIn,
    TransferOut,
    Adjustment,
}

impl CashTransactionType {
    pub const ALL: [CashTransactionType; 11] = [
        CashTransactionType::OpeningBalance,
        CashTransactionType::ClosingBalance,
        CashTransactionType::SalePayment,
        CashTransactionType::SaleRefund,
        CashTransactionType::CustomerPayment,
        CashTransactionType::SupplierPayment,
        CashTransactionType::ExpensePayment,
        CashTransactionType::BankDeposit,
        CashTransactionType::TransferIn,
        CashTransactionType::TransferOut,
        CashTransactionType::Adjustment,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            CashTransactionType::OpeningBalance => "opening_balance",
            CashTransactionType::ClosingBalance => "closing_balance",
            CashTransactionType::SalePayment => "sale_payment",
            CashTransactionType::SaleRefund => "sale_refund",
            CashTransactionType::CustomerPayment => "customer_payment",
            CashTransactionType::SupplierPayment => "supplier_payment",
            CashTransactionType::ExpensePayment => "expense_payment",
            CashTransactionType::BankDeposit => "bank_deposit",
            CashTransactionType::TransferIn => "transfer_in",
            CashTransactionType::TransferOut => "transfer_out",
            CashTransactionType::Adjustment => "adjustment",
        }
    }

    /// Parses the stored form back into a type.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == value)
    }

    /// Types that only the open/close paths and the transfer procedure
    /// may produce.
    pub const fn is_reserved(&self) -> bool {
        matches!(
            self,
            CashTransactionType::OpeningBalance
                | CashTransactionType::ClosingBalance
                | CashTransactionType::TransferIn
                | CashTransactionType::TransferOut
        )
    }
}

impl fmt::Display for CashTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cash Transaction
// =============================================================================

/// One append-only entry in a drawer's audit trail.
///
/// `balance_after` is the drawer's `current_balance` immediately after this
/// transaction was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashTransaction {
    pub id: String,
    pub tenant_id: String,
    pub cash_drawer_id: String,
    pub transaction_type: CashTransactionType,
    /// Positive for cash in, negative for cash out.
    pub amount: Money,
    pub balance_after: Money,
    /// Kind of document that caused this entry ("sale", "cash_transfer", ...).
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub performed_by: String,
    #[ts(as = "String")]
    pub transaction_date: DateTime<Utc>,
}

/// Input for a manually recorded drawer movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCashTransaction {
    pub transaction_type: CashTransactionType,
    pub amount: Money,
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
}

impl NewCashTransaction {
    pub fn new(transaction_type: CashTransactionType, amount: Money) -> Self {
        NewCashTransaction {
            transaction_type,
            amount,
            description: None,
            reference_type: None,
            reference_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(
        mut self,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
    ) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(reference_id.into());
        self
    }
}

// =============================================================================
// Transfer Requests
// =============================================================================

/// Status of a cash or bank transfer request.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl Default for TransferStatus {
    fn default() -> Self {
        TransferStatus::Pending
    }
}

impl TransferStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A responder's decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransferAction {
    Approved,
    Rejected,
}

impl TransferAction {
    /// Terminal status the request lands in.
    pub const fn status(&self) -> TransferStatus {
        match self {
            TransferAction::Approved => TransferStatus::Approved,
            TransferAction::Rejected => TransferStatus::Rejected,
        }
    }
}

/// A request to move cash from one user's drawer to another's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashTransferRequest {
    pub id: String,
    pub tenant_id: String,
    pub from_drawer_id: String,
    pub from_user_id: String,
    pub to_drawer_id: String,
    pub to_user_id: String,
    /// Always positive.
    pub amount: Money,
    pub reason: Option<String>,
    pub status: TransferStatus,
    #[ts(as = "String")]
    pub requested_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<String>,
}

/// A request to deposit drawer cash into a bank account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BankTransferRequest {
    pub id: String,
    pub tenant_id: String,
    pub cash_drawer_id: String,
    pub user_id: String,
    pub amount: Money,
    pub bank_account: String,
    /// Deposit slip or bank reference number.
    pub reference: Option<String>,
    pub reason: Option<String>,
    pub status: TransferStatus,
    #[ts(as = "String")]
    pub requested_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub responded_at: Option<DateTime<Utc>>,
    pub responded_by: Option<String>,
}

/// Result of the atomic transfer procedure.
///
/// `transactions` holds the `transfer_out` row followed by the `transfer_in`
/// row on approval, and is empty on rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferOutcome {
    pub request: CashTransferRequest,
    pub transactions: Vec<CashTransaction>,
}

/// Result of the atomic bank transfer procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BankTransferOutcome {
    pub request: BankTransferRequest,
    /// The `bank_deposit` row, present only on approval.
    pub transaction: Option<CashTransaction>,
}

// =============================================================================
// Ledger
// =============================================================================

/// Payload handed to the accounting ledger for one cash transaction.
///
/// Posting is idempotent per `transaction_id`, so the same entry may be
/// delivered more than once by the retry processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JournalEntry {
    pub transaction_id: String,
    pub tenant_id: String,
    pub transaction_type: CashTransactionType,
    pub amount: Money,
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub performed_by: String,
}

impl From<&CashTransaction> for JournalEntry {
    fn from(tx: &CashTransaction) -> Self {
        JournalEntry {
            transaction_id: tx.id.clone(),
            tenant_id: tx.tenant_id.clone(),
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            description: tx.description.clone(),
            reference_type: tx.reference_type.clone(),
            reference_id: tx.reference_id.clone(),
            performed_by: tx.performed_by.clone(),
        }
    }
}

/// A ledger posting that failed and waits for a retry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LedgerOutboxEntry {
    pub id: String,
    pub tenant_id: String,
    pub cash_transaction_id: String,
    pub transaction_type: CashTransactionType,
    /// The `JournalEntry` as JSON.
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub posted_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Inventory
// =============================================================================

/// Review state of a stock adjustment. Only approved items count toward stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Pending,
    Approved,
    Rejected,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Pending => "pending",
            AdjustmentStatus::Approved => "approved",
            AdjustmentStatus::Rejected => "rejected",
        }
    }
}

/// State of a sale as far as stock is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Completed,
    /// Voided sales no longer consume stock.
    Voided,
}

/// One line of a stock adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AdjustmentLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    /// Signed quantity change.
    pub quantity: i64,
}

/// One line of a sale, as it affects stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
}

/// Tenant-level inventory policy as stored in `business_settings`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BusinessSettings {
    pub enable_negative_stock: bool,
    pub enable_overselling: bool,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_round_trips_through_str() {
        for ty in CashTransactionType::ALL {
            assert_eq!(CashTransactionType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(CashTransactionType::parse("bogus"), None);
    }

    #[test]
    fn test_reserved_types() {
        assert!(CashTransactionType::OpeningBalance.is_reserved());
        assert!(CashTransactionType::TransferOut.is_reserved());
        assert!(!CashTransactionType::BankDeposit.is_reserved());
        assert!(!CashTransactionType::SalePayment.is_reserved());
        assert!(!CashTransactionType::ExpensePayment.is_reserved());
        assert!(!CashTransactionType::Adjustment.is_reserved());
    }

    #[test]
    fn test_transaction_type_serializes_snake_case() {
        let json = serde_json::to_string(&CashTransactionType::SaleRefund).unwrap();
        assert_eq!(json, "\"sale_refund\"");
    }

    #[test]
    fn test_action_maps_to_terminal_status() {
        assert_eq!(TransferAction::Approved.status(), TransferStatus::Approved);
        assert_eq!(TransferAction::Rejected.status(), TransferStatus::Rejected);
        assert!(TransferStatus::Cancelled.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
    }

    #[test]
    fn test_journal_entry_from_transaction() {
        let tx = CashTransaction {
            id: "tx-1".to_string(),
            tenant_id: "t-1".to_string(),
            cash_drawer_id: "d-1".to_string(),
            transaction_type: CashTransactionType::SalePayment,
            amount: Money::from_cents(5_000),
            balance_after: Money::from_cents(15_000),
            reference_type: Some("sale".to_string()),
            reference_id: Some("s-1".to_string()),
            description: None,
            performed_by: "u-1".to_string(),
            transaction_date: Utc::now(),
        };

        let entry = JournalEntry::from(&tx);
        assert_eq!(entry.transaction_id, "tx-1");
        assert_eq!(entry.amount, Money::from_cents(5_000));
        assert_eq!(entry.reference_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_drawer_status_default() {
        assert_eq!(DrawerStatus::default(), DrawerStatus::Closed);
        assert_eq!(DrawerStatus::Open.to_string(), "open");
    }
}
