//! # Drawer Rules
//!
//! Pure checks for the drawer lifecycle, overdraw protection and request
//! state. The services in tally-engine call these before touching the
//! database; the atomic procedures in tally-db enforce the same rules again
//! in SQL where concurrency matters.
//!
//! ## Where Each Check Runs
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Check                    Client (this module)     Server (tally-db)   │
//! │  ───────────────────────  ───────────────────────  ─────────────────── │
//! │  open requires Closed     ensure_can_open          WHERE status=closed │
//! │  close requires Open      ensure_can_close         WHERE status=open   │
//! │  transfer drawers Open    ensure_open              WHERE status=open   │
//! │  amount ≤ balance         check_sufficient_funds   WHERE balance >= ?  │
//! │  request still pending    ensure_pending           WHERE status=pending│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The client check is a fast fail against a possibly stale snapshot; only
//! the server check is authoritative.

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{CashDrawer, CashTransactionType, DrawerStatus, TransferStatus};

/// Verifies that `available` covers `requested`.
///
/// Equality succeeds: a drawer may be emptied exactly.
///
/// ## Example
/// ```rust
/// use tally_core::drawer::check_sufficient_funds;
/// use tally_core::money::Money;
///
/// let balance = Money::from_cents(15_000);
/// assert!(check_sufficient_funds(balance, balance).is_ok());
/// assert!(check_sufficient_funds(balance, Money::from_cents(15_001)).is_err());
/// ```
pub fn check_sufficient_funds(available: Money, requested: Money) -> CoreResult<()> {
    if requested > available {
        return Err(CoreError::InsufficientBalance {
            available,
            requested,
        });
    }
    Ok(())
}

/// A drawer can only be opened from `Closed`.
pub fn ensure_can_open(drawer: &CashDrawer) -> CoreResult<()> {
    ensure_status(drawer, DrawerStatus::Closed)
}

/// A drawer can only be closed from `Open`.
pub fn ensure_can_close(drawer: &CashDrawer) -> CoreResult<()> {
    ensure_status(drawer, DrawerStatus::Open)
}

/// Transactions can only be recorded against an open drawer.
pub fn ensure_open(drawer: &CashDrawer) -> CoreResult<()> {
    ensure_status(drawer, DrawerStatus::Open)
}

fn ensure_status(drawer: &CashDrawer, expected: DrawerStatus) -> CoreResult<()> {
    if drawer.status != expected {
        return Err(CoreError::InvalidDrawerStatus {
            drawer_id: drawer.id.clone(),
            current: drawer.status,
            expected,
        });
    }
    Ok(())
}

/// Rejects any answer to a request that is no longer pending.
pub fn ensure_pending(request_id: &str, status: TransferStatus) -> CoreResult<()> {
    if status.is_terminal() {
        return Err(CoreError::RequestNotPending {
            request_id: request_id.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Rejects transaction types that only dedicated paths may produce.
pub fn ensure_recordable(transaction_type: CashTransactionType) -> CoreResult<()> {
    if transaction_type.is_reserved() {
        return Err(CoreError::ReservedTransactionType(
            transaction_type.as_str().to_string(),
        ));
    }
    Ok(())
}

/// Source and destination of a transfer must differ.
pub fn ensure_distinct_drawers(from_drawer_id: &str, to_drawer_id: &str) -> CoreResult<()> {
    if from_drawer_id == to_drawer_id {
        return Err(CoreError::SelfTransfer);
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
