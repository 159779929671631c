//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors                                                       │
//! │  └── DbError          - Database failures, wraps CoreError raised      │
//! │                         inside atomic procedures                       │
//! │                                                                         │
//! │  tally-engine errors                                                   │
//! │  └── EngineError      - What services return, mapped to Notices        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Notice    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::money::Money;
use crate::types::DrawerStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations in the cash drawer and transfer workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The source drawer cannot cover the requested amount.
    ///
    /// ## When This Occurs
    /// - Transfer request larger than the drawer's current balance
    ///   (fast-fail on the client snapshot)
    /// - Approval of a transfer whose source balance dropped after the
    ///   request was made (authoritative check inside the procedure)
    /// - Bank deposit larger than the drawer's balance
    ///
    /// ## User Workflow
    /// ```text
    /// Request transfer of $200.00
    ///      │
    ///      ▼
    /// Drawer balance: $150.00
    ///      │
    ///      ▼
    /// InsufficientBalance { available: $150.00, requested: $200.00 }
    ///      │
    ///      ▼
    /// UI shows: "Insufficient balance: available $150.00, requested $200.00"
    /// ```
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Money, requested: Money },

    /// Drawer is not in a state that allows the requested operation.
    #[error("Drawer {drawer_id} is {current:?}, expected {expected:?}")]
    InvalidDrawerStatus {
        drawer_id: String,
        current: DrawerStatus,
        expected: DrawerStatus,
    },

    /// A transfer or bank transfer request was already answered.
    #[error("Request {request_id} is already {status}")]
    RequestNotPending { request_id: String, status: String },

    /// A drawer cannot send cash to itself.
    #[error("Cannot transfer cash to the same drawer")]
    SelfTransfer,

    /// Only the requester may cancel a pending transfer.
    #[error("Only the requesting user can cancel request {request_id}")]
    NotRequester { request_id: String },

    /// Transaction type is reserved for a dedicated operation.
    ///
    /// ## When This Occurs
    /// - `record_cash_transaction` called with opening/closing/transfer types,
    ///   which are only produced by open/close and the transfer procedure
    #[error("Transaction type '{0}' cannot be recorded directly")]
    ReservedTransactionType(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any write happens, so a validation failure never leaves
/// partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_names_both_amounts() {
        let err = CoreError::InsufficientBalance {
            available: Money::from_cents(15_000),
            requested: Money::from_cents(20_000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance: available $150.00, requested $200.00"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "bank_account".to_string(),
        };
        assert_eq!(err.to_string(), "bank_account is required");

        let err = ValidationError::MustBePositive {
            field: "amount".to_string(),
        };
        assert_eq!(err.to_string(), "amount must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "amount".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
