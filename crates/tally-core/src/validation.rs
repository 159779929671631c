//! # Validation Module
//!
//! Input validation for the cash drawer and stock operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: tally-engine services                                        │
//! │  ├── THIS MODULE: field and amount checks                              │
//! │  └── Fast-fail overdraw check against the cached drawer                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: tally-db atomic procedures                                   │
//! │  ├── Guarded status updates (WHERE status = 'pending')                 │
//! │  └── Guarded debits (WHERE current_balance >= amount)                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (amount > 0) on requests                                    │
//! │  ├── Partial UNIQUE index: one active drawer per user                  │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here runs before the first write, so a rejection never leaves
//! partial state behind.
//!
//! ## Usage
//! ```rust
//! use tally_core::money::Money;
//! use tally_core::validation::{validate_transfer_amount, validate_opening_balance};
//!
//! assert!(validate_transfer_amount(Money::from_cents(500)).is_ok());
//! assert!(validate_transfer_amount(Money::zero()).is_err());
//! assert!(validate_opening_balance(Money::zero()).is_ok());
//! ```

use crate::error::ValidationError;
use crate::money::Money;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_DRAWER_NAME_LEN: usize = 100;
const MAX_REASON_LEN: usize = 500;
const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_BANK_ACCOUNT_LEN: usize = 100;
const MAX_REFERENCE_LEN: usize = 100;

// =============================================================================
// Amount Validators
// =============================================================================

/// Validates the amount of a cash or bank transfer request.
///
/// ## Rules
/// - Must be strictly positive
pub fn validate_transfer_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

/// Validates the balance a drawer is opened with.
///
/// ## Rules
/// - Zero is allowed (empty float)
/// - Negative is rejected
pub fn validate_opening_balance(amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: "opening_balance".to_string(),
        });
    }
    Ok(())
}

/// Validates the amount of a manually recorded transaction.
///
/// Direction is carried by the sign, so only zero is meaningless.
pub fn validate_transaction_amount(amount: Money) -> ValidationResult<()> {
    if amount.is_zero() {
        return Err(ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: "must not be zero".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a drawer's display name.
pub fn validate_drawer_name(name: &str) -> ValidationResult<()> {
    validate_required_text("drawer_name", name, MAX_DRAWER_NAME_LEN)
}

/// Validates the bank account a deposit goes to.
pub fn validate_bank_account(account: &str) -> ValidationResult<()> {
    validate_required_text("bank_account", account, MAX_BANK_ACCOUNT_LEN)
}

/// Validates an optional free-text reason on a request.
pub fn validate_reason(reason: Option<&str>) -> ValidationResult<()> {
    validate_optional_text("reason", reason, MAX_REASON_LEN)
}

/// Validates an optional transaction description.
pub fn validate_description(description: Option<&str>) -> ValidationResult<()> {
    validate_optional_text("description", description, MAX_DESCRIPTION_LEN)
}

/// Validates an optional bank reference.
pub fn validate_reference(reference: Option<&str>) -> ValidationResult<()> {
    validate_optional_text("reference", reference, MAX_REFERENCE_LEN)
}

/// Validates a UUID string.
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_uuid;
///
/// assert!(validate_uuid("to_drawer_id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("to_drawer_id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(value).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

/// Validates the product part of a stock key.
pub fn validate_product_id(product_id: &str) -> ValidationResult<()> {
    if product_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "product_id".to_string(),
        });
    }
    Ok(())
}

fn validate_required_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

fn validate_optional_text(field: &str, value: Option<&str>, max: usize) -> ValidationResult<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_amount_must_be_positive() {
        assert!(validate_transfer_amount(Money::from_cents(1)).is_ok());
        assert!(validate_transfer_amount(Money::zero()).is_err());
        assert!(matches!(
            validate_transfer_amount(Money::from_cents(-100)),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_opening_balance() {
        assert!(validate_opening_balance(Money::zero()).is_ok());
        assert!(validate_opening_balance(Money::from_major(100)).is_ok());
        assert!(validate_opening_balance(Money::from_cents(-1)).is_err());
    }

    #[test]
    fn test_transaction_amount_rejects_zero() {
        assert!(validate_transaction_amount(Money::from_cents(-250)).is_ok());
        assert!(validate_transaction_amount(Money::zero()).is_err());
    }

    #[test]
    fn test_bank_account_required() {
        assert!(validate_bank_account("ACME Bank 001-22").is_ok());
        assert!(validate_bank_account("   ").is_err());
        assert!(validate_bank_account(&"9".repeat(101)).is_err());
    }

    #[test]
    fn test_optional_text_limits() {
        assert!(validate_reason(None).is_ok());
        assert!(validate_reason(Some("float top-up")).is_ok());
        assert!(validate_reason(Some(&"x".repeat(501))).is_err());
        assert!(validate_description(Some(&"x".repeat(500))).is_ok());
    }

    #[test]
    fn test_validate_uuid() {
        let id = uuid::Uuid::new_v4().to_string();
        assert!(validate_uuid("id", &id).is_ok());
        assert!(validate_uuid("id", "").is_err());
        assert!(validate_uuid("id", "12345").is_err());
    }

    #[test]
    fn test_product_id_required() {
        assert!(validate_product_id("p-1").is_ok());
        assert!(validate_product_id(" ").is_err());
    }
}
