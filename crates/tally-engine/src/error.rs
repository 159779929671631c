//! # Engine Error Types
//!
//! Error types for the stock and cash drawer services.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Validation     │  │   Store         │  │     Configuration       │ │
//! │  │  (before write) │  │                 │  │                         │ │
//! │  │  Core(..)       │  │  Db(..)         │  │  InvalidConfig          │ │
//! │  │  NoActiveDrawer │  │  rule checks in │  │  ConfigLoadFailed       │ │
//! │  │                 │  │  procedures     │  │  ConfigSaveFailed       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Ledger       │  │    Internal     │                              │
//! │  │  Ledger(..)     │  │  ShuttingDown   │                              │
//! │  │  never reaches  │  │  ChannelError   │                              │
//! │  │  cash callers   │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tally_core::{CoreError, ValidationError};
use tally_db::DbError;
use thiserror::Error;

use crate::ledger::LedgerError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Rule Errors
    // =========================================================================
    /// A business rule rejected the operation before anything was written.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The acting user has no active drawer yet.
    #[error("No active cash drawer for user {user_id}")]
    NoActiveDrawer { user_id: String },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Database failure, or a rule violation detected inside a procedure.
    #[error(transparent)]
    Db(#[from] DbError),

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// Ledger posting failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Background task is shutting down.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl EngineError {
    /// True when the operation was rejected before any write.
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Core(_) | EngineError::NoActiveDrawer { .. })
    }

    /// The business rule that was violated, whether it was caught by the
    /// engine or by a guarded write.
    pub fn rule_violation(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(err) => Some(err),
            EngineError::Db(err) => err.as_domain(),
            _ => None,
        }
    }

    /// Returns true if the failure is transient and a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Db(DbError::PoolExhausted)
                | EngineError::Db(DbError::ConnectionFailed(_))
                | EngineError::Ledger(LedgerError::Unavailable(_))
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Money;

    #[test]
    fn test_validation_classification() {
        let err: EngineError = ValidationError::MustBePositive {
            field: "amount".into(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());

        let err = EngineError::NoActiveDrawer {
            user_id: "user-a".into(),
        };
        assert!(err.is_validation());

        let err = EngineError::Db(DbError::PoolExhausted);
        assert!(!err.is_validation());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rule_violation_from_procedure() {
        let err = EngineError::Db(DbError::Domain(CoreError::InsufficientBalance {
            available: Money::from_cents(100),
            requested: Money::from_cents(200),
        }));
        assert!(!err.is_validation());
        assert!(matches!(
            err.rule_violation(),
            Some(CoreError::InsufficientBalance { .. })
        ));
        assert!(err.to_string().contains("Insufficient balance"));
    }
}
