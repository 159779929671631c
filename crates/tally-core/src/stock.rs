//! # Stock Math
//!
//! Keys, components and the clamping formula behind the unified stock
//! number.
//!
//! ## Formula
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   raw   = base_stock + Σ approved adjustments − Σ recent sales          │
//! │                                                                         │
//! │   stock = raw              if allow_negative_stock || allow_overselling │
//! │         = max(0, raw)      otherwise                                    │
//! │                                                                         │
//! │   Example: 5 + (−2) − 10 = −7  →  0 (clamped)  or  −7 (overselling)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreResult;
use crate::types::BusinessSettings;
use crate::validation::validate_product_id;
use crate::{DEFAULT_LOCATION, MAIN_VARIANT};

// =============================================================================
// Stock Key
// =============================================================================

/// Cache and lookup key: `(product, variant | "main", location | "default")`.
///
/// Missing parts are normalised at construction, so `None` and the
/// placeholder compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockKey {
    pub product_id: String,
    pub variant_id: String,
    pub location_id: String,
}

impl StockKey {
    pub fn new(product_id: impl Into<String>, location_id: Option<&str>, variant_id: Option<&str>) -> Self {
        StockKey {
            product_id: product_id.into(),
            variant_id: variant_id.unwrap_or(MAIN_VARIANT).to_string(),
            location_id: location_id.unwrap_or(DEFAULT_LOCATION).to_string(),
        }
    }

    /// Location filter for queries, `None` when the key is unscoped.
    pub fn location(&self) -> Option<&str> {
        (self.location_id != DEFAULT_LOCATION).then_some(self.location_id.as_str())
    }

    /// Variant filter for queries, `None` for the main variant.
    pub fn variant(&self) -> Option<&str> {
        (self.variant_id != MAIN_VARIANT).then_some(self.variant_id.as_str())
    }

    /// True when the key is scoped to a location or variant, in which case
    /// base stock comes from `product_stock_levels` instead of `products`.
    pub fn is_scoped(&self) -> bool {
        self.location().is_some() || self.variant().is_some()
    }

    pub fn validate(&self) -> CoreResult<()> {
        validate_product_id(&self.product_id)?;
        Ok(())
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.product_id, self.variant_id, self.location_id)
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Tenant policy deciding whether computed stock may go below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockPolicy {
    pub allow_negative_stock: bool,
    pub allow_overselling: bool,
}

impl StockPolicy {
    /// The policy used when settings cannot be read.
    pub const CLAMPING: StockPolicy = StockPolicy {
        allow_negative_stock: false,
        allow_overselling: false,
    };

    /// Whether results are clamped at zero.
    #[inline]
    pub const fn clamps(&self) -> bool {
        !(self.allow_negative_stock || self.allow_overselling)
    }
}

impl From<BusinessSettings> for StockPolicy {
    fn from(settings: BusinessSettings) -> Self {
        StockPolicy {
            allow_negative_stock: settings.enable_negative_stock,
            allow_overselling: settings.enable_overselling,
        }
    }
}

// =============================================================================
// Components & Result
// =============================================================================

/// The three inputs of the stock formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockComponents {
    pub base_stock: i64,
    pub adjustments: i64,
    pub recent_sales: i64,
}

impl StockComponents {
    /// `base + adjustments − recent_sales`, before policy.
    #[inline]
    pub fn raw(&self) -> i64 {
        self.base_stock
            .saturating_add(self.adjustments)
            .saturating_sub(self.recent_sales)
    }
}

/// Applies the policy to the raw stock number.
pub fn compute_stock(components: &StockComponents, policy: StockPolicy) -> i64 {
    let raw = components.raw();
    if policy.clamps() {
        raw.max(0)
    } else {
        raw
    }
}

/// The computed stock for one key.
///
/// `error` is set when the calculation could not run at all; `stock` is 0 in
/// that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockLevel {
    pub stock: i64,
    pub base_stock: i64,
    pub adjustments: i64,
    pub recent_sales: i64,
    pub error: Option<String>,
}

impl StockLevel {
    pub fn from_components(components: StockComponents, policy: StockPolicy) -> Self {
        StockLevel {
            stock: compute_stock(&components, policy),
            base_stock: components.base_stock,
            adjustments: components.adjustments,
            recent_sales: components.recent_sales,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        StockLevel {
            stock: 0,
            base_stock: 0,
            adjustments: 0,
            recent_sales: 0,
            error: Some(message.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const COMPONENTS: StockComponents = StockComponents {
        base_stock: 5,
        adjustments: -2,
        recent_sales: 10,
    };

    #[test]
    fn test_clamped_to_zero_by_default() {
        assert_eq!(compute_stock(&COMPONENTS, StockPolicy::CLAMPING), 0);
    }

    #[test]
    fn test_overselling_keeps_negative() {
        let policy = StockPolicy {
            allow_negative_stock: false,
            allow_overselling: true,
        };
        assert_eq!(compute_stock(&COMPONENTS, policy), -7);

        let policy = StockPolicy {
            allow_negative_stock: true,
            allow_overselling: false,
        };
        assert_eq!(compute_stock(&COMPONENTS, policy), -7);
    }

    #[test]
    fn test_positive_stock_unaffected_by_policy() {
        let components = StockComponents {
            base_stock: 20,
            adjustments: 3,
            recent_sales: 4,
        };
        assert_eq!(compute_stock(&components, StockPolicy::CLAMPING), 19);
    }

    #[test]
    fn test_key_normalises_placeholders() {
        let a = StockKey::new("p-1", None, None);
        let b = StockKey::new("p-1", Some("default"), Some("main"));
        assert_eq!(a, b);
        assert!(!a.is_scoped());
        assert_eq!(a.to_string(), "p-1_main_default");

        let scoped = StockKey::new("p-1", Some("loc-2"), None);
        assert_eq!(scoped.location(), Some("loc-2"));
        assert_eq!(scoped.variant(), None);
        assert!(scoped.is_scoped());
    }

    #[test]
    fn test_empty_product_is_invalid() {
        assert!(StockKey::new("", None, None).validate().is_err());
    }

    #[test]
    fn test_failed_level() {
        let level = StockLevel::failed("boom");
        assert_eq!(level.stock, 0);
        assert_eq!(level.error.as_deref(), Some("boom"));
    }
}
