//! # tally-core: Pure Business Logic for Tally POS
//!
//! Domain types and rules for the cash drawer subsystem and the stock
//! calculation engine. Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 tally-engine (services)                         │   │
//! │  │   StockEngine • CashDrawerService • LedgerGateway               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │  drawer   │  │   stock   │  │   │
//! │  │   │ CashDrawer│  │   Money   │  │ lifecycle │  │  formula  │  │   │
//! │  │   │ Transfer  │  │           │  │ overdraw  │  │  clamping │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (CashDrawer, CashTransaction, transfer requests)
//! - [`money`] - Signed integer money
//! - [`drawer`] - Drawer lifecycle and overdraw rules
//! - [`stock`] - Stock keys, components and the clamping formula
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::Money;
//! use tally_core::drawer::check_sufficient_funds;
//!
//! let balance = Money::from_cents(15_000);
//! assert!(check_sufficient_funds(balance, Money::from_cents(12_000)).is_ok());
//! assert!(check_sufficient_funds(balance, Money::from_cents(20_000)).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod drawer;
pub mod error;
pub mod money;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use stock::{StockComponents, StockKey, StockLevel, StockPolicy};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// How long a computed stock level stays fresh in the cache.
pub const DEFAULT_STOCK_CACHE_TTL_SECS: u64 = 30;

/// Trailing window of sales subtracted from base stock.
///
/// Base stock is assumed to be reconciled against older sales by a separate
/// process; the window only covers sales not yet folded in. Configurable.
pub const DEFAULT_RECENT_SALES_WINDOW_HOURS: u64 = 24;

/// Number of recent cash transactions loaded for the drawer view.
pub const DEFAULT_TRANSACTION_HISTORY_LIMIT: u32 = 50;

/// Placeholder variant id used in stock keys when none is given.
pub const MAIN_VARIANT: &str = "main";

/// Placeholder location id used in stock keys when none is given.
pub const DEFAULT_LOCATION: &str = "default";
