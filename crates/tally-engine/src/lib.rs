//! # tally-engine: Stock and Cash Drawer Services for Tally POS
//!
//! The async services the POS front end talks to. Each service is scoped to
//! one tenant (and, for cash, one user) at construction time and reaches the
//! database only through the repositories in tally-db.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          tally-engine                                   │
//! │                                                                         │
//! │  ┌──────────────────────┐          ┌──────────────────────────────┐    │
//! │  │  CashDrawerService   │          │  StockEngine                 │    │
//! │  │                      │          │                              │    │
//! │  │  open / close        │          │  base + adjustments − sales  │    │
//! │  │  record transaction  │          │  TTL cache per StockKey      │    │
//! │  │  transfers, deposits │          │  bulk reads, never fails     │    │
//! │  └──────────┬───────────┘          └──────────────▲───────────────┘    │
//! │             │                                     │                     │
//! │             ▼                                     │ Invalidation        │
//! │  ┌──────────────────────┐          ┌──────────────┴───────────────┐    │
//! │  │  LedgerGateway       │          │  InvalidationBus             │    │
//! │  │  best-effort posting │          │                              │    │
//! │  │  ──► ledger_outbox   │          │  ◄── InventoryWriter         │    │
//! │  └──────────┬───────────┘          └──────────────────────────────┘    │
//! │             ▼                                                           │
//! │  ┌──────────────────────┐                                              │
//! │  │ LedgerRetryProcessor │  background task, drains the outbox          │
//! │  └──────────────────────┘                                              │
//! │                                                                         │
//! │  Notifier: user-facing notices     Clock: injectable time source        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`cash`] - Cash drawer lifecycle and transfer approvals
//! - [`stock`] - Stock calculation with caching
//! - [`inventory`] - Inventory writes that publish invalidations
//! - [`events`] - Invalidation bus
//! - [`ledger`] - Ledger posting and the outbox retry processor
//! - [`config`] - Engine configuration (TOML file + environment)
//! - [`notify`] - User notices
//! - [`clock`] - Time source
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_db::Database;
//! use tally_engine::*;
//!
//! let config = EngineConfig::load_or_default(None);
//! let db = Database::new(config.db_config()).await?;
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!
//! let ledger = LedgerGateway::new(&db, Arc::new(NoOpLedgerPoster), clock.clone());
//! let cash = CashDrawerService::new(
//!     ActorScope::new(config.tenant_id(), "cashier-1"),
//!     db.clone(),
//!     ledger,
//!     Arc::new(TracingNotifier),
//!     clock.clone(),
//!     config.cash.clone(),
//! );
//! cash.ensure_drawer().await?;
//! cash.open_drawer(Money::from_major(100)).await?;
//!
//! let stock = StockEngine::new(
//!     config.tenant_id(),
//!     Arc::new(DbStockSource::new(db.clone())),
//!     clock,
//!     &config.stock,
//! );
//! let (sweeper, _sweeper_handle) = stock.sweeper();
//! tokio::spawn(sweeper.run());
//!
//! let level = stock.calculate_stock("product-1", None, None).await;
//! println!("In stock: {}", level.stock);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cash;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod inventory;
pub mod ledger;
pub mod notify;
pub mod stock;

// =============================================================================
// Re-exports
// =============================================================================

pub use cash::{CashDrawerService, DrawerSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CashSettings, EngineConfig, LedgerSettings, StockSettings};
pub use error::{EngineError, EngineResult};
pub use events::{Invalidation, InvalidationBus, Subscription};
pub use inventory::InventoryWriter;
pub use ledger::{
    LedgerError, LedgerGateway, LedgerPoster, LedgerRetryHandle, LedgerRetryProcessor,
    NoOpLedgerPoster, PostingOutcome, RetryReport,
};
pub use notify::{NoOpNotifier, Notice, Notifier, Severity, TracingNotifier};
pub use stock::{
    DbStockSource, StockCacheSweeper, StockCacheSweeperHandle, StockEngine, StockQuery, StockSource,
};

// Domain types callers need alongside the services
pub use tally_core::{ActorScope, Money, StockLevel, TransferAction};
