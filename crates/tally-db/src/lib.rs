//! # tally-db: Database Layer for Tally POS
//!
//! This crate provides database access for the cash drawer and stock
//! engines. It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Data Flow                              │
//! │                                                                         │
//! │  CashDrawerService / StockEngine (tally-engine)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ DrawerRepo    │    │ 001_cash     │  │   │
//! │  │   │ SqlitePool    │◄───│ TransferRepo  │    │ 002_inventory│  │   │
//! │  │   │ Connection    │    │ InventoryRepo │    │ 003_ledger   │  │   │
//! │  │   │ Management    │    │ LedgerOutbox  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/tally.db")).await?;
//!
//! let drawer = db.drawers().get_active_for_user(&tenant, &user).await?;
//! let outcome = db.transfers()
//!     .process(&tenant, &request_id, TransferAction::Approved, &user, Utc::now())
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::bank_transfer::BankTransferRepository;
pub use repository::drawer::DrawerRepository;
pub use repository::inventory::InventoryRepository;
pub use repository::ledger_outbox::LedgerOutboxRepository;
pub use repository::settings::SettingsRepository;
pub use repository::transaction::TransactionRepository;
pub use repository::transfer::TransferRepository;
