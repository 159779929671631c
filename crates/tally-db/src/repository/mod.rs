//! # Repository Module
//!
//! Database repository implementations for Tally POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  CashDrawerService                                                     │
//! │       │                                                                 │
//! │       │  db.transfers().process(tenant, id, Approved, user, now)       │
//! │       ▼                                                                 │
//! │  TransferRepository                                                    │
//! │  ├── create(&self, ...)        status forced to 'pending'              │
//! │  ├── process(&self, ...)       ONE SQL transaction:                    │
//! │  │                              guarded status → guarded debit →       │
//! │  │                              credit → transfer_out/transfer_in rows │
//! │  └── list_for_user(&self, ...)                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Every query is scoped by tenant_id.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`DrawerRepository`](drawer::DrawerRepository) - Drawer lifecycle
//! - [`TransactionRepository`](transaction::TransactionRepository) - Audit trail and atomic increments
//! - [`TransferRepository`](transfer::TransferRepository) - Drawer to drawer transfers
//! - [`BankTransferRepository`](bank_transfer::BankTransferRepository) - Bank deposits
//! - [`InventoryRepository`](inventory::InventoryRepository) - Stock components
//! - [`SettingsRepository`](settings::SettingsRepository) - Tenant stock policy
//! - [`LedgerOutboxRepository`](ledger_outbox::LedgerOutboxRepository) - Ledger retry queue

pub mod bank_transfer;
pub mod drawer;
pub mod inventory;
pub mod ledger_outbox;
pub mod settings;
pub mod transaction;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::pool::{Database, DbConfig};
    use tally_core::{CashDrawer, Money};

    pub const TENANT: &str = "tenant-1";

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    /// Inserts a drawer for `user` and opens it with `opening` cents.
    pub async fn open_drawer(db: &Database, user: &str, opening: i64) -> CashDrawer {
        let drawer = db
            .drawers()
            .insert(TENANT, user, &format!("{user} drawer"), None, at(0))
            .await
            .unwrap();
        let (drawer, _) = db
            .drawers()
            .open(TENANT, &drawer.id, Money::from_cents(opening), user, at(1))
            .await
            .unwrap();
        drawer
    }
}
