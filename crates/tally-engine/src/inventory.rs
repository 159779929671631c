//! # Inventory Writer
//!
//! The inventory mutations that change computed stock. Each successful write
//! publishes an [`Invalidation`] for every product it touched.
//!
//! A write at one location also changes the product's unscoped total, so
//! invalidations always cover every location of the product.

use std::sync::Arc;

use tally_core::{AdjustmentLine, AdjustmentStatus, SaleLine, StockKey};
use tally_db::Database;
use tracing::info;

use crate::clock::Clock;
use crate::error::EngineResult;
use crate::events::{Invalidation, InvalidationBus};

/// Inventory writes for one tenant.
#[derive(Clone)]
pub struct InventoryWriter {
    tenant_id: String,
    db: Database,
    bus: InvalidationBus,
    clock: Arc<dyn Clock>,
}

impl InventoryWriter {
    pub fn new(
        tenant_id: impl Into<String>,
        db: Database,
        bus: InvalidationBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        InventoryWriter {
            tenant_id: tenant_id.into(),
            db,
            bus,
            clock,
        }
    }

    /// Creates or renames a product and sets its base stock.
    pub async fn upsert_product(&self, product_id: &str, name: &str, stock_quantity: i64) -> EngineResult<()> {
        self.db
            .inventory()
            .upsert_product(&self.tenant_id, product_id, name, stock_quantity, self.clock.now())
            .await?;
        self.invalidate([product_id]);
        Ok(())
    }

    /// Sets base stock for a product, or for one location/variant of it.
    pub async fn set_base_stock(
        &self,
        product_id: &str,
        location_id: Option<&str>,
        variant_id: Option<&str>,
        quantity: i64,
    ) -> EngineResult<()> {
        let key = StockKey::new(product_id, location_id, variant_id);
        key.validate()?;

        self.db
            .inventory()
            .set_base_stock(&self.tenant_id, &key, quantity, self.clock.now())
            .await?;
        self.invalidate([product_id]);
        Ok(())
    }

    /// Creates a pending adjustment. Pending adjustments do not affect
    /// stock, so nothing is invalidated.
    pub async fn create_adjustment(
        &self,
        location_id: Option<&str>,
        lines: &[AdjustmentLine],
        reason: Option<&str>,
        created_by: &str,
    ) -> EngineResult<String> {
        for line in lines {
            tally_core::validation::validate_product_id(&line.product_id)?;
        }
        tally_core::validation::validate_reason(reason)?;

        let id = self
            .db
            .inventory()
            .create_adjustment(&self.tenant_id, location_id, lines, reason, created_by, self.clock.now())
            .await?;
        Ok(id)
    }

    pub async fn approve_adjustment(&self, adjustment_id: &str) -> EngineResult<()> {
        self.review(adjustment_id, AdjustmentStatus::Approved).await
    }

    pub async fn reject_adjustment(&self, adjustment_id: &str) -> EngineResult<()> {
        self.review(adjustment_id, AdjustmentStatus::Rejected).await
    }

    /// Records a completed sale. Returns the sale id.
    pub async fn record_sale(&self, location_id: Option<&str>, lines: &[SaleLine]) -> EngineResult<String> {
        for line in lines {
            tally_core::validation::validate_product_id(&line.product_id)?;
        }

        let id = self
            .db
            .inventory()
            .record_sale(&self.tenant_id, location_id, lines, self.clock.now())
            .await?;
        self.invalidate(lines.iter().map(|line| line.product_id.as_str()));
        Ok(id)
    }

    /// Voids a sale so it no longer consumes stock.
    pub async fn void_sale(&self, sale_id: &str) -> EngineResult<()> {
        let products = self.db.inventory().void_sale(&self.tenant_id, sale_id).await?;
        self.invalidate(products.iter().map(String::as_str));
        Ok(())
    }

    async fn review(&self, adjustment_id: &str, status: AdjustmentStatus) -> EngineResult<()> {
        let products = self
            .db
            .inventory()
            .review_adjustment(&self.tenant_id, adjustment_id, status, self.clock.now())
            .await?;

        info!(adjustment_id = %adjustment_id, status = status.as_str(), "Adjustment reviewed");

        // A rejection leaves stock unchanged
        if status == AdjustmentStatus::Approved {
            self.invalidate(products.iter().map(String::as_str));
        }
        Ok(())
    }

    fn invalidate<'a>(&self, products: impl IntoIterator<Item = &'a str>) {
        let mut seen: Vec<&str> = Vec::new();
        for product_id in products {
            if seen.contains(&product_id) {
                continue;
            }
            seen.push(product_id);
            self.bus.publish(&Invalidation::product(self.tenant_id.as_str(), product_id));
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
