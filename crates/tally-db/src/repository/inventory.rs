//! # Inventory Repository
//!
//! Reads the three stock components and performs the inventory writes that
//! change them.
//!
//! ## Component Queries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  base_stock            unscoped key → products.stock_quantity          │
//! │                        scoped key   → Σ product_stock_levels.quantity  │
//! │                                       matching variant / location      │
//! │                                                                         │
//! │  approved_adjustments  Σ stock_adjustment_items.quantity               │
//! │                        JOIN stock_adjustments WHERE status='approved'  │
//! │                                                                         │
//! │  sales_since           Σ sale_items.quantity                           │
//! │                        JOIN sales WHERE status='completed'             │
//! │                                 AND created_at >= since                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A key with no variant or location matches every variant or location;
//! `(?n IS NULL OR column = ?n)` implements that in one statement.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tally_core::{
    AdjustmentLine, AdjustmentStatus, CoreError, SaleLine, StockKey, DEFAULT_LOCATION,
    MAIN_VARIANT,
};

/// Repository for the inventory tables.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    // =========================================================================
    // Component reads
    // =========================================================================

    /// Base stock for the key. Unknown products have zero.
    pub async fn base_stock(&self, tenant_id: &str, key: &StockKey) -> DbResult<i64> {
        let quantity = if key.is_scoped() {
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COALESCE(SUM(quantity), 0) FROM product_stock_levels
                WHERE tenant_id = ?1 AND product_id = ?2
                  AND (?3 IS NULL OR variant_id = ?3)
                  AND (?4 IS NULL OR location_id = ?4)
                "#,
            )
            .bind(tenant_id)
            .bind(&key.product_id)
            .bind(key.variant())
            .bind(key.location())
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar::<_, i64>(
                "SELECT stock_quantity FROM products WHERE id = ?1 AND tenant_id = ?2",
            )
            .bind(&key.product_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .unwrap_or(0)
        };

        debug!(key = %key, base_stock = quantity, "Read base stock");
        Ok(quantity)
    }

    /// Σ quantities of approved adjustments for the key.
    ///
    /// Pending and rejected adjustments never count.
    pub async fn approved_adjustments(&self, tenant_id: &str, key: &StockKey) -> DbResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(i.quantity), 0)
            FROM stock_adjustment_items i
            INNER JOIN stock_adjustments a ON a.id = i.adjustment_id
            WHERE a.tenant_id = ?1 AND a.status = 'approved' AND i.product_id = ?2
              AND (?3 IS NULL OR i.variant_id = ?3)
              AND (?4 IS NULL OR a.location_id = ?4)
            "#,
        )
        .bind(tenant_id)
        .bind(&key.product_id)
        .bind(key.variant())
        .bind(key.location())
        .fetch_one(&self.pool)
        .await?;

        debug!(key = %key, adjustments = total, "Read approved adjustments");
        Ok(total)
    }

    /// Σ quantities sold for the key at or after `since`. Voided sales are
    /// excluded.
    pub async fn sales_since(
        &self,
        tenant_id: &str,
        key: &StockKey,
        since: DateTime<Utc>,
    ) -> DbResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(i.quantity), 0)
            FROM sale_items i
            INNER JOIN sales s ON s.id = i.sale_id
            WHERE s.tenant_id = ?1 AND s.status = 'completed' AND i.product_id = ?2
              AND (?3 IS NULL OR i.variant_id = ?3)
              AND (?4 IS NULL OR s.location_id = ?4)
              AND s.created_at >= ?5
            "#,
        )
        .bind(tenant_id)
        .bind(&key.product_id)
        .bind(key.variant())
        .bind(key.location())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        debug!(key = %key, recent_sales = total, "Read recent sales");
        Ok(total)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates or renames a product and sets its base stock.
    pub async fn upsert_product(
        &self,
        tenant_id: &str,
        product_id: &str,
        name: &str,
        stock_quantity: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, tenant_id, name, stock_quantity, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                stock_quantity = excluded.stock_quantity,
                updated_at = excluded.updated_at
            WHERE products.tenant_id = excluded.tenant_id
            "#,
        )
        .bind(product_id)
        .bind(tenant_id)
        .bind(name)
        .bind(stock_quantity)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sets the base stock for a key: the product row when unscoped, the
    /// per variant/location level otherwise.
    pub async fn set_base_stock(
        &self,
        tenant_id: &str,
        key: &StockKey,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        if key.is_scoped() {
            sqlx::query(
                r#"
                INSERT INTO product_stock_levels (tenant_id, product_id, variant_id, location_id, quantity, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (tenant_id, product_id, variant_id, location_id) DO UPDATE SET
                    quantity = excluded.quantity,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(tenant_id)
            .bind(&key.product_id)
            .bind(&key.variant_id)
            .bind(&key.location_id)
            .bind(quantity)
            .bind(now)
            .execute(&self.pool)
            .await?;
        } else {
            let result = sqlx::query(
                "UPDATE products SET stock_quantity = ?1, updated_at = ?2
                 WHERE id = ?3 AND tenant_id = ?4",
            )
            .bind(quantity)
            .bind(now)
            .bind(&key.product_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::not_found("Product", &key.product_id));
            }
        }

        info!(key = %key, quantity = quantity, "Base stock set");
        Ok(())
    }

    /// Creates a pending adjustment with its lines. Returns the adjustment id.
    pub async fn create_adjustment(
        &self,
        tenant_id: &str,
        location_id: Option<&str>,
        lines: &[AdjustmentLine],
        reason: Option<&str>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO stock_adjustments (id, tenant_id, location_id, status, reason, created_by, created_at)
            VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(location_id.unwrap_or(DEFAULT_LOCATION))
        .bind(reason)
        .bind(created_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO stock_adjustment_items (id, adjustment_id, product_id, variant_id, quantity)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(&line.product_id)
            .bind(line.variant_id.as_deref().unwrap_or(MAIN_VARIANT))
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(adjustment_id = %id, lines = lines.len(), "Stock adjustment created");
        Ok(id)
    }

    /// Moves a pending adjustment to approved or rejected.
    ///
    /// Returns the distinct product ids on the adjustment.
    pub async fn review_adjustment(
        &self,
        tenant_id: &str,
        adjustment_id: &str,
        status: AdjustmentStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE stock_adjustments SET status = ?1, reviewed_at = ?2
             WHERE id = ?3 AND tenant_id = ?4 AND status = 'pending'",
        )
        .bind(status)
        .bind(now)
        .bind(adjustment_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<AdjustmentStatus> = sqlx::query_scalar(
                "SELECT status FROM stock_adjustments WHERE id = ?1 AND tenant_id = ?2",
            )
            .bind(adjustment_id)
            .bind(tenant_id)
            .fetch_optional(&mut *tx)
            .await?;

            return Err(match current {
                Some(current) => DbError::Domain(CoreError::RequestNotPending {
                    request_id: adjustment_id.to_string(),
                    status: current.as_str().to_string(),
                }),
                None => DbError::not_found("StockAdjustment", adjustment_id),
            });
        }

        let products: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT product_id FROM stock_adjustment_items WHERE adjustment_id = ?1",
        )
        .bind(adjustment_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(adjustment_id = %adjustment_id, status = ?status, "Stock adjustment reviewed");
        Ok(products)
    }

    /// Records a completed sale. Returns the sale id.
    pub async fn record_sale(
        &self,
        tenant_id: &str,
        location_id: Option<&str>,
        lines: &[SaleLine],
        now: DateTime<Utc>,
    ) -> DbResult<String> {
        let id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sales (id, tenant_id, location_id, status, created_at)
             VALUES (?1, ?2, ?3, 'completed', ?4)",
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(location_id.unwrap_or(DEFAULT_LOCATION))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in lines {
            sqlx::query(
                "INSERT INTO sale_items (id, sale_id, product_id, variant_id, quantity)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(&line.product_id)
            .bind(line.variant_id.as_deref().unwrap_or(MAIN_VARIANT))
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(sale_id = %id, lines = lines.len(), "Sale recorded");
        Ok(id)
    }

    /// Voids a completed sale. Returns the distinct product ids on it.
    pub async fn void_sale(&self, tenant_id: &str, sale_id: &str) -> DbResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE sales SET status = 'voided'
             WHERE id = ?1 AND tenant_id = ?2 AND status = 'completed'",
        )
        .bind(sale_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", sale_id));
        }

        let products: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT product_id FROM sale_items WHERE sale_id = ?1")
                .bind(sale_id)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;
        info!(sale_id = %sale_id, "Sale voided");
        Ok(products)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
