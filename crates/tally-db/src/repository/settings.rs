//! # Business Settings Repository
//!
//! Tenant-level inventory policy read by the stock engine.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use tally_core::{BusinessSettings, StockPolicy};

/// Repository for `business_settings`.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Creates a new SettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Gets the tenant's settings row, if one exists.
    pub async fn get(&self, tenant_id: &str) -> DbResult<Option<BusinessSettings>> {
        let settings = sqlx::query_as::<_, BusinessSettings>(
            "SELECT enable_negative_stock, enable_overselling
             FROM business_settings WHERE tenant_id = ?1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings)
    }

    /// The stock policy for a tenant. Tenants without a settings row clamp.
    pub async fn stock_policy(&self, tenant_id: &str) -> DbResult<StockPolicy> {
        let policy = self
            .get(tenant_id)
            .await?
            .map(StockPolicy::from)
            .unwrap_or(StockPolicy::CLAMPING);

        debug!(tenant_id = %tenant_id, clamps = policy.clamps(), "Loaded stock policy");
        Ok(policy)
    }

    /// Creates or replaces the tenant's settings.
    pub async fn upsert(
        &self,
        tenant_id: &str,
        settings: BusinessSettings,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO business_settings (tenant_id, enable_negative_stock, enable_overselling, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (tenant_id) DO UPDATE SET
                enable_negative_stock = excluded.enable_negative_stock,
                enable_overselling = excluded.enable_overselling,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(settings.enable_negative_stock)
        .bind(settings.enable_overselling)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
