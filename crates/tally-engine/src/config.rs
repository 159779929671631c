//! # Engine Configuration
//!
//! Configuration management for the stock and cash services.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_TENANT_ID=store-7                                            │
//! │     TALLY_DATABASE_PATH=/var/lib/tally/tally.db                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally-pos/engine.toml (Linux)                            │
//! │     ~/Library/Application Support/com.tally.pos/engine.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [tenant]
//! id = "store-7"
//!
//! [database]
//! path = "tally.db"
//! max_connections = 5
//!
//! [stock]
//! cache_ttl_secs = 30
//! recent_sales_window_hours = 24
//!
//! [cash]
//! transaction_history_limit = 50
//!
//! [ledger]
//! retry_interval_secs = 30
//! batch_size = 50
//! max_attempts = 10
//! ```

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tally_core::{
    DEFAULT_RECENT_SALES_WINDOW_HOURS, DEFAULT_STOCK_CACHE_TTL_SECS,
    DEFAULT_TRANSACTION_HISTORY_LIMIT,
};
use tally_db::DbConfig;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Tenant
// =============================================================================

/// The tenant this engine instance serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        TenantConfig {
            id: "default".to_string(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Where the SQLite database lives and how big its pool is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Relative paths resolve against the platform data dir.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SQLite lock wait for writers (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tally.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Stock
// =============================================================================

/// Stock calculation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSettings {
    /// How long a computed stock level stays fresh (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Trailing window of sales subtracted from base stock (hours).
    #[serde(default = "default_sales_window")]
    pub recent_sales_window_hours: u64,
}

fn default_cache_ttl() -> u64 {
    DEFAULT_STOCK_CACHE_TTL_SECS
}

fn default_sales_window() -> u64 {
    DEFAULT_RECENT_SALES_WINDOW_HOURS
}

impl Default for StockSettings {
    fn default() -> Self {
        StockSettings {
            cache_ttl_secs: default_cache_ttl(),
            recent_sales_window_hours: default_sales_window(),
        }
    }
}

impl StockSettings {
    pub fn cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.cache_ttl_secs as i64)
    }

    pub fn recent_sales_window(&self) -> ChronoDuration {
        ChronoDuration::hours(self.recent_sales_window_hours as i64)
    }
}

// =============================================================================
// Cash
// =============================================================================

/// Cash drawer service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashSettings {
    /// Number of recent transactions kept in the drawer snapshot.
    #[serde(default = "default_history_limit")]
    pub transaction_history_limit: u32,
}

fn default_history_limit() -> u32 {
    DEFAULT_TRANSACTION_HISTORY_LIMIT
}

impl Default for CashSettings {
    fn default() -> Self {
        CashSettings {
            transaction_history_limit: default_history_limit(),
        }
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Ledger retry processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Interval between outbox drains (seconds).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Entries posted per drain.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts before an entry is left as a dead letter.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_interval() -> u64 {
    30
}

fn default_batch_size() -> u32 {
    50
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            retry_interval_secs: default_retry_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl LedgerSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub tenant: TenantConfig,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub stock: StockSettings,

    #[serde(default)]
    pub cash: CashSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.tenant.id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("tenant.id must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.stock.recent_sales_window_hours == 0 {
            return Err(EngineError::InvalidConfig(
                "stock.recent_sales_window_hours must be greater than 0".into(),
            ));
        }

        if self.cash.transaction_history_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "cash.transaction_history_limit must be greater than 0".into(),
            ));
        }

        if self.ledger.batch_size == 0 || self.ledger.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "ledger.batch_size and ledger.max_attempts must be greater than 0".into(),
            ));
        }

        if self.ledger.retry_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "ledger.retry_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `TALLY_*` overrides read through `var`.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("TALLY_TENANT_ID") {
            debug!(tenant_id = %id, "Overriding tenant from environment");
            self.tenant.id = id;
        }

        if let Some(path) = var("TALLY_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(max) = var("TALLY_DATABASE_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(max) => self.database.max_connections = max,
                Err(_) => warn!(value = %max, "Ignoring invalid TALLY_DATABASE_MAX_CONNECTIONS"),
            }
        }

        if let Some(ttl) = var("TALLY_STOCK_CACHE_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(ttl) => self.stock.cache_ttl_secs = ttl,
                Err(_) => warn!(value = %ttl, "Ignoring invalid TALLY_STOCK_CACHE_TTL_SECS"),
            }
        }

        if let Some(hours) = var("TALLY_STOCK_SALES_WINDOW_HOURS") {
            match hours.parse::<u64>() {
                Ok(hours) => self.stock.recent_sales_window_hours = hours,
                Err(_) => warn!(value = %hours, "Ignoring invalid TALLY_STOCK_SALES_WINDOW_HOURS"),
            }
        }

        if let Some(attempts) = var("TALLY_LEDGER_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(attempts) => self.ledger.max_attempts = attempts,
                Err(_) => warn!(value = %attempts, "Ignoring invalid TALLY_LEDGER_MAX_ATTEMPTS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "tally", "pos")
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    /// The database file, resolved against the platform data dir when the
    /// configured path is relative.
    pub fn database_path(&self) -> PathBuf {
        if self.database.path.is_absolute() {
            return self.database.path.clone();
        }
        match Self::project_dirs() {
            Some(dirs) => dirs.data_dir().join(&self.database.path),
            None => self.database.path.clone(),
        }
    }

    /// Pool configuration for [`tally_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database_path())
            .max_connections(self.database.max_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stock.cache_ttl_secs, 30);
        assert_eq!(config.stock.recent_sales_window_hours, 24);
        assert_eq!(config.cash.transaction_history_limit, 50);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [tenant]
            id = "store-7"

            [stock]
            recent_sales_window_hours = 48
            "#,
        )
        .unwrap();

        assert_eq!(config.tenant_id(), "store-7");
        assert_eq!(config.stock.recent_sales_window_hours, 48);
        assert_eq!(config.stock.cache_ttl_secs, 30);
        assert_eq!(config.ledger.max_attempts, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.tenant.id = "  ".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        config.tenant.id = "store-7".to_string();
        config.stock.recent_sales_window_hours = 0;
        assert!(config.validate().is_err());

        config.stock.recent_sales_window_hours = 12;
        config.ledger.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_win_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("TALLY_TENANT_ID", "store-9"),
            ("TALLY_DATABASE_PATH", "/tmp/tally.db"),
            ("TALLY_STOCK_CACHE_TTL_SECS", "five"),
            ("TALLY_LEDGER_MAX_ATTEMPTS", "3"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.tenant_id(), "store-9");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/tally.db"));
        assert_eq!(config.stock.cache_ttl_secs, 30);
        assert_eq!(config.ledger.max_attempts, 3);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let mut config = EngineConfig::default();
        config.tenant.id = "store-7".to_string();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[tenant]"));
        assert!(contents.contains("[ledger]"));

        let loaded = EngineConfig::from_toml(&contents).unwrap();
        assert_eq!(loaded.tenant_id(), "store-7");
    }
}
