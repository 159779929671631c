//! # Stock Calculation Engine
//!
//! One on-hand number per (product, variant, location), derived from three
//! components and the tenant's negative-stock policy, cached with a TTL.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  calculate_stock(product, location?, variant?)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StockKey::new(..).validate() ── Err ──► StockLevel::failed(msg)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  cache hit and age < ttl? ── yes ──► cached StockLevel (no reads)      │
//! │       │ no (expired entries are purged)                                 │
//! │       ▼                                                                 │
//! │  ┌───────────────────────── concurrently ─────────────────────────┐    │
//! │  │ base_stock │ approved_adjustments │ sales_since(now − window) │    │
//! │  │ stock_policy                                                   │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! │       │  a failed read is logged and counts as 0                        │
//! │       │  (policy falls back to clamping)                                │
//! │       ▼                                                                 │
//! │  StockLevel::from_components ── cached only if every read succeeded    │
//! │                                  and no clear ran during the reads     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cache lock is a `std::sync::Mutex` and is never held across an
//! `.await`. Every clear bumps a generation counter under that lock; a
//! calculation stores its result only if the generation it saw before its
//! reads is still current.
//!
//! Expired entries are dropped when read, on every insert, and by the
//! [`StockCacheSweeper`] background task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use tally_core::{StockComponents, StockKey, StockLevel, StockPolicy};
use tally_db::Database;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::StockSettings;
use crate::error::{EngineError, EngineResult};
use crate::events::{Invalidation, InvalidationBus, Subscription};

// =============================================================================
// Source
// =============================================================================

/// Where stock components come from.
#[async_trait]
pub trait StockSource: Send + Sync {
    async fn base_stock(&self, tenant_id: &str, key: &StockKey) -> EngineResult<i64>;

    async fn approved_adjustments(&self, tenant_id: &str, key: &StockKey) -> EngineResult<i64>;

    async fn sales_since(
        &self,
        tenant_id: &str,
        key: &StockKey,
        since: DateTime<Utc>,
    ) -> EngineResult<i64>;

    async fn stock_policy(&self, tenant_id: &str) -> EngineResult<StockPolicy>;
}

/// Reads components from the inventory tables.
#[derive(Debug, Clone)]
pub struct DbStockSource {
    db: Database,
}

impl DbStockSource {
    pub fn new(db: Database) -> Self {
        DbStockSource { db }
    }
}

#[async_trait]
impl StockSource for DbStockSource {
    async fn base_stock(&self, tenant_id: &str, key: &StockKey) -> EngineResult<i64> {
        Ok(self.db.inventory().base_stock(tenant_id, key).await?)
    }

    async fn approved_adjustments(&self, tenant_id: &str, key: &StockKey) -> EngineResult<i64> {
        Ok(self.db.inventory().approved_adjustments(tenant_id, key).await?)
    }

    async fn sales_since(
        &self,
        tenant_id: &str,
        key: &StockKey,
        since: DateTime<Utc>,
    ) -> EngineResult<i64> {
        Ok(self.db.inventory().sales_since(tenant_id, key, since).await?)
    }

    async fn stock_policy(&self, tenant_id: &str) -> EngineResult<StockPolicy> {
        Ok(self.db.settings().stock_policy(tenant_id).await?)
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CachedStock {
    level: StockLevel,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StockCache {
    entries: Mutex<HashMap<StockKey, CachedStock>>,
    /// Bumped under the `entries` lock by every clear.
    generation: AtomicU64,
}

impl StockCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<StockKey, CachedStock>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

fn is_fresh(cached: &CachedStock, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - cached.cached_at < ttl
}

/// Removes entries for `product_id` (every variant) at `location_id`, or at
/// every location when none is given. No product clears everything.
fn clear_matching(cache: &StockCache, product_id: Option<&str>, location_id: Option<&str>) -> usize {
    let mut entries = cache.lock();
    cache.generation.fetch_add(1, Ordering::SeqCst);
    let before = entries.len();
    match product_id {
        None => entries.clear(),
        Some(product_id) => {
            entries.retain(|key, _| {
                let product_matches = key.product_id == product_id;
                let location_matches = location_id.map_or(true, |loc| key.location_id == loc);
                !(product_matches && location_matches)
            });
        }
    }
    before - entries.len()
}

/// Drops every entry older than `ttl`.
fn evict_expired(cache: &StockCache, now: DateTime<Utc>, ttl: Duration) -> usize {
    let mut entries = cache.lock();
    let before = entries.len();
    entries.retain(|_, cached| is_fresh(cached, now, ttl));
    before - entries.len()
}

// =============================================================================
// Sweeper
// =============================================================================

/// Background task that periodically drops expired cache entries, so keys
/// that are never read again do not stay in memory.
///
/// Holds the cache weakly and stops on its own once every engine sharing
/// that cache is gone.
pub struct StockCacheSweeper {
    cache: Weak<StockCache>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a [`StockCacheSweeper`].
#[derive(Clone)]
pub struct StockCacheSweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl StockCacheSweeperHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Shutdown channel closed".into()))
    }
}

impl StockCacheSweeper {
    /// Sweeps once per TTL, and at least once per second.
    fn period(&self) -> StdDuration {
        self.ttl
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            .max(StdDuration::from_secs(1))
    }

    /// Runs the sweep loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(cache) = self.cache.upgrade() else {
                        debug!("Stock cache dropped, sweeper exiting");
                        break;
                    };
                    let removed = evict_expired(&cache, self.clock.now(), self.ttl);
                    if removed > 0 {
                        debug!(removed, "Expired stock entries swept");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Stock cache sweeper shutting down");
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// One product lookup in a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockQuery {
    pub product_id: String,
    pub location_id: Option<String>,
    pub variant_id: Option<String>,
}

impl StockQuery {
    pub fn new(product_id: impl Into<String>) -> Self {
        StockQuery {
            product_id: product_id.into(),
            location_id: None,
            variant_id: None,
        }
    }

    pub fn at(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    pub fn variant(mut self, variant_id: impl Into<String>) -> Self {
        self.variant_id = Some(variant_id.into());
        self
    }

    fn key(&self) -> StockKey {
        StockKey::new(
            self.product_id.as_str(),
            self.location_id.as_deref(),
            self.variant_id.as_deref(),
        )
    }
}

/// Computes and caches stock levels for one tenant.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct StockEngine {
    tenant_id: String,
    source: Arc<dyn StockSource>,
    clock: Arc<dyn Clock>,
    cache: Arc<StockCache>,
    ttl: Duration,
    sales_window: Duration,
}

impl StockEngine {
    pub fn new(
        tenant_id: impl Into<String>,
        source: Arc<dyn StockSource>,
        clock: Arc<dyn Clock>,
        settings: &StockSettings,
    ) -> Self {
        StockEngine {
            tenant_id: tenant_id.into(),
            source,
            clock,
            cache: Arc::new(StockCache::default()),
            ttl: settings.cache_ttl(),
            sales_window: settings.recent_sales_window(),
        }
    }

    /// Computes the stock level for a product, optionally scoped to a
    /// location and variant.
    ///
    /// Never fails: component read failures count as zero, and a key that
    /// cannot be calculated at all yields `stock: 0` with `error` set.
    pub async fn calculate_stock(
        &self,
        product_id: &str,
        location_id: Option<&str>,
        variant_id: Option<&str>,
    ) -> StockLevel {
        let key = StockKey::new(product_id, location_id, variant_id);
        self.calculate_for_key(key).await
    }

    /// Computes many stock levels concurrently. One failing key never
    /// affects the others.
    pub async fn calculate_bulk_stock(&self, queries: &[StockQuery]) -> HashMap<StockKey, StockLevel> {
        let keys: Vec<StockKey> = queries.iter().map(StockQuery::key).collect();
        let levels = join_all(keys.iter().cloned().map(|key| self.calculate_for_key(key))).await;
        keys.into_iter().zip(levels).collect()
    }

    /// Removes cached entries. See [`Invalidation`] for how `None` widens
    /// the match.
    pub fn clear_cache(&self, product_id: Option<&str>, location_id: Option<&str>) {
        let removed = clear_matching(&self.cache, product_id, location_id);
        debug!(?product_id, ?location_id, removed, "Stock cache cleared");
    }

    /// Peeks at the cache. `None` on a miss or an expired entry.
    pub fn get_cached_stock(
        &self,
        product_id: &str,
        location_id: Option<&str>,
        variant_id: Option<&str>,
    ) -> Option<i64> {
        let key = StockKey::new(product_id, location_id, variant_id);
        self.fresh(&key).map(|level| level.stock)
    }

    /// Number of entries currently cached, fresh or not.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drops every expired entry now. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        evict_expired(&self.cache, self.clock.now(), self.ttl)
    }

    /// Creates a sweeper for this engine's cache and a handle to stop it.
    pub fn sweeper(&self) -> (StockCacheSweeper, StockCacheSweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = StockCacheSweeper {
            cache: Arc::downgrade(&self.cache),
            clock: self.clock.clone(),
            ttl: self.ttl,
            shutdown_rx,
        };
        (sweeper, StockCacheSweeperHandle { shutdown_tx })
    }

    /// Subscribes this engine's cache to `bus`. Invalidations for other
    /// tenants are ignored. The engine listens until the returned
    /// subscription is dropped.
    pub fn attach(&self, bus: &InvalidationBus) -> Subscription {
        let cache = Arc::downgrade(&self.cache);
        let tenant_id = self.tenant_id.clone();
        bus.subscribe(move |inv: &Invalidation| {
            if inv.tenant_id != tenant_id {
                return;
            }
            if let Some(cache) = cache.upgrade() {
                let removed = clear_matching(&cache, inv.product_id.as_deref(), inv.location_id.as_deref());
                debug!(product_id = ?inv.product_id, removed, "Stock cache invalidated");
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Fresh cached level for `key`; purges it when expired.
    fn fresh(&self, key: &StockKey) -> Option<StockLevel> {
        let now = self.clock.now();
        let mut entries = self.cache.lock();
        match entries.get(key) {
            Some(cached) if is_fresh(cached, now, self.ttl) => Some(cached.level.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Caches `level` unless a clear ran since `generation` was read.
    /// Sweeps expired entries while the lock is held.
    fn store(&self, key: StockKey, level: &StockLevel, generation: u64, now: DateTime<Utc>) {
        let mut entries = self.cache.lock();
        if self.cache.generation() != generation {
            debug!(key = %key, "Stock cache cleared during calculation, not storing");
            return;
        }
        entries.retain(|_, cached| is_fresh(cached, now, self.ttl));
        entries.insert(
            key,
            CachedStock {
                level: level.clone(),
                cached_at: now,
            },
        );
    }

    async fn calculate_for_key(&self, key: StockKey) -> StockLevel {
        if let Err(e) = key.validate() {
            warn!(key = %key, error = %e, "Stock calculation rejected");
            return StockLevel::failed(e.to_string());
        }

        if let Some(level) = self.fresh(&key) {
            debug!(key = %key, stock = level.stock, "Stock cache hit");
            return level;
        }

        let generation = self.cache.generation();
        let now = self.clock.now();
        let since = now - self.sales_window;
        let tenant = self.tenant_id.as_str();

        let (base, adjustments, sales, policy) = tokio::join!(
            self.source.base_stock(tenant, &key),
            self.source.approved_adjustments(tenant, &key),
            self.source.sales_since(tenant, &key, since),
            self.source.stock_policy(tenant),
        );

        let mut degraded = false;
        let mut component = |name: &str, result: EngineResult<i64>| match result {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, component = name, error = %e, "Stock component read failed, using 0");
                degraded = true;
                0
            }
        };
        let components = StockComponents {
            base_stock: component("base_stock", base),
            adjustments: component("adjustments", adjustments),
            recent_sales: component("recent_sales", sales),
        };

        let policy = match policy {
            Ok(policy) => policy,
            Err(e) => {
                warn!(key = %key, error = %e, "Stock policy read failed, clamping");
                degraded = true;
                StockPolicy::CLAMPING
            }
        };

        let level = StockLevel::from_components(components, policy);
        debug!(
            key = %key,
            stock = level.stock,
            base_stock = level.base_stock,
            adjustments = level.adjustments,
            recent_sales = level.recent_sales,
            degraded,
            "Stock calculated"
        );

        if !degraded {
            self.store(key, &level, generation, now);
        }
        level
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::EngineError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tally_db::DbError;

    const TENANT: &str = "tenant-1";

    /// Fixed components per product; counts reads; fails for product "bad".
    struct FakeSource {
        components: HashMap<String, StockComponents>,
        policy: StockPolicy,
        reads: AtomicUsize,
        failing_policy: bool,
    }

    impl FakeSource {
        fn new(policy: StockPolicy) -> Self {
            let mut components = HashMap::new();
            components.insert(
                "p-1".to_string(),
                StockComponents {
                    base_stock: 5,
                    adjustments: -2,
                    recent_sales: 10,
                },
            );
            components.insert(
                "p-2".to_string(),
                StockComponents {
                    base_stock: 40,
                    adjustments: 5,
                    recent_sales: 3,
                },
            );
            FakeSource {
                components,
                policy,
                reads: AtomicUsize::new(0),
                failing_policy: false,
            }
        }

        fn get(&self, key: &StockKey) -> EngineResult<StockComponents> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if key.product_id == "bad" {
                return Err(EngineError::Db(DbError::QueryFailed("disk I/O error".into())));
            }
            Ok(self.components.get(&key.product_id).copied().unwrap_or_default())
        }
    }

    #[async_trait]
    impl StockSource for FakeSource {
        async fn base_stock(&self, _: &str, key: &StockKey) -> EngineResult<i64> {
            Ok(self.get(key)?.base_stock)
        }

        async fn approved_adjustments(&self, _: &str, key: &StockKey) -> EngineResult<i64> {
            Ok(self.get(key)?.adjustments)
        }

        async fn sales_since(&self, _: &str, key: &StockKey, _: DateTime<Utc>) -> EngineResult<i64> {
            Ok(self.get(key)?.recent_sales)
        }

        async fn stock_policy(&self, _: &str) -> EngineResult<StockPolicy> {
            if self.failing_policy {
                return Err(EngineError::Db(DbError::PoolExhausted));
            }
            Ok(self.policy)
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()))
    }

    fn engine(source: Arc<FakeSource>, clock: Arc<ManualClock>) -> StockEngine {
        StockEngine::new(TENANT, source, clock, &StockSettings::default())
    }

    const OVERSELLING: StockPolicy = StockPolicy {
        allow_negative_stock: false,
        allow_overselling: true,
    };

    #[tokio::test]
    async fn test_clamps_unless_policy_allows_negative() {
        let clamped = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock());
        let level = clamped.calculate_stock("p-1", None, None).await;
        assert_eq!(level.stock, 0);
        assert_eq!((level.base_stock, level.adjustments, level.recent_sales), (5, -2, 10));
        assert!(level.error.is_none());

        let overselling = engine(Arc::new(FakeSource::new(OVERSELLING)), clock());
        assert_eq!(overselling.calculate_stock("p-1", None, None).await.stock, -7);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_reads_until_cleared_or_expired() {
        let source = Arc::new(FakeSource::new(StockPolicy::CLAMPING));
        let clock = clock();
        let engine = engine(source.clone(), clock.clone());

        engine.calculate_stock("p-2", None, None).await;
        let reads = source.reads.load(Ordering::SeqCst);
        assert_eq!(reads, 3);

        let level = engine.calculate_stock("p-2", None, None).await;
        assert_eq!(level.stock, 42);
        assert_eq!(source.reads.load(Ordering::SeqCst), reads);
        assert_eq!(engine.get_cached_stock("p-2", None, None), Some(42));

        engine.clear_cache(Some("p-2"), None);
        assert_eq!(engine.get_cached_stock("p-2", None, None), None);
        engine.calculate_stock("p-2", None, None).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), reads * 2);

        clock.advance(Duration::seconds(29));
        assert_eq!(engine.get_cached_stock("p-2", None, None), Some(42));

        clock.advance(Duration::seconds(1));
        assert_eq!(engine.get_cached_stock("p-2", None, None), None);
        assert_eq!(engine.cached_len(), 0);
        engine.calculate_stock("p-2", None, None).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), reads * 3);
    }

    #[tokio::test]
    async fn test_clear_cache_by_location_and_all() {
        let engine = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock());
        engine.calculate_stock("p-1", Some("loc-a"), None).await;
        engine.calculate_stock("p-1", Some("loc-a"), Some("large")).await;
        engine.calculate_stock("p-1", Some("loc-b"), None).await;
        engine.calculate_stock("p-2", None, None).await;
        assert_eq!(engine.cached_len(), 4);

        engine.clear_cache(Some("p-1"), Some("loc-a"));
        assert_eq!(engine.cached_len(), 2);
        assert!(engine.get_cached_stock("p-1", Some("loc-b"), None).is_some());

        engine.clear_cache(None, None);
        assert_eq!(engine.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_bulk_results_are_independent() {
        let engine = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock());
        let queries = vec![
            StockQuery::new("p-1"),
            StockQuery::new("bad"),
            StockQuery::new("p-2").at("loc-a"),
            StockQuery::new(""),
        ];

        let levels = engine.calculate_bulk_stock(&queries).await;
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[&StockKey::new("p-1", None, None)].stock, 0);
        assert_eq!(levels[&StockKey::new("p-2", Some("loc-a"), None)].stock, 42);

        // Failed reads count as zero and are not cached
        let bad = &levels[&StockKey::new("bad", None, None)];
        assert_eq!(bad.stock, 0);
        assert_eq!(engine.get_cached_stock("bad", None, None), None);

        let invalid = &levels[&StockKey::new("", None, None)];
        assert_eq!(invalid.stock, 0);
        assert!(invalid.error.is_some());
    }

    #[tokio::test]
    async fn test_policy_failure_falls_back_to_clamping() {
        let mut source = FakeSource::new(OVERSELLING);
        source.failing_policy = true;
        let engine = engine(Arc::new(source), clock());

        let level = engine.calculate_stock("p-1", None, None).await;
        assert_eq!(level.stock, 0);
        assert_eq!(engine.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_attached_engines_follow_the_bus() {
        let bus = InvalidationBus::new();
        let a = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock());
        let b = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock());
        let _sub_a = a.attach(&bus);
        let _sub_b = b.attach(&bus);

        for engine in [&a, &b] {
            engine.calculate_stock("p-1", None, None).await;
            engine.calculate_stock("p-2", None, None).await;
        }

        bus.publish(&Invalidation::product("tenant-2", "p-1"));
        assert_eq!(a.cached_len(), 2);

        bus.publish(&Invalidation::product(TENANT, "p-1"));
        assert_eq!(a.cached_len(), 1);
        assert_eq!(b.cached_len(), 1);
        assert_eq!(a.get_cached_stock("p-2", None, None), Some(42));
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_without_reads() {
        let source = Arc::new(FakeSource::new(StockPolicy::CLAMPING));
        let clock = clock();
        let engine = engine(source.clone(), clock.clone());

        for i in 0..100 {
            engine.calculate_stock(&format!("scan-{i}"), None, None).await;
        }
        assert_eq!(engine.cached_len(), 100);

        clock.advance(Duration::seconds(10));
        assert_eq!(engine.evict_expired(), 0);

        clock.advance(Duration::seconds(25));
        let reads = source.reads.load(Ordering::SeqCst);
        assert_eq!(engine.evict_expired(), 100);
        assert_eq!(engine.cached_len(), 0);
        assert_eq!(source.reads.load(Ordering::SeqCst), reads);

        // Inserting sweeps stale neighbours too
        engine.calculate_stock("p-1", None, None).await;
        clock.advance(Duration::seconds(31));
        engine.calculate_stock("p-2", None, None).await;
        assert_eq!(engine.cached_len(), 1);
        assert_eq!(engine.get_cached_stock("p-2", None, None), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_schedule() {
        let clock = clock();
        let engine = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock.clone());
        engine.calculate_stock("p-1", None, None).await;
        engine.calculate_stock("p-2", None, None).await;

        let (sweeper, handle) = engine.sweeper();
        let task = tokio::spawn(sweeper.run());

        tokio::time::sleep(StdDuration::from_secs(5)).await;
        assert_eq!(engine.cached_len(), 2);

        clock.advance(Duration::seconds(31));
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        assert_eq!(engine.cached_len(), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_with_its_engine() {
        let engine = engine(Arc::new(FakeSource::new(StockPolicy::CLAMPING)), clock());
        let (sweeper, _handle) = engine.sweeper();
        let task = tokio::spawn(sweeper.run());

        drop(engine);
        tokio::time::sleep(StdDuration::from_secs(31)).await;
        task.await.unwrap();
    }

    /// Publishes an invalidation for the product while its base stock is
    /// being read, the way a sale landing mid-calculation would.
    struct InvalidatingSource {
        inner: FakeSource,
        bus: InvalidationBus,
        armed: AtomicBool,
    }

    #[async_trait]
    impl StockSource for InvalidatingSource {
        async fn base_stock(&self, tenant_id: &str, key: &StockKey) -> EngineResult<i64> {
            let value = self.inner.base_stock(tenant_id, key).await;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.bus.publish(&Invalidation::product(tenant_id, key.product_id.as_str()));
            }
            value
        }

        async fn approved_adjustments(&self, tenant_id: &str, key: &StockKey) -> EngineResult<i64> {
            self.inner.approved_adjustments(tenant_id, key).await
        }

        async fn sales_since(&self, tenant_id: &str, key: &StockKey, since: DateTime<Utc>) -> EngineResult<i64> {
            self.inner.sales_since(tenant_id, key, since).await
        }

        async fn stock_policy(&self, tenant_id: &str) -> EngineResult<StockPolicy> {
            self.inner.stock_policy(tenant_id).await
        }
    }

    #[tokio::test]
    async fn test_clear_during_calculation_discards_the_result() {
        let bus = InvalidationBus::new();
        let source = Arc::new(InvalidatingSource {
            inner: FakeSource::new(StockPolicy::CLAMPING),
            bus: bus.clone(),
            armed: AtomicBool::new(true),
        });
        let engine = StockEngine::new(TENANT, source.clone(), clock(), &StockSettings::default());
        let _subscription = engine.attach(&bus);

        let level = engine.calculate_stock("p-2", None, None).await;
        assert_eq!(level.stock, 42);
        assert_eq!(engine.get_cached_stock("p-2", None, None), None);
        assert_eq!(engine.cached_len(), 0);

        // The next calculation reads again and is cached
        let reads = source.inner.reads.load(Ordering::SeqCst);
        engine.calculate_stock("p-2", None, None).await;
        assert_eq!(source.inner.reads.load(Ordering::SeqCst), reads + 3);
        assert_eq!(engine.get_cached_stock("p-2", None, None), Some(42));
    }
}
