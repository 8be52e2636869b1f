// Brand Rule Cache
//
// Brand rules change rarely and are read on every settlement. Rules are loaded
// as an immutable snapshot and reused until the TTL expires; a settlement works
// from one snapshot for its whole run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::metrics::EngineMetrics;
use crate::rules::BrandRule;
use crate::store::{BrandRuleSource, StoreError};

/// Default time-to-live for cached rules (60 seconds)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Immutable view of all brand rules keyed by brand id
pub type BrandRuleSnapshot = Arc<HashMap<i64, BrandRule>>;

struct CachedRules {
    rules: BrandRuleSnapshot,
    loaded_at: Instant,
}

/// TTL cache in front of a [`BrandRuleSource`]
pub struct BrandRuleCache {
    source: Arc<dyn BrandRuleSource>,
    cache: RwLock<Option<CachedRules>>,
    ttl: Duration,
    metrics: Option<EngineMetrics>,
}

impl BrandRuleCache {
    pub fn new(source: Arc<dyn BrandRuleSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
            ttl,
            metrics: None,
        }
    }

    pub fn with_metrics(source: Arc<dyn BrandRuleSource>, ttl: Duration, metrics: EngineMetrics) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(source, ttl)
        }
    }

    fn record_cache_hit(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_cache_hit();
        }
    }

    fn record_cache_miss(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_cache_miss();
        }
    }

    /// Current rule snapshot, reloading from the source when stale
    pub async fn snapshot(&self) -> Result<BrandRuleSnapshot, StoreError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() <= self.ttl {
                    self.record_cache_hit();
                    return Ok(Arc::clone(&cached.rules));
                }
            }
        }

        self.record_cache_miss();
        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited for the write lock
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() <= self.ttl {
                return Ok(Arc::clone(&cached.rules));
            }
        }

        let rules: HashMap<i64, BrandRule> = self
            .source
            .load_brand_rules()
            .await?
            .into_iter()
            .map(|rule| (rule.brand_id, rule))
            .collect();
        tracing::debug!("Loaded {} brand rules", rules.len());

        let rules = Arc::new(rules);
        *cache = Some(CachedRules {
            rules: Arc::clone(&rules),
            loaded_at: Instant::now(),
        });
        Ok(rules)
    }

    /// Drop the cached snapshot so the next read reloads
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
        tracing::debug!("Brand rule cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl BrandRuleSource for CountingSource {
        async fn load_brand_rules(&self) -> Result<Vec<BrandRule>, StoreError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![BrandRule {
                brand_id: 7,
                name: format!("load-{}", n),
                points_per_unit_currency: dec!(10),
                min_purchase_amount: dec!(50),
                max_points_per_item: 5000,
                is_active: true,
            }])
        }
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_within_ttl() {
        let source = Arc::new(CountingSource { loads: AtomicUsize::new(0) });
        let metrics = EngineMetrics::new();
        let cache = BrandRuleCache::with_metrics(source.clone(), Duration::from_secs(60), metrics.clone());

        let first = cache.snapshot().await.unwrap();
        let second = cache.snapshot().await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[&7].name, "load-0");
        assert_eq!(metrics.cache_hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let source = Arc::new(CountingSource { loads: AtomicUsize::new(0) });
        let cache = BrandRuleCache::new(source.clone(), Duration::from_secs(60));

        let first = cache.snapshot().await.unwrap();
        cache.invalidate().await;
        let second = cache.snapshot().await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(second[&7].name, "load-1");
        // The earlier snapshot is unaffected by the reload
        assert_eq!(first[&7].name, "load-0");
    }

    #[tokio::test]
    async fn test_zero_ttl_reloads_every_time() {
        let source = Arc::new(CountingSource { loads: AtomicUsize::new(0) });
        let cache = BrandRuleCache::new(source.clone(), Duration::ZERO);

        cache.snapshot().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.snapshot().await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
