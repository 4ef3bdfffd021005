//! Tiered lookup over L1–L4.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use takeoff_core::{
    defaults, AggregationOutcome, CacheTier, ClassificationSuggestion, HitTier, Pattern,
};

use crate::l1::{InProcessCache, LocalCache};
use crate::l2::{DistributedCache, MemoryDistributedCache, RedisSuggestionCache};
use crate::l3::{MaterializedPatternView, PatternView};
use crate::l4::{PromptCache, RenderedPromptCache};

/// Cache hierarchy configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub l1_shards: usize,
    pub l2_ttl: Duration,
    pub l3_max_age: Duration,
    pub l4_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: defaults::L1_CAPACITY,
            l1_shards: defaults::L1_SHARDS,
            l2_ttl: Duration::from_secs(defaults::L2_TTL_SECS),
            l3_max_age: Duration::from_secs(defaults::L3_MAX_AGE_SECS),
            l4_capacity: defaults::L4_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAKEOFF_L1_CAPACITY` | `50000` | In-process suggestion entries |
    /// | `TAKEOFF_L2_TTL_SECS` | `86400` | Distributed entry TTL |
    /// | `TAKEOFF_L3_MAX_AGE_SECS` | `21600` | Pattern view staleness bound |
    /// | `TAKEOFF_L4_CAPACITY` | `50000` | Rendered prompt entries |
    pub fn from_env() -> Self {
        fn env_u64(name: &str, default: u64) -> u64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        }

        Self {
            l1_capacity: env_u64("TAKEOFF_L1_CAPACITY", defaults::L1_CAPACITY as u64).max(1)
                as usize,
            l1_shards: defaults::L1_SHARDS,
            l2_ttl: Duration::from_secs(env_u64("TAKEOFF_L2_TTL_SECS", defaults::L2_TTL_SECS)),
            l3_max_age: Duration::from_secs(env_u64(
                "TAKEOFF_L3_MAX_AGE_SECS",
                defaults::L3_MAX_AGE_SECS,
            )),
            l4_capacity: env_u64("TAKEOFF_L4_CAPACITY", defaults::L4_CAPACITY as u64).max(1)
                as usize,
        }
    }

    pub fn with_l1_capacity(mut self, capacity: usize) -> Self {
        self.l1_capacity = capacity;
        self
    }

    pub fn with_l3_max_age(mut self, max_age: Duration) -> Self {
        self.l3_max_age = max_age;
        self
    }

    pub fn with_l4_capacity(mut self, capacity: usize) -> Self {
        self.l4_capacity = capacity;
        self
    }
}

/// The tiers a [`CacheHierarchy`] composes. L2 is optional; without it
/// suggestions live in L1 only.
#[derive(Clone)]
pub struct CacheTiers {
    pub l1: Arc<dyn LocalCache>,
    pub l2: Option<Arc<dyn DistributedCache>>,
    pub l3: Arc<dyn PatternView>,
    pub l4: Arc<dyn PromptCache>,
}

impl CacheTiers {
    /// In-process L1, L3 and L4 sized by `config`, no L2.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            l1: Arc::new(InProcessCache::new(config.l1_capacity, config.l1_shards)),
            l2: None,
            l3: Arc::new(MaterializedPatternView::new(config.l3_max_age)),
            l4: Arc::new(RenderedPromptCache::new(config.l4_capacity)),
        }
    }

    pub fn with_l1(mut self, l1: Arc<dyn LocalCache>) -> Self {
        self.l1 = l1;
        self
    }

    pub fn with_l2(mut self, l2: Arc<dyn DistributedCache>) -> Self {
        self.l2 = Some(l2);
        self
    }

    pub fn with_l3(mut self, l3: Arc<dyn PatternView>) -> Self {
        self.l3 = l3;
        self
    }

    pub fn with_l4(mut self, l4: Arc<dyn PromptCache>) -> Self {
        self.l4 = l4;
        self
    }
}

/// Answer to a [`CacheHierarchy::resolve`] request.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Cached suggestion (L1/L2 hit).
    pub suggestion: Option<ClassificationSuggestion>,
    pub hit_tier: HitTier,
    /// Pattern from the materialized view, when the suggestion tiers missed.
    pub pattern: Option<Arc<Pattern>>,
    /// Reusable rendered prompt for `pattern`.
    pub prompt: Option<Arc<str>>,
}

impl Resolution {
    fn miss() -> Self {
        Self {
            suggestion: None,
            hit_tier: HitTier::Miss,
            pattern: None,
            prompt: None,
        }
    }

    pub fn is_suggestion_hit(&self) -> bool {
        self.suggestion.is_some()
    }
}

/// Result of a cache write. Tier failures never fail the write; they are
/// reported here instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub warnings: Vec<String>,
}

impl WriteOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Per-tier counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_errors: u64,
    pub l3_hits: u64,
    pub l3_misses: u64,
    pub l4_hits: u64,
    pub l4_misses: u64,
    pub l1_entries: usize,
    pub l3_patterns: usize,
    pub l4_entries: usize,
}

#[derive(Default)]
struct Counters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,
    l4_hits: AtomicU64,
    l4_misses: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Composes the four tiers.
///
/// Lookup order is L1 → L2 → L3 → L4. Suggestions live in L1 and L2;
/// L3 and L4 only shorten the path to a fresh generation.
pub struct CacheHierarchy {
    l1: Arc<dyn LocalCache>,
    l2: Option<Arc<dyn DistributedCache>>,
    l3: Arc<dyn PatternView>,
    l4: Arc<dyn PromptCache>,
    template_version: u32,
    counters: Counters,
}

impl CacheHierarchy {
    /// Build the hierarchy. `template_version` is the prompt layout version
    /// rendered prompts are checked against.
    pub fn new(tiers: CacheTiers, template_version: u32) -> Self {
        Self {
            l1: tiers.l1,
            l2: tiers.l2,
            l3: tiers.l3,
            l4: tiers.l4,
            template_version,
            counters: Counters::default(),
        }
    }

    /// Single-node hierarchy with an in-memory L2.
    pub fn in_memory(config: &CacheConfig, template_version: u32) -> Self {
        let tiers = CacheTiers::from_config(config)
            .with_l2(Arc::new(MemoryDistributedCache::new(config.l2_ttl)));
        Self::new(tiers, template_version)
    }

    /// Hierarchy from environment: Redis L2 when enabled and reachable.
    pub async fn from_env(template_version: u32) -> Self {
        let config = CacheConfig::from_env();
        let mut tiers = CacheTiers::from_config(&config);
        if let Some(redis) = RedisSuggestionCache::from_env().await {
            tiers = tiers.with_l2(Arc::new(redis));
        }
        Self::new(tiers, template_version)
    }

    pub fn template_version(&self) -> u32 {
        self.template_version
    }

    pub fn has_l2(&self) -> bool {
        self.l2.is_some()
    }

    /// Look a fingerprint up through every tier.
    #[instrument(skip(self), fields(subsystem = "cache", component = "hierarchy", op = "resolve"))]
    pub async fn resolve(&self, fingerprint: &str) -> Resolution {
        let start = Instant::now();
        let resolution = self.resolve_inner(fingerprint).await;
        debug!(
            hit_tier = %resolution.hit_tier,
            duration_ms = start.elapsed().as_millis() as u64,
            "Cache resolve"
        );
        resolution
    }

    async fn resolve_inner(&self, fingerprint: &str) -> Resolution {
        if let Some(suggestion) = self.l1.get(fingerprint) {
            bump(&self.counters.l1_hits);
            return Resolution {
                suggestion: Some(suggestion),
                hit_tier: HitTier::L1,
                ..Resolution::miss()
            };
        }
        bump(&self.counters.l1_misses);

        if let Some(l2) = &self.l2 {
            match l2.get(fingerprint).await {
                Ok(Some(suggestion)) => {
                    bump(&self.counters.l2_hits);
                    self.l1.put(fingerprint, suggestion.clone());
                    return Resolution {
                        suggestion: Some(suggestion),
                        hit_tier: HitTier::L2,
                        ..Resolution::miss()
                    };
                }
                Ok(None) => bump(&self.counters.l2_misses),
                Err(e) => {
                    bump(&self.counters.l2_errors);
                    warn!(
                        tier = %CacheTier::L2,
                        backend = l2.backend_name(),
                        error = %e,
                        "L2 lookup failed, continuing without it"
                    );
                }
            }
        }

        let Some(pattern) = self.l3.get(fingerprint) else {
            bump(&self.counters.l3_misses);
            return Resolution::miss();
        };
        bump(&self.counters.l3_hits);

        let prompt = self
            .l4
            .get(fingerprint, self.template_version, &pattern.stats_digest());
        let hit_tier = if prompt.is_some() {
            bump(&self.counters.l4_hits);
            HitTier::L4
        } else {
            bump(&self.counters.l4_misses);
            HitTier::L3
        };

        Resolution {
            suggestion: None,
            hit_tier,
            pattern: Some(pattern),
            prompt,
        }
    }

    /// Store a suggestion in L1 and L2.
    ///
    /// An L2 failure keeps the L1 entry and is reported as a warning.
    #[instrument(skip(self, suggestion), fields(subsystem = "cache", component = "hierarchy", op = "write_through", suggestion_id = %suggestion.id))]
    pub async fn write_through(
        &self,
        fingerprint: &str,
        suggestion: &ClassificationSuggestion,
    ) -> WriteOutcome {
        self.l1.put(fingerprint, suggestion.clone());

        let mut outcome = WriteOutcome::default();
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.set(fingerprint, suggestion).await {
                bump(&self.counters.l2_errors);
                warn!(
                    tier = %CacheTier::L2,
                    error = %e,
                    degraded = true,
                    "L2 write failed, entry cached locally only"
                );
                outcome.warnings.push(e.to_string());
            }
        }
        outcome
    }

    /// Drop a fingerprint from L1 and L2. L3 and L4 are left alone.
    #[instrument(skip(self), fields(subsystem = "cache", component = "hierarchy", op = "invalidate"))]
    pub async fn invalidate(&self, fingerprint: &str) -> WriteOutcome {
        self.l1.remove(fingerprint);

        let mut outcome = WriteOutcome::default();
        if let Some(l2) = &self.l2 {
            if let Err(e) = l2.delete(fingerprint).await {
                bump(&self.counters.l2_errors);
                warn!(
                    tier = %CacheTier::L2,
                    error = %e,
                    degraded = true,
                    "L2 invalidation failed, entry expires by TTL"
                );
                outcome.warnings.push(e.to_string());
            }
        }
        outcome
    }

    /// Replace the materialized pattern view with a new aggregation run.
    ///
    /// Rendered prompts for patterns whose statistics changed stop matching
    /// by digest and are re-rendered on next use.
    pub fn refresh_patterns(&self, outcome: AggregationOutcome) {
        self.l3.replace(outcome);
    }

    /// Pattern from the materialized view.
    pub fn pattern(&self, fingerprint: &str) -> Option<Arc<Pattern>> {
        self.l3.get(fingerprint)
    }

    /// Fingerprints in the current materialized view.
    pub fn pattern_fingerprints(&self) -> Vec<String> {
        self.l3.fingerprints()
    }

    pub fn patterns_stale(&self) -> bool {
        self.l3.is_stale()
    }

    /// Cache a rendered prompt for `pattern`.
    pub fn store_prompt(&self, fingerprint: &str, pattern: &Pattern, text: Arc<str>) {
        self.l4.put(
            fingerprint,
            self.template_version,
            &pattern.stats_digest(),
            text,
        );
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            l1_hits: c.l1_hits.load(Ordering::Relaxed),
            l1_misses: c.l1_misses.load(Ordering::Relaxed),
            l2_hits: c.l2_hits.load(Ordering::Relaxed),
            l2_misses: c.l2_misses.load(Ordering::Relaxed),
            l2_errors: c.l2_errors.load(Ordering::Relaxed),
            l3_hits: c.l3_hits.load(Ordering::Relaxed),
            l3_misses: c.l3_misses.load(Ordering::Relaxed),
            l4_hits: c.l4_hits.load(Ordering::Relaxed),
            l4_misses: c.l4_misses.load(Ordering::Relaxed),
            l1_entries: self.l1.len(),
            l3_patterns: self.l3.len(),
            l4_entries: self.l4.len(),
        }
    }
}
