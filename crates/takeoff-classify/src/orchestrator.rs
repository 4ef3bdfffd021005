//! Batch classification through the cache hierarchy.
//!
//! Per fingerprint:
//!
//! ```text
//! resolve ──hit (L1/L2)──▶ done
//!    │
//!    └─miss─▶ lock fingerprint ─▶ pending suggestion? ──yes──▶ write through, done
//!                                        │
//!                                        no
//!                                        ▼
//!              pattern (L3, refreshed once per batch) ─▶ prompt (L4 or render)
//!                                        ▼
//!              generate (timeout) ─▶ validate ─▶ create ─▶ write through
//! ```
//!
//! The cancellation token is checked after every wait that precedes
//! generation (permit, fingerprint lock, pending lookup, pattern refresh)
//! and once more right before the generation call. A generation already
//! started runs to completion or timeout.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OnceCell, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use takeoff_cache::{CacheHierarchy, Resolution};
use takeoff_core::{
    defaults, ClassificationSuggestion, ElementStore, Error, GenerationBackend, HitTier, Pattern,
    Result,
};
use takeoff_inference::{parse_suggestion, PromptModelBuilder, SYSTEM_PROMPT};

use crate::cancel::CancellationToken;
use crate::store::SuggestionStore;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum items classified concurrently.
    pub max_concurrent: usize,
    /// Timeout for one generation call.
    pub generation_timeout: Duration,
    /// Project scope for pattern refreshes (`None` = all elements).
    pub project_id: Option<Uuid>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT,
            generation_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
            project_id: None,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAKEOFF_MAX_CONCURRENT` | `8` | Concurrent classification workers |
    /// | `TAKEOFF_GEN_TIMEOUT_SECS` | `30` | Per-call generation timeout |
    pub fn from_env() -> Self {
        let max_concurrent = std::env::var("TAKEOFF_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::MAX_CONCURRENT)
            .max(1);

        let timeout_secs = std::env::var("TAKEOFF_GEN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::GEN_TIMEOUT_SECS);

        Self {
            max_concurrent,
            generation_timeout: Duration::from_secs(timeout_secs),
            project_id: None,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Per-item failure. Cloneable so duplicate fingerprints share one result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
    #[error("generation timed out after {}s", .0.as_secs())]
    GenerationTimeout(Duration),

    #[error("generation returned invalid output: {0}")]
    GenerationInvalidOutput(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("no pattern for fingerprint {0}")]
    PatternNotFound(String),

    #[error("batch cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),
}

impl From<Error> for ItemError {
    fn from(e: Error) -> Self {
        match e {
            Error::GenerationTimeout(d) => Self::GenerationTimeout(d),
            Error::GenerationInvalidOutput(msg) => Self::GenerationInvalidOutput(msg),
            Error::Inference(msg) | Error::Request(msg) => Self::GenerationFailed(msg),
            Error::BatchCancelled => Self::Cancelled,
            other => Self::Store(other.to_string()),
        }
    }
}

/// How a suggestion was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    /// Served from a suggestion tier (L1 or L2).
    Cache(HitTier),
    /// An existing pending suggestion was reused.
    PendingReuse,
    /// Freshly generated. `prompt_reused` is true when L4 supplied the prompt.
    Generated { prompt_reused: bool },
}

/// Successful item outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub suggestion: ClassificationSuggestion,
    pub source: ClassificationSource,
    /// Degraded cache writes (e.g. L2 down). The suggestion is still valid.
    pub cache_warnings: Vec<String>,
}

/// Outcome of an orchestrator review.
#[derive(Debug, Clone, PartialEq)]
pub struct Reviewed {
    pub suggestion: ClassificationSuggestion,
    /// Degraded cache writes while publishing the decision.
    pub cache_warnings: Vec<String>,
}

/// One requested fingerprint and its outcome.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub fingerprint: String,
    pub outcome: std::result::Result<Classified, ItemError>,
}

/// Result of [`ClassificationOrchestrator::classify_batch`]: one item per
/// requested fingerprint, in request order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    /// Cancellation was requested while the batch ran.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn get(&self, fingerprint: &str) -> Option<&BatchItem> {
        self.items.iter().find(|i| i.fingerprint == fingerprint)
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

type ItemResult = std::result::Result<Classified, ItemError>;

/// State shared by the items of one batch.
#[derive(Default)]
struct BatchContext {
    /// Pattern refresh outcome; initialized at most once per batch.
    refresh: OnceCell<std::result::Result<(), String>>,
}

type InflightMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Holds the per-fingerprint lock and drops the map entry when no one else
/// is waiting on it.
struct FingerprintLock {
    fingerprint: String,
    map: InflightMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FingerprintLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = map.get(&self.fingerprint) {
            if Arc::strong_count(entry) == 1 {
                map.remove(&self.fingerprint);
            }
        }
    }
}

/// Resolves fingerprints to suggestions, generating only on a full miss.
///
/// Cheap to clone; clones share the cache, store and in-flight locks.
#[derive(Clone)]
pub struct ClassificationOrchestrator {
    cache: Arc<CacheHierarchy>,
    store: SuggestionStore,
    elements: Arc<dyn ElementStore>,
    backend: Arc<dyn GenerationBackend>,
    prompts: PromptModelBuilder,
    config: OrchestratorConfig,
    inflight: InflightMap,
}

impl ClassificationOrchestrator {
    pub fn new(
        cache: Arc<CacheHierarchy>,
        store: SuggestionStore,
        elements: Arc<dyn ElementStore>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            cache,
            store,
            elements,
            backend,
            prompts: PromptModelBuilder::new(),
            config: OrchestratorConfig::default(),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptModelBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn cache(&self) -> &CacheHierarchy {
        &self.cache
    }

    pub fn store(&self) -> &SuggestionStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Classify a batch of fingerprints.
    ///
    /// Duplicates are resolved once. Failures are isolated per item; the
    /// report always has one entry per requested fingerprint.
    #[instrument(skip_all, fields(subsystem = "classify", component = "orchestrator", op = "classify_batch", batch_size))]
    pub async fn classify_batch<I, S>(&self, fingerprints: I, token: &CancellationToken) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let start = Instant::now();
        let requested: Vec<String> = fingerprints.into_iter().map(Into::into).collect();
        tracing::Span::current().record("batch_size", requested.len());

        let mut seen = HashSet::new();
        let unique: Vec<String> = requested
            .iter()
            .filter(|fp| seen.insert(fp.as_str()))
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let ctx = Arc::new(BatchContext::default());
        let mut tasks = JoinSet::new();

        for fingerprint in unique {
            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let ctx = Arc::clone(&ctx);
            let token = token.clone();
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.classify_one(&fingerprint, &ctx, &token).await,
                    Err(_) => Err(ItemError::Cancelled),
                };
                (fingerprint, outcome)
            });
        }

        let mut results: HashMap<String, ItemResult> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((fingerprint, outcome)) => {
                    results.insert(fingerprint, outcome);
                }
                Err(e) => warn!(error = %e, "Classification worker failed"),
            }
        }

        let items: Vec<BatchItem> = requested
            .into_iter()
            .map(|fingerprint| {
                let outcome = results
                    .get(&fingerprint)
                    .cloned()
                    .unwrap_or_else(|| Err(ItemError::Store("worker task failed".to_string())));
                BatchItem {
                    fingerprint,
                    outcome,
                }
            })
            .collect();

        let report = BatchReport {
            items,
            cancelled: token.is_cancelled(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Classification batch complete"
        );
        report
    }

    /// Classify one fingerprint.
    pub async fn classify(&self, fingerprint: &str, token: &CancellationToken) -> ItemResult {
        self.classify_one(fingerprint, &BatchContext::default(), token)
            .await
    }

    async fn classify_one(
        &self,
        fingerprint: &str,
        ctx: &BatchContext,
        token: &CancellationToken,
    ) -> ItemResult {
        Self::check_cancelled(fingerprint, token)?;
        if let Some(hit) = Self::suggestion_hit(self.cache.resolve(fingerprint).await) {
            return Ok(hit);
        }

        let _lock = self.lock_fingerprint(fingerprint).await;
        Self::check_cancelled(fingerprint, token)?;

        // Another batch may have finished this fingerprint while we waited.
        let resolution = self.cache.resolve(fingerprint).await;
        let resolution = match Self::suggestion_hit(resolution.clone()) {
            Some(hit) => return Ok(hit),
            None => resolution,
        };

        if let Some(pending) = self.store.pending_for(fingerprint).await? {
            debug!(fingerprint, suggestion_id = %pending.id, "Reusing pending suggestion");
            let write = self.cache.write_through(fingerprint, &pending).await;
            return Ok(Classified {
                suggestion: pending,
                source: ClassificationSource::PendingReuse,
                cache_warnings: write.warnings,
            });
        }

        Self::check_cancelled(fingerprint, token)?;

        let (pattern, cached_prompt) = match resolution.pattern {
            Some(pattern) => (pattern, resolution.prompt),
            None => {
                let pattern = self.refreshed_pattern(fingerprint, ctx).await?;
                Self::check_cancelled(fingerprint, token)?;
                (pattern, None)
            }
        };

        let prompt_reused = cached_prompt.is_some();
        let prompt = match cached_prompt {
            Some(prompt) => prompt,
            None => self.render(fingerprint, &pattern),
        };

        Self::check_cancelled(fingerprint, token)?;
        let raw = match tokio::time::timeout(
            self.config.generation_timeout,
            self.backend.generate_with_system(SYSTEM_PROMPT, &prompt),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    fingerprint,
                    timeout_secs = self.config.generation_timeout.as_secs(),
                    "Generation timed out"
                );
                return Err(ItemError::GenerationTimeout(self.config.generation_timeout));
            }
        };

        let new = parse_suggestion(&raw, Some(fingerprint)).map_err(|e| {
            warn!(fingerprint, error = %e, "Generated output rejected");
            ItemError::from(e)
        })?;
        let suggestion = self.store.create(new).await?;
        let write = self.cache.write_through(fingerprint, &suggestion).await;

        Ok(Classified {
            suggestion,
            source: ClassificationSource::Generated { prompt_reused },
            cache_warnings: write.warnings,
        })
    }

    fn check_cancelled(
        fingerprint: &str,
        token: &CancellationToken,
    ) -> std::result::Result<(), ItemError> {
        if token.is_cancelled() {
            debug!(fingerprint, "Batch cancelled, item not generated");
            return Err(ItemError::Cancelled);
        }
        Ok(())
    }

    fn suggestion_hit(resolution: Resolution) -> Option<Classified> {
        let suggestion = resolution.suggestion?;
        Some(Classified {
            suggestion,
            source: ClassificationSource::Cache(resolution.hit_tier),
            cache_warnings: Vec::new(),
        })
    }

    async fn lock_fingerprint(&self, fingerprint: &str) -> FingerprintLock {
        let mutex = {
            let mut map = self.inflight.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(map.entry(fingerprint.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        FingerprintLock {
            fingerprint: fingerprint.to_string(),
            map: Arc::clone(&self.inflight),
            guard: Some(guard),
        }
    }

    /// Pattern from L3, refreshing the view from the element store at most
    /// once per batch.
    async fn refreshed_pattern(
        &self,
        fingerprint: &str,
        ctx: &BatchContext,
    ) -> std::result::Result<Arc<Pattern>, ItemError> {
        let refreshed = ctx
            .refresh
            .get_or_init(|| async {
                info!(project_id = ?self.config.project_id, "Refreshing pattern view");
                match self.elements.aggregate_patterns(self.config.project_id).await {
                    Ok(outcome) => {
                        self.cache.refresh_patterns(outcome);
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "Pattern refresh failed");
                        Err(e.to_string())
                    }
                }
            })
            .await;

        if let Err(e) = refreshed {
            return Err(ItemError::Store(e.clone()));
        }
        self.cache
            .pattern(fingerprint)
            .ok_or_else(|| ItemError::PatternNotFound(fingerprint.to_string()))
    }

    fn render(&self, fingerprint: &str, pattern: &Pattern) -> Arc<str> {
        let text: Arc<str> = Arc::from(self.prompts.render(pattern));
        self.cache
            .store_prompt(fingerprint, pattern, Arc::clone(&text));
        text
    }

    /// Approve a suggestion and publish the approved version to L1/L2.
    pub async fn approve(&self, id: Uuid, approved_by: &str) -> Result<Reviewed> {
        let suggestion = self.store.approve(id, approved_by).await?;
        let cache_warnings = match suggestion.pattern_fingerprint.as_deref() {
            Some(fp) => self.cache.write_through(fp, &suggestion).await.warnings,
            None => Vec::new(),
        };
        Ok(Self::reviewed(suggestion, cache_warnings))
    }

    /// Reject a suggestion and drop it from L1/L2 so the next request
    /// regenerates.
    pub async fn reject(&self, id: Uuid, rejected_by: &str, reason: &str) -> Result<Reviewed> {
        let suggestion = self.store.reject(id, rejected_by, reason).await?;
        let cache_warnings = match suggestion.pattern_fingerprint.as_deref() {
            Some(fp) => self.cache.invalidate(fp).await.warnings,
            None => Vec::new(),
        };
        Ok(Self::reviewed(suggestion, cache_warnings))
    }

    fn reviewed(suggestion: ClassificationSuggestion, cache_warnings: Vec<String>) -> Reviewed {
        if !cache_warnings.is_empty() {
            warn!(
                suggestion_id = %suggestion.id,
                status = %suggestion.status,
                warnings = ?cache_warnings,
                degraded = true,
                "Review recorded, cache update degraded"
            );
        }
        Reviewed {
            suggestion,
            cache_warnings,
        }
    }
}
