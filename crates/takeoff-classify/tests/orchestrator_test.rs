//! End-to-end orchestrator behaviour over in-memory tiers and stores.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use takeoff_cache::{
    CacheConfig, CacheHierarchy, CacheTiers, DistributedCache, MemoryDistributedCache,
};
use takeoff_classify::{
    CancellationToken, ClassificationOrchestrator, ClassificationSource, ItemError,
    OrchestratorConfig, SuggestionStore,
};
use takeoff_core::{
    AggregationOutcome, Dimensions, ElementStore, ElementView, Error, EventBus, HitTier,
    NewSuggestion, PatternKey, Result, SuggestionRepository, SuggestionStatus,
};
use takeoff_db::{MemoryElementStore, MemorySuggestionRepository};
use takeoff_inference::mock::MockGenerationBackend;
use takeoff_inference::TEMPLATE_VERSION;

fn duct(location: &str, length: f64) -> ElementView {
    ElementView {
        id: Uuid::now_v7(),
        external_id: format!("D-{length}"),
        project_id: Uuid::nil(),
        category: Some("Duct".to_string()),
        family: Some("Rectangular".to_string()),
        element_type: None,
        spec: None,
        location_type: Some(location.to_string()),
        material: Some("Galvanized".to_string()),
        dimensions: Dimensions {
            length_mm: Some(length),
            ..Default::default()
        },
        metadata: BTreeMap::new(),
    }
}

fn fingerprint(location: &str) -> String {
    PatternKey::new(
        Some("Duct"),
        Some("Rectangular"),
        None,
        Some("Galvanized"),
        Some(location),
    )
    .fingerprint()
}

struct Harness {
    orchestrator: ClassificationOrchestrator,
    backend: MockGenerationBackend,
    elements: Arc<MemoryElementStore>,
    repo: MemorySuggestionRepository,
    l2: MemoryDistributedCache,
}

impl Harness {
    fn new(backend: MockGenerationBackend) -> Self {
        Self::with_shared(
            backend,
            MemorySuggestionRepository::new(),
            MemoryDistributedCache::default(),
            OrchestratorConfig::default(),
        )
    }

    fn with_config(backend: MockGenerationBackend, config: OrchestratorConfig) -> Self {
        Self::with_shared(
            backend,
            MemorySuggestionRepository::new(),
            MemoryDistributedCache::default(),
            config,
        )
    }

    /// Fresh L1/L3/L4 over a shared repository and L2, like a second node.
    fn with_shared(
        backend: MockGenerationBackend,
        repo: MemorySuggestionRepository,
        l2: MemoryDistributedCache,
        config: OrchestratorConfig,
    ) -> Self {
        let elements = Arc::new(MemoryElementStore::new(vec![
            duct("Indoor", 1000.0),
            duct("Indoor", 2000.0),
            duct("Indoor", 3000.0),
            duct("Outdoor", 1500.0),
            duct("Outdoor", 2500.0),
        ]));
        let shared_l2: Arc<dyn DistributedCache> = Arc::new(l2.clone());
        let tiers = CacheTiers::from_config(&CacheConfig::default()).with_l2(shared_l2);
        let cache = Arc::new(CacheHierarchy::new(tiers, TEMPLATE_VERSION));
        let store = SuggestionStore::new(Arc::new(repo.clone()), EventBus::new(32));
        let orchestrator = ClassificationOrchestrator::new(
            cache,
            store,
            elements.clone(),
            Arc::new(backend.clone()),
        )
        .with_config(config);

        Self {
            orchestrator,
            backend,
            elements,
            repo,
            l2,
        }
    }
}

#[tokio::test]
async fn test_full_miss_generates_once_then_serves_from_cache() {
    let h = Harness::new(MockGenerationBackend::new());
    let indoor = fingerprint("Indoor");
    let token = CancellationToken::new();

    let report = h.orchestrator.classify_batch([indoor.clone()], &token).await;
    let classified = report.items[0].outcome.clone().unwrap();
    assert_eq!(
        classified.source,
        ClassificationSource::Generated {
            prompt_reused: false
        }
    );
    assert_eq!(
        classified.suggestion.suggested_commodity_code.as_deref(),
        Some("MOCK-001")
    );
    assert_eq!(classified.suggestion.status, SuggestionStatus::Pending);
    assert_eq!(h.backend.generate_call_count(), 1);

    let again = h.orchestrator.classify_batch([indoor.clone()], &token).await;
    let cached = again.items[0].outcome.clone().unwrap();
    assert_eq!(cached.source, ClassificationSource::Cache(HitTier::L1));
    assert_eq!(cached.suggestion.id, classified.suggestion.id);
    assert_eq!(h.backend.generate_call_count(), 1);
}

#[tokio::test]
async fn test_second_node_is_served_by_l2() {
    let first = Harness::new(MockGenerationBackend::new());
    let indoor = fingerprint("Indoor");
    let token = CancellationToken::new();
    first.orchestrator.classify_batch([indoor.clone()], &token).await;

    let second = Harness::with_shared(
        MockGenerationBackend::new(),
        first.repo.clone(),
        first.l2.clone(),
        OrchestratorConfig::default(),
    );
    let report = second.orchestrator.classify_batch([indoor], &token).await;
    let classified = report.items[0].outcome.clone().unwrap();
    assert_eq!(classified.source, ClassificationSource::Cache(HitTier::L2));
    assert_eq!(second.backend.generate_call_count(), 0);
}

#[tokio::test]
async fn test_invalid_output_persists_nothing() {
    let h = Harness::new(MockGenerationBackend::new().with_fixed_response("not json"));
    let indoor = fingerprint("Indoor");

    let report = h
        .orchestrator
        .classify_batch([indoor.clone()], &CancellationToken::new())
        .await;
    assert!(matches!(
        report.items[0].outcome,
        Err(ItemError::GenerationInvalidOutput(_))
    ));
    assert!(h.repo.is_empty());
    assert!(h.l2.is_empty());
    assert!(h.repo.find_pending(&indoor).await.unwrap().is_none());
}

#[tokio::test]
async fn test_item_failures_are_isolated() {
    let backend =
        MockGenerationBackend::new().with_response_containing("location: outdoor", "not json");
    let h = Harness::new(backend);
    let indoor = fingerprint("Indoor");
    let outdoor = fingerprint("Outdoor");

    let report = h
        .orchestrator
        .classify_batch([indoor.clone(), outdoor.clone()], &CancellationToken::new())
        .await;
    assert_eq!(report.items.len(), 2);
    assert!(report.get(&indoor).unwrap().outcome.is_ok());
    assert!(matches!(
        report.get(&outdoor).unwrap().outcome,
        Err(ItemError::GenerationInvalidOutput(_))
    ));
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout() {
    let backend = MockGenerationBackend::new().with_latency(Duration::from_secs(60));
    let config = OrchestratorConfig::default().with_generation_timeout(Duration::from_secs(1));
    let h = Harness::with_config(backend, config);

    let report = h
        .orchestrator
        .classify_batch([fingerprint("Indoor")], &CancellationToken::new())
        .await;
    assert_eq!(
        report.items[0].outcome,
        Err(ItemError::GenerationTimeout(Duration::from_secs(1)))
    );
    assert!(h.repo.is_empty());
}

#[tokio::test]
async fn test_cancelled_batch_skips_every_item() {
    let h = Harness::new(MockGenerationBackend::new());
    let token = CancellationToken::new();
    token.cancel();

    let report = h
        .orchestrator
        .classify_batch([fingerprint("Indoor"), fingerprint("Outdoor")], &token)
        .await;
    assert!(report.cancelled);
    assert!(report
        .items
        .iter()
        .all(|i| i.outcome == Err(ItemError::Cancelled)));
    assert_eq!(h.backend.generate_call_count(), 0);
}

/// Element store whose refresh is interrupted by a cancellation.
struct CancelDuringRefresh {
    inner: MemoryElementStore,
    token: CancellationToken,
}

#[async_trait]
impl ElementStore for CancelDuringRefresh {
    async fn aggregate_patterns(&self, project_id: Option<Uuid>) -> Result<AggregationOutcome> {
        self.token.cancel();
        self.inner.aggregate_patterns(project_id).await
    }
}

#[tokio::test]
async fn test_cancel_during_pattern_refresh_stops_generation() {
    let backend = MockGenerationBackend::new();
    let repo = MemorySuggestionRepository::new();
    let token = CancellationToken::new();
    let elements = Arc::new(CancelDuringRefresh {
        inner: MemoryElementStore::new(vec![duct("Indoor", 1000.0), duct("Indoor", 2000.0)]),
        token: token.clone(),
    });
    let orchestrator = ClassificationOrchestrator::new(
        Arc::new(CacheHierarchy::in_memory(
            &CacheConfig::default(),
            TEMPLATE_VERSION,
        )),
        SuggestionStore::new(Arc::new(repo.clone()), EventBus::new(32)),
        elements,
        Arc::new(backend.clone()),
    );

    let report = orchestrator
        .classify_batch([fingerprint("Indoor")], &token)
        .await;
    assert!(report.cancelled);
    assert_eq!(report.items[0].outcome, Err(ItemError::Cancelled));
    assert_eq!(backend.generate_call_count(), 0);
    assert!(repo.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_batch_finishes_in_flight_and_skips_the_rest() {
    let backend = MockGenerationBackend::new().with_latency(Duration::from_millis(100));
    let config = OrchestratorConfig::default().with_max_concurrent(1);
    let h = Harness::with_config(backend, config);
    let token = CancellationToken::new();

    // Cancel as soon as the first generation is under way
    let canceller = {
        let backend = h.backend.clone();
        let token = token.clone();
        tokio::spawn(async move {
            while backend.generate_call_count() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            token.cancel();
        })
    };

    let report = h
        .orchestrator
        .classify_batch([fingerprint("Indoor"), fingerprint("Outdoor")], &token)
        .await;
    canceller.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.items.len(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(
        report
            .items
            .iter()
            .filter(|i| i.outcome == Err(ItemError::Cancelled))
            .count(),
        1
    );
    assert_eq!(h.backend.generate_call_count(), 1);
    assert_eq!(h.repo.len(), 1);
}

#[tokio::test]
async fn test_duplicates_resolved_once() {
    let h = Harness::new(MockGenerationBackend::new());
    let indoor = fingerprint("Indoor");

    let report = h
        .orchestrator
        .classify_batch(
            [indoor.clone(), indoor.clone(), indoor.clone()],
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(report.items.len(), 3);
    let ids: Vec<Uuid> = report
        .items
        .iter()
        .map(|i| i.outcome.as_ref().unwrap().suggestion.id)
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(h.backend.generate_call_count(), 1);
}

#[tokio::test]
async fn test_unknown_fingerprint_refreshes_patterns_once() {
    let h = Harness::new(MockGenerationBackend::new());

    let report = h
        .orchestrator
        .classify_batch(["unknown-a", "unknown-b"], &CancellationToken::new())
        .await;
    assert!(report
        .items
        .iter()
        .all(|i| matches!(i.outcome, Err(ItemError::PatternNotFound(_)))));
    assert_eq!(h.elements.aggregate_calls(), 1);
    assert_eq!(h.backend.generate_call_count(), 0);
}

#[tokio::test]
async fn test_concurrent_batches_create_one_pending() {
    let h = Harness::new(MockGenerationBackend::new().with_latency(Duration::from_millis(50)));
    let indoor = fingerprint("Indoor");
    let other = h.orchestrator.clone();
    let token = CancellationToken::new();

    let (a, b) = tokio::join!(
        h.orchestrator.classify_batch([indoor.clone()], &token),
        other.classify_batch([indoor.clone()], &token)
    );
    let a = a.items[0].outcome.clone().unwrap();
    let b = b.items[0].outcome.clone().unwrap();
    assert_eq!(a.suggestion.id, b.suggestion.id);
    assert_eq!(h.backend.generate_call_count(), 1);
    assert_eq!(h.repo.len(), 1);
}

#[tokio::test]
async fn test_pending_suggestion_is_reused() {
    let h = Harness::new(MockGenerationBackend::new());
    let indoor = fingerprint("Indoor");
    let existing = h
        .orchestrator
        .store()
        .create(NewSuggestion {
            pattern_fingerprint: Some(indoor.clone()),
            suggested_commodity_code: Some("23-31 13 11".to_string()),
            suggested_pricing_code: None,
            derived_items: vec![],
            reasoning_summary: "entered by hand".to_string(),
        })
        .await
        .unwrap();

    let report = h
        .orchestrator
        .classify_batch([indoor], &CancellationToken::new())
        .await;
    let classified = report.items[0].outcome.clone().unwrap();
    assert_eq!(classified.source, ClassificationSource::PendingReuse);
    assert_eq!(classified.suggestion.id, existing.id);
    assert_eq!(h.backend.generate_call_count(), 0);
}

#[tokio::test]
async fn test_l2_outage_still_classifies() {
    let h = Harness::new(MockGenerationBackend::new());
    h.l2.set_available(false);

    let report = h
        .orchestrator
        .classify_batch([fingerprint("Indoor")], &CancellationToken::new())
        .await;
    let classified = report.items[0].outcome.clone().unwrap();
    assert_eq!(classified.cache_warnings.len(), 1);
    assert_eq!(h.repo.len(), 1);
}

#[tokio::test]
async fn test_approve_is_idempotent_then_reject_fails() {
    let h = Harness::new(MockGenerationBackend::new());
    let indoor = fingerprint("Indoor");
    let token = CancellationToken::new();
    let report = h.orchestrator.classify_batch([indoor.clone()], &token).await;
    let id = report.items[0].outcome.as_ref().unwrap().suggestion.id;

    let approved = h.orchestrator.approve(id, "alice").await.unwrap();
    assert_eq!(approved.suggestion.status, SuggestionStatus::Approved);
    assert!(approved.cache_warnings.is_empty());
    let again = h.orchestrator.approve(id, "alice").await.unwrap();
    assert_eq!(again.suggestion.status, SuggestionStatus::Approved);

    let err = h.orchestrator.reject(id, "bob", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::InvalidStateTransition { .. }));

    // Cache serves the approved version
    let cached = h.orchestrator.cache().resolve(&indoor).await;
    assert_eq!(
        cached.suggestion.map(|s| s.status),
        Some(SuggestionStatus::Approved)
    );
}

#[tokio::test]
async fn test_reject_invalidates_and_regenerates() {
    let h = Harness::new(MockGenerationBackend::new());
    let indoor = fingerprint("Indoor");
    let token = CancellationToken::new();
    let first = h.orchestrator.classify_batch([indoor.clone()], &token).await;
    let id = first.items[0].outcome.as_ref().unwrap().suggestion.id;

    h.orchestrator.reject(id, "bob", "wrong material").await.unwrap();
    assert_eq!(h.orchestrator.cache().resolve(&indoor).await.suggestion, None);

    let second = h.orchestrator.classify_batch([indoor.clone()], &token).await;
    let regenerated = second.items[0].outcome.clone().unwrap();
    assert_ne!(regenerated.suggestion.id, id);
    assert_eq!(
        regenerated.source,
        ClassificationSource::Generated {
            prompt_reused: true
        }
    );
    assert_eq!(h.backend.generate_call_count(), 2);
    assert_eq!(h.orchestrator.store().history(&indoor).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_review_reports_degraded_cache_updates() {
    let h = Harness::new(MockGenerationBackend::new());
    let token = CancellationToken::new();
    let report = h
        .orchestrator
        .classify_batch([fingerprint("Indoor"), fingerprint("Outdoor")], &token)
        .await;
    let indoor = report.items[0].outcome.as_ref().unwrap().suggestion.id;
    let outdoor = report.items[1].outcome.as_ref().unwrap().suggestion.id;

    h.l2.set_available(false);

    let approved = h.orchestrator.approve(indoor, "alice").await.unwrap();
    assert_eq!(approved.suggestion.status, SuggestionStatus::Approved);
    assert_eq!(approved.cache_warnings.len(), 1);

    let rejected = h.orchestrator.reject(outdoor, "bob", "wrong").await.unwrap();
    assert_eq!(rejected.suggestion.status, SuggestionStatus::Rejected);
    assert_eq!(rejected.cache_warnings.len(), 1);
}
