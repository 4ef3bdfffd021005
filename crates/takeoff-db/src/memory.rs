//! In-memory store implementations for single-node runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use takeoff_aggregate::{AggregatorConfig, PatternAggregator};
use takeoff_core::{
    AggregationOutcome, ClassificationSuggestion, ElementStore, ElementView, Error, Result,
    ReviewRecord, SuggestionRepository, SuggestionStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// SUGGESTIONS
// =============================================================================

/// [`SuggestionRepository`] over a map, with the same constraints as the
/// PostgreSQL schema: unique ids and at most one pending suggestion per
/// fingerprint.
#[derive(Clone, Default)]
pub struct MemorySuggestionRepository {
    rows: Arc<Mutex<HashMap<Uuid, ClassificationSuggestion>>>,
}

impl MemorySuggestionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SuggestionRepository for MemorySuggestionRepository {
    async fn insert(&self, suggestion: &ClassificationSuggestion) -> Result<()> {
        let mut rows = lock(&self.rows);
        if rows.contains_key(&suggestion.id) {
            return Err(Error::InvalidInput(format!(
                "suggestion {} already exists",
                suggestion.id
            )));
        }
        if suggestion.status == SuggestionStatus::Pending {
            if let Some(fp) = suggestion.pattern_fingerprint.as_deref() {
                let duplicate = rows.values().any(|s| {
                    s.status == SuggestionStatus::Pending
                        && s.pattern_fingerprint.as_deref() == Some(fp)
                });
                if duplicate {
                    return Err(Error::InvalidInput(format!(
                        "a pending suggestion already exists for pattern {fp}"
                    )));
                }
            }
        }
        rows.insert(suggestion.id, suggestion.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ClassificationSuggestion>> {
        Ok(lock(&self.rows).get(&id).cloned())
    }

    async fn find_pending(&self, fingerprint: &str) -> Result<Option<ClassificationSuggestion>> {
        Ok(lock(&self.rows)
            .values()
            .filter(|s| {
                s.status == SuggestionStatus::Pending
                    && s.pattern_fingerprint.as_deref() == Some(fingerprint)
            })
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn list_for_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<ClassificationSuggestion>> {
        let mut history: Vec<_> = lock(&self.rows)
            .values()
            .filter(|s| s.pattern_fingerprint.as_deref() == Some(fingerprint))
            .cloned()
            .collect();
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(history)
    }

    async fn record_review(&self, id: Uuid, review: &ReviewRecord) -> Result<bool> {
        let mut rows = lock(&self.rows);
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if row.status != SuggestionStatus::Pending {
            return Ok(false);
        }
        row.status = review.status;
        row.reviewed_by = Some(review.reviewed_by.clone());
        row.reviewed_at = Some(review.reviewed_at);
        row.review_note = review.note.clone();
        Ok(true)
    }
}

// =============================================================================
// ELEMENTS
// =============================================================================

/// [`ElementStore`] over an in-memory element list, aggregated with
/// [`PatternAggregator`].
pub struct MemoryElementStore {
    elements: RwLock<Vec<ElementView>>,
    aggregator: PatternAggregator,
    aggregate_calls: AtomicUsize,
}

impl MemoryElementStore {
    pub fn new(elements: Vec<ElementView>) -> Self {
        Self::with_config(elements, AggregatorConfig::default())
    }

    pub fn with_config(elements: Vec<ElementView>, config: AggregatorConfig) -> Self {
        Self {
            elements: RwLock::new(elements),
            aggregator: PatternAggregator::new(config),
            aggregate_calls: AtomicUsize::new(0),
        }
    }

    pub fn extend(&self, elements: impl IntoIterator<Item = ElementView>) {
        self.elements
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(elements);
    }

    /// Number of `aggregate_patterns` calls served.
    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ElementStore for MemoryElementStore {
    async fn aggregate_patterns(&self, project_id: Option<Uuid>) -> Result<AggregationOutcome> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let elements: Vec<ElementView> = self
            .elements
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| project_id.map_or(true, |p| e.project_id == p))
            .cloned()
            .collect();

        // The rayon fold is CPU-bound; keep it off the async workers
        let aggregator = self.aggregator.clone();
        tokio::task::spawn_blocking(move || aggregator.aggregate_parallel(elements))
            .await
            .map_err(|e| Error::Internal(format!("aggregation task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use takeoff_core::{lifecycle, Dimensions, NewSuggestion};

    fn pending(fp: &str) -> ClassificationSuggestion {
        lifecycle::create(
            takeoff_core::new_v7(),
            NewSuggestion {
                pattern_fingerprint: Some(fp.to_string()),
                suggested_commodity_code: Some("C-1".to_string()),
                suggested_pricing_code: None,
                derived_items: vec![],
                reasoning_summary: "r".to_string(),
            },
            Utc::now(),
        )
        .0
    }

    fn review(status: SuggestionStatus, by: &str) -> ReviewRecord {
        ReviewRecord {
            status,
            reviewed_by: by.to_string(),
            reviewed_at: Utc::now(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_one_pending_per_fingerprint() {
        let repo = MemorySuggestionRepository::new();
        let first = pending("fp");
        repo.insert(&first).await.unwrap();
        assert!(matches!(
            repo.insert(&pending("fp")).await,
            Err(Error::InvalidInput(_))
        ));

        // Once reviewed, a new pending suggestion is allowed
        assert!(repo
            .record_review(first.id, &review(SuggestionStatus::Rejected, "bob"))
            .await
            .unwrap());
        repo.insert(&pending("fp")).await.unwrap();
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_record_review_is_compare_and_set() {
        let repo = MemorySuggestionRepository::new();
        let s = pending("fp");
        repo.insert(&s).await.unwrap();

        assert!(repo
            .record_review(s.id, &review(SuggestionStatus::Approved, "alice"))
            .await
            .unwrap());
        assert!(!repo
            .record_review(s.id, &review(SuggestionStatus::Rejected, "bob"))
            .await
            .unwrap());

        let stored = repo.get(s.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SuggestionStatus::Approved);
        assert_eq!(stored.reviewed_by.as_deref(), Some("alice"));
        assert!(!repo
            .record_review(Uuid::nil(), &review(SuggestionStatus::Approved, "x"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_history_is_oldest_first() {
        let repo = MemorySuggestionRepository::new();
        let mut old = pending("fp");
        old.created_at = Utc::now() - Duration::hours(1);
        old.status = SuggestionStatus::Rejected;
        old.reviewed_by = Some("bob".to_string());
        old.reviewed_at = Some(Utc::now());
        let new = pending("fp");
        repo.insert(&new).await.unwrap();
        repo.insert(&old).await.unwrap();

        let history = repo.list_for_fingerprint("fp").await.unwrap();
        assert_eq!(
            history.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![old.id, new.id]
        );
        assert_eq!(repo.find_pending("fp").await.unwrap().unwrap().id, new.id);
        assert!(repo.find_pending("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_element_store_filters_by_project() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let element = |project_id, category: &str| ElementView {
            id: Uuid::now_v7(),
            external_id: "E".to_string(),
            project_id,
            category: Some(category.to_string()),
            family: None,
            element_type: None,
            spec: None,
            location_type: None,
            material: None,
            dimensions: Dimensions::default(),
            metadata: Default::default(),
        };
        let store = MemoryElementStore::new(vec![
            element(a, "Duct"),
            element(a, "Pipe"),
            element(b, "Duct"),
        ]);

        let all = store.aggregate_patterns(None).await.unwrap();
        assert_eq!(all.total_count, 3);
        assert_eq!(all.patterns.len(), 2);

        let only_a = store.aggregate_patterns(Some(a)).await.unwrap();
        assert_eq!(only_a.total_count, 2);
        assert_eq!(store.aggregate_calls(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_aggregation_leaves_the_runtime_responsive() {
        let elements = (0..20_000)
            .map(|i| ElementView {
                id: Uuid::now_v7(),
                external_id: format!("E-{i}"),
                project_id: Uuid::nil(),
                category: Some(if i % 2 == 0 { "Duct" } else { "Pipe" }.to_string()),
                family: None,
                element_type: None,
                spec: None,
                location_type: None,
                material: None,
                dimensions: Dimensions {
                    length_mm: Some(i as f64),
                    ..Default::default()
                },
                metadata: Default::default(),
            })
            .collect();
        let store = Arc::new(MemoryElementStore::new(elements));

        // A single-threaded runtime can only drive the ticker while the
        // aggregation is parked on the blocking pool
        let ticker = tokio::spawn(async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            true
        });
        let (outcome, ticked) = tokio::join!(store.aggregate_patterns(None), ticker);

        let outcome = outcome.unwrap();
        assert_eq!(outcome.total_count, 20_000);
        assert_eq!(outcome.patterns.len(), 2);
        assert!(ticked.unwrap());
    }
}
