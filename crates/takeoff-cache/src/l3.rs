//! L3: materialized view over the last aggregation run.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::info;

use takeoff_core::{AggregationOutcome, Pattern};

struct Snapshot {
    by_fingerprint: HashMap<String, Arc<Pattern>>,
    refreshed_at: Instant,
}

/// Pattern tier: the result of the last aggregation run.
pub trait PatternView: Send + Sync {
    /// Swap in the result of a new aggregation run.
    fn replace(&self, outcome: AggregationOutcome);

    /// Pattern for a fingerprint, `None` if unknown or the view is stale.
    fn get(&self, fingerprint: &str) -> Option<Arc<Pattern>>;

    /// Every fingerprint in the current view, sorted.
    fn fingerprints(&self) -> Vec<String>;

    /// True when there is nothing fresh to serve.
    fn is_stale(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-mostly snapshot of patterns keyed by fingerprint.
///
/// Replaced wholesale by [`PatternView::replace`], never patched per
/// request. Older than `max_age`, the view answers nothing until the next
/// refresh.
pub struct MaterializedPatternView {
    snapshot: RwLock<Option<Snapshot>>,
    max_age: Duration,
}

impl MaterializedPatternView {
    pub fn new(max_age: Duration) -> Self {
        Self {
            snapshot: RwLock::new(None),
            max_age,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> Option<T>) -> Option<T> {
        let guard = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = guard.as_ref()?;
        if snapshot.refreshed_at.elapsed() >= self.max_age {
            return None;
        }
        f(snapshot)
    }
}

impl PatternView for MaterializedPatternView {
    fn replace(&self, outcome: AggregationOutcome) {
        let by_fingerprint: HashMap<String, Arc<Pattern>> = outcome
            .patterns
            .into_iter()
            .map(|pattern| (pattern.fingerprint.clone(), Arc::new(pattern)))
            .collect();

        info!(
            subsystem = "cache",
            component = "l3",
            pattern_count = by_fingerprint.len(),
            element_count = outcome.total_count,
            skipped_count = outcome.skipped_count,
            "Materialized pattern view replaced"
        );

        let snapshot = Snapshot {
            by_fingerprint,
            refreshed_at: Instant::now(),
        };
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot);
    }

    fn get(&self, fingerprint: &str) -> Option<Arc<Pattern>> {
        self.read(|s| s.by_fingerprint.get(fingerprint).cloned())
    }

    fn fingerprints(&self) -> Vec<String> {
        self.read(|s| {
            let mut fps: Vec<String> = s.by_fingerprint.keys().cloned().collect();
            fps.sort();
            Some(fps)
        })
        .unwrap_or_default()
    }

    fn is_stale(&self) -> bool {
        self.read(|_| Some(())).is_none()
    }

    fn len(&self) -> usize {
        self.read(|s| Some(s.by_fingerprint.len())).unwrap_or(0)
    }
}
