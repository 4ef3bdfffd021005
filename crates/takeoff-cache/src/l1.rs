//! L1: sharded in-process LRU of suggestions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use takeoff_core::ClassificationSuggestion;

type Shard = LruCache<String, ClassificationSuggestion>;

/// In-process suggestion tier.
///
/// Implementations are synchronous and must not hold a lock past the
/// returning call.
pub trait LocalCache: Send + Sync {
    fn get(&self, fingerprint: &str) -> Option<ClassificationSuggestion>;

    fn put(&self, fingerprint: &str, suggestion: ClassificationSuggestion);

    /// Returns whether an entry was removed.
    fn remove(&self, fingerprint: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fingerprint → suggestion LRU split over independently locked shards.
///
/// The total capacity is split exactly: every shard gets
/// `capacity / shards` entries and the first `capacity % shards` shards one
/// more. Eviction is least-recently-used within a shard, not across the
/// whole cache, so a hot shard can evict while others still have room.
pub struct InProcessCache {
    shards: Vec<Mutex<Shard>>,
}

impl InProcessCache {
    pub fn new(capacity: usize, shards: usize) -> Self {
        let capacity = capacity.max(1);
        let shard_count = shards.clamp(1, capacity);
        let base = capacity / shard_count;
        let remainder = capacity % shard_count;

        Self {
            shards: (0..shard_count)
                .map(|i| {
                    let share = base + usize::from(i < remainder);
                    let share = NonZeroUsize::new(share).unwrap_or(NonZeroUsize::MIN);
                    Mutex::new(LruCache::new(share))
                })
                .collect(),
        }
    }

    fn shard(&self, fingerprint: &str) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl LocalCache for InProcessCache {
    fn get(&self, fingerprint: &str) -> Option<ClassificationSuggestion> {
        self.shard(fingerprint).get(fingerprint).cloned()
    }

    fn put(&self, fingerprint: &str, suggestion: ClassificationSuggestion) {
        self.shard(fingerprint).put(fingerprint.to_string(), suggestion);
    }

    fn remove(&self, fingerprint: &str) -> bool {
        self.shard(fingerprint).pop(fingerprint).is_some()
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map(|g| g.len()).unwrap_or_else(|p| p.into_inner().len()))
            .sum()
    }
}
