//! L4: rendered prompt cache.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

#[derive(Debug, Clone)]
struct PromptEntry {
    template_version: u32,
    stats_digest: String,
    text: Arc<str>,
}

/// Rendered prompt tier.
///
/// A hit requires the stored template version and stats digest to match
/// the lookup.
pub trait PromptCache: Send + Sync {
    fn get(&self, fingerprint: &str, template_version: u32, stats_digest: &str) -> Option<Arc<str>>;

    fn put(&self, fingerprint: &str, template_version: u32, stats_digest: &str, text: Arc<str>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU of rendered prompts keyed by fingerprint.
///
/// Each entry remembers the template version and the pattern stats digest
/// it was rendered from. A lookup with a different version or digest is a
/// miss and drops the entry.
pub struct RenderedPromptCache {
    entries: Mutex<LruCache<String, PromptEntry>>,
}

impl RenderedPromptCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, PromptEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PromptCache for RenderedPromptCache {
    fn get(&self, fingerprint: &str, template_version: u32, stats_digest: &str) -> Option<Arc<str>> {
        let mut entries = self.lock();
        let fresh = match entries.get(fingerprint) {
            Some(entry) => {
                entry.template_version == template_version && entry.stats_digest == stats_digest
            }
            None => return None,
        };
        if !fresh {
            entries.pop(fingerprint);
            return None;
        }
        entries.get(fingerprint).map(|e| Arc::clone(&e.text))
    }

    fn put(&self, fingerprint: &str, template_version: u32, stats_digest: &str, text: Arc<str>) {
        self.lock().put(
            fingerprint.to_string(),
            PromptEntry {
                template_version,
                stats_digest: stats_digest.to_string(),
                text,
            },
        );
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
