use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;
use tracing::debug;

/// Cached view of a resolved entity: enough to short-circuit resolution and
/// to decide whether a new surface form is worth recording as an alias.
#[derive(Debug, Clone)]
pub struct CachedEntity {
    pub entity_id: String,
    pub display_name: String,
    pub normalized_name: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU of resolved entities keyed by canonical id, shared across
/// workers. Advisory only: entries are written after the database commit, so
/// a stale or missing entry costs a lookup, never correctness.
pub struct EntityCache {
    entries: RwLock<LruCache<String, CachedEntity>>,
    stats: RwLock<CacheStats>,
}

const FALLBACK_CAPACITY: usize = 1000;

impl EntityCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(FALLBACK_CAPACITY).expect("nonzero"));
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn get(&self, canonical_id: &str) -> Option<CachedEntity> {
        let mut entries = self.entries.write();
        match entries.get(canonical_id) {
            Some(entry) => {
                self.stats.write().hits += 1;
                debug!("entity cache HIT for {}", canonical_id);
                Some(entry.clone())
            }
            None => {
                self.stats.write().misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite. Overwriting is how a losing worker corrects its
    /// tentative entry after a resolution race.
    pub fn put(&self, canonical_id: String, entity: CachedEntity) {
        let mut entries = self.entries.write();
        let at_capacity = entries.len() == usize::from(entries.cap());
        let evicting = at_capacity && !entries.contains(&canonical_id);
        entries.put(canonical_id, entity);
        if evicting {
            self.stats.write().evictions += 1;
        }
    }

    pub fn invalidate(&self, canonical_id: &str) {
        self.entries.write().pop(canonical_id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}
