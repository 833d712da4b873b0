//! Metadata cache (§4.J): a read-set-aware wrapper around a TTL + LRU
//! cache, with precise Zookie-based staleness rejection on insert and
//! precise invalidation on write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::readset::{ReadSet, ReadSetRegistry};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    query_id: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct InvalidationCounters {
    pub precise_invalidations: u64,
    pub skipped_invalidations: u64,
    pub fallback_invalidations: u64,
    pub stale_insert_rejections: u64,
}

/// TTL + LRU cache keyed by path, with read-set-aware precise
/// invalidation (§4.J). Generic over the cached value type so both the
/// façade's file metadata and directory listings can reuse it.
pub struct MetadataCache<V: Clone> {
    inner: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    registry: ReadSetRegistry,
    precise_invalidations: AtomicU64,
    skipped_invalidations: AtomicU64,
    fallback_invalidations: AtomicU64,
    stale_insert_rejections: AtomicU64,
}

impl<V: Clone> MetadataCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
            registry: ReadSetRegistry::new(capacity.max(1)),
            precise_invalidations: AtomicU64::new(0),
            skipped_invalidations: AtomicU64::new(0),
            fallback_invalidations: AtomicU64::new(0),
            stale_insert_rejections: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(inner);
            self.evict_key(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// §4.J `put`. `read_set=None` is legacy path-based-only
    /// invalidation; otherwise any entry with `revision < zone_revision`
    /// rejects the whole insert (stale-insert rejection).
    pub fn put(&self, key: &str, value: V, read_set: Option<ReadSet>, zone_revision: Option<u64>) {
        if let (Some(rs), Some(zone_rev)) = (&read_set, zone_revision) {
            if rs.entries.iter().any(|e| e.revision < zone_rev) {
                self.stale_insert_rejections.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let query_id = read_set.as_ref().map(|rs| rs.query_id.clone());
        if let Some(rs) = read_set {
            self.registry.register(rs);
        }

        let mut inner = self.inner.lock().unwrap();
        inner.put(key.to_string(), CacheEntry { value, inserted_at: Instant::now(), query_id });
    }

    /// §4.J `invalidate_for_write`: precise invalidation via the
    /// read-set registry, falling back to exact-path match for keys
    /// with no registered read set.
    pub fn invalidate_for_write(&self, path: &str, new_rev: u64, zone_id: Option<&str>) {
        let affected = self.registry.get_affected_queries(path, new_rev, zone_id);
        let affected_queries: std::collections::HashSet<String> = affected.into_iter().collect();

        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<String> = inner.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            let Some(entry) = inner.peek(&key) else { continue };
            match &entry.query_id {
                Some(qid) if affected_queries.contains(qid) => {
                    inner.pop(&key);
                    self.registry.unregister(qid);
                    self.precise_invalidations.fetch_add(1, Ordering::Relaxed);
                }
                Some(_) => {
                    self.skipped_invalidations.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    if key == path {
                        inner.pop(&key);
                        self.fallback_invalidations.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    pub fn counters(&self) -> InvalidationCounters {
        InvalidationCounters {
            precise_invalidations: self.precise_invalidations.load(Ordering::Relaxed),
            skipped_invalidations: self.skipped_invalidations.load(Ordering::Relaxed),
            fallback_invalidations: self.fallback_invalidations.load(Ordering::Relaxed),
            stale_insert_rejections: self.stale_insert_rejections.load(Ordering::Relaxed),
        }
    }

    fn evict_key(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.pop(key) {
            if let Some(qid) = entry.query_id {
                self.registry.unregister(&qid);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
