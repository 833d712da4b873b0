//! Tiger cache (§4.F): per-subject Roaring-bitmap cache of accessible
//! resource int-IDs, backed by a stable resource int-ID map, plus a
//! background-update work queue.

mod queue;
mod resource_map;

pub use queue::{QueueStatus, TigerUpdateQueue};
pub use resource_map::ResourceIdMap;

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use roaring::RoaringBitmap;

/// Cache key: `(subject_type, subject_id, permission, resource_type, zone_id)` (§4.F).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitmapKey {
    pub subject_type: String,
    pub subject_id: String,
    pub permission: String,
    pub resource_type: String,
    pub zone_id: Option<String>,
}

struct BitmapEntry {
    bitmap: RoaringBitmap,
    revision: u64,
    recorded_at: Instant,
}

/// In-memory write-through cache of per-subject accessible-resource
/// bitmaps, size-capped with oldest-first eviction (§4.F "Eviction").
pub struct TigerCache {
    entries: DashMap<BitmapKey, BitmapEntry>,
    capacity: usize,
}

impl TigerCache {
    pub fn new(capacity: usize) -> Self {
        Self { entries: DashMap::new(), capacity: capacity.max(1) }
    }

    /// §4.F `accessible_resources`: empty set on a cache miss — the
    /// caller is expected to fall back to a tuple check.
    pub fn accessible_resources(&self, key: &BitmapKey) -> Vec<u32> {
        self.entries.get(key).map(|e| e.bitmap.iter().collect()).unwrap_or_default()
    }

    /// §4.F `check`: `None` on miss, `Some(bool)` otherwise.
    pub fn check(&self, key: &BitmapKey, resource_int_id: u32) -> Option<bool> {
        self.entries.get(key).map(|e| e.bitmap.contains(resource_int_id))
    }

    /// §4.F `add`: write-through incremental insert.
    pub fn add(&self, key: &BitmapKey, resource_int_id: u32) {
        self.with_entry_mut(key, |bitmap| {
            bitmap.insert(resource_int_id);
        });
    }

    /// §4.F `remove`.
    pub fn remove(&self, key: &BitmapKey, resource_int_id: u32) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.bitmap.remove(resource_int_id);
        }
    }

    /// §4.F `update`: full rebuild after a background recomputation.
    pub fn update(&self, key: BitmapKey, resource_int_ids: impl IntoIterator<Item = u32>, revision: u64) {
        self.evict_if_full(&key);
        let bitmap: RoaringBitmap = resource_int_ids.into_iter().collect();
        self.entries.insert(key, BitmapEntry { bitmap, revision, recorded_at: Instant::now() });
    }

    pub fn revision_of(&self, key: &BitmapKey) -> Option<u64> {
        self.entries.get(key).map(|e| e.revision)
    }

    /// §4.F `invalidate`: LIKE-style wildcard drop — any `None` field
    /// in `pattern` matches every value.
    pub fn invalidate(&self, pattern: &InvalidatePattern) {
        self.entries.retain(|k, _| !pattern.matches(k));
    }

    fn with_entry_mut(&self, key: &BitmapKey, f: impl FnOnce(&mut RoaringBitmap)) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            f(&mut entry.bitmap);
            return;
        }
        self.evict_if_full(key);
        let mut bitmap = RoaringBitmap::new();
        f(&mut bitmap);
        self.entries.insert(key.clone(), BitmapEntry { bitmap, revision: 0, recorded_at: Instant::now() });
    }

    /// §4.F "Eviction": size-capped at `capacity`; drop the oldest 10%
    /// by recorded time when full.
    fn evict_if_full(&self, incoming_key: &BitmapKey) {
        if self.entries.contains_key(incoming_key) || self.entries.len() < self.capacity {
            return;
        }
        let mut by_age: Vec<(BitmapKey, Instant)> =
            self.entries.iter().map(|e| (e.key().clone(), e.value().recorded_at)).collect();
        by_age.sort_by_key(|(_, t)| *t);
        let evict_count = (self.entries.len() / 10).max(1);
        for (key, _) in by_age.into_iter().take(evict_count) {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Wildcard invalidation pattern for `TigerCache::invalidate` (§4.F).
#[derive(Debug, Clone, Default)]
pub struct InvalidatePattern {
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub permission: Option<String>,
    pub resource_type: Option<String>,
    pub zone_id: Option<String>,
}

impl InvalidatePattern {
    fn matches(&self, key: &BitmapKey) -> bool {
        self.subject_type.as_deref().map_or(true, |v| v == key.subject_type)
            && self.subject_id.as_deref().map_or(true, |v| v == key.subject_id)
            && self.permission.as_deref().map_or(true, |v| v == key.permission)
            && self.resource_type.as_deref().map_or(true, |v| v == key.resource_type)
            && self.zone_id.as_ref().map_or(true, |v| Some(v.as_str()) == key.zone_id.as_deref())
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(subject: &str) -> BitmapKey {
        BitmapKey {
            subject_type: "user".to_string(),
            subject_id: subject.to_string(),
            permission: "read".to_string(),
            resource_type: "file".to_string(),
            zone_id: None,
        }
    }

    #[test]
    fn miss_returns_empty_and_none() {
        let cache = TigerCache::new(10);
        let k = key("alice");
        assert!(cache.accessible_resources(&k).is_empty());
        assert_eq!(cache.check(&k, 5), None);
    }

    #[test]
    fn update_then_check_hits() {
        let cache = TigerCache::new(10);
        let k = key("alice");
        cache.update(k.clone(), [1, 2, 3], 7);
        assert_eq!(cache.check(&k, 2), Some(true));
        assert_eq!(cache.check(&k, 99), Some(false));
        assert_eq!(cache.revision_of(&k), Some(7));
    }

    #[test]
    fn add_and_remove_are_write_through() {
        let cache = TigerCache::new(10);
        let k = key("alice");
        cache.update(k.clone(), [1], 1);
        cache.add(&k, 2);
        assert_eq!(cache.check(&k, 2), Some(true));
        cache.remove(&k, 2);
        assert_eq!(cache.check(&k, 2), Some(false));
    }

    #[test]
    fn invalidate_by_subject_drops_matching_entries_only() {
        let cache = TigerCache::new(10);
        cache.update(key("alice"), [1], 1);
        cache.update(key("bob"), [1], 1);
        cache.invalidate(&InvalidatePattern { subject_id: Some("alice".to_string()), ..Default::default() });
        assert!(cache.check(&key("alice"), 1).is_none());
        assert_eq!(cache.check(&key("bob"), 1), Some(true));
    }

    #[test]
    fn eviction_drops_oldest_tenth_when_full() {
        let cache = TigerCache::new(10);
        for i in 0..10 {
            cache.update(key(&format!("user{i}")), [1], 1);
        }
        assert_eq!(cache.len(), 10);
        cache.update(key("overflow"), [1], 1);
        assert!(cache.len() <= 10);
        assert!(cache.check(&key("user0"), 1).is_none(), "oldest entry should have been evicted");
    }
}
