//! Read-set registry (§4.I): every read records which resources (and
//! at which revision) it observed, indexed for O(1) write-time
//! invalidation lookups.

use std::sync::RwLock;

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Content,
    Metadata,
    List,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    File,
    Directory,
    Metadata,
}

#[derive(Debug, Clone)]
pub struct ReadSetEntry {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub revision: u64,
    pub access_type: AccessType,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct ReadSet {
    pub query_id: String,
    pub zone_id: Option<String>,
    pub entries: Vec<ReadSetEntry>,
}

impl ReadSet {
    pub fn new(query_id: impl Into<String>, zone_id: Option<String>) -> Self {
        Self { query_id: query_id.into(), zone_id, entries: Vec::new() }
    }

    pub fn record(&mut self, resource_type: ResourceType, resource_id: impl Into<String>, revision: u64, access_type: AccessType, timestamp: u64) {
        self.entries.push(ReadSetEntry { resource_type, resource_id: resource_id.into(), revision, access_type, timestamp });
    }

    /// §4.I "Overlap rule": true iff a directly-read entry for `path`
    /// exists at a revision older than `write_rev`, OR a
    /// directory-listing entry for some ancestor `D/` exists at a
    /// revision older than `write_rev` and `path` begins with `D/`.
    ///
    /// Regression guard (§4.I): condition (2) must still be evaluated
    /// even when (1) is satisfied by a revision that is *not* stale —
    /// a prior bug short-circuited on the direct-entry check alone.
    pub fn overlaps_with_write(&self, path: &str, write_rev: u64) -> bool {
        let mut overlaps = false;
        for entry in &self.entries {
            match entry.access_type {
                AccessType::List => {
                    let dir = entry.resource_id.trim_end_matches('/');
                    let under_dir = path == dir || (path.starts_with(dir) && path[dir.len()..].starts_with('/'));
                    if under_dir && entry.revision < write_rev {
                        overlaps = true;
                    }
                }
                _ => {
                    if entry.resource_id == path && entry.revision < write_rev {
                        overlaps = true;
                    }
                }
            }
        }
        overlaps
    }
}

/// Registers read sets, indexed by resource path and by zone for O(1)
/// write-time invalidation (§4.I "Indices").
pub struct ReadSetRegistry {
    sets: DashMap<String, ReadSet>,
    by_path: DashMap<String, RwLock<Vec<String>>>,
    by_zone: DashMap<String, RwLock<Vec<String>>>,
    capacity: usize,
}

impl ReadSetRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { sets: DashMap::new(), by_path: DashMap::new(), by_zone: DashMap::new(), capacity: capacity.max(1) }
    }

    /// §4.I `register`.
    pub fn register(&self, read_set: ReadSet) {
        if self.sets.len() >= self.capacity && !self.sets.contains_key(&read_set.query_id) {
            self.evict_one();
        }

        for entry in &read_set.entries {
            self.by_path
                .entry(entry.resource_id.clone())
                .or_insert_with(|| RwLock::new(Vec::new()))
                .write()
                .unwrap()
                .push(read_set.query_id.clone());
        }
        if let Some(zone) = &read_set.zone_id {
            self.by_zone
                .entry(zone.clone())
                .or_insert_with(|| RwLock::new(Vec::new()))
                .write()
                .unwrap()
                .push(read_set.query_id.clone());
        }
        self.sets.insert(read_set.query_id.clone(), read_set);
    }

    /// §4.I `unregister`: removes from both indices.
    pub fn unregister(&self, query_id: &str) {
        let Some((_, read_set)) = self.sets.remove(query_id) else { return };
        for entry in &read_set.entries {
            if let Some(ids) = self.by_path.get(&entry.resource_id) {
                ids.write().unwrap().retain(|q| q != query_id);
            }
        }
        if let Some(zone) = &read_set.zone_id {
            if let Some(ids) = self.by_zone.get(zone) {
                ids.write().unwrap().retain(|q| q != query_id);
            }
        }
    }

    pub fn get_read_set(&self, query_id: &str) -> Option<ReadSet> {
        self.sets.get(query_id).map(|e| e.clone())
    }

    /// §4.I `get_affected_queries`.
    pub fn get_affected_queries(&self, path: &str, new_rev: u64, zone_id: Option<&str>) -> Vec<String> {
        let mut candidates: std::collections::HashSet<String> = std::collections::HashSet::new();
        if let Some(ids) = self.by_path.get(path) {
            candidates.extend(ids.read().unwrap().iter().cloned());
        }
        // Ancestor listing entries may also overlap; scan directory
        // index keys that are a prefix of `path`.
        for entry in self.by_path.iter() {
            let dir = entry.key();
            if path != *dir && (path.starts_with(&format!("{dir}/")) || dir == "/") {
                candidates.extend(entry.value().read().unwrap().iter().cloned());
            }
        }

        let mut affected: Vec<String> = candidates
            .into_iter()
            .filter(|qid| {
                self.sets
                    .get(qid)
                    .map(|rs| rs.overlaps_with_write(path, new_rev))
                    .unwrap_or(false)
            })
            .collect();

        if let Some(zone) = zone_id {
            let zone_members: std::collections::HashSet<String> = self
                .by_zone
                .get(zone)
                .map(|ids| ids.read().unwrap().iter().cloned().collect())
                .unwrap_or_default();
            affected.retain(|q| zone_members.contains(q));
        }

        affected
    }

    /// §4.I `get_queries_for_zone`.
    pub fn get_queries_for_zone(&self, zone: &str) -> Vec<String> {
        self.by_zone.get(zone).map(|ids| ids.read().unwrap().clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Bounded by the hosting cache's capacity (§4.I "Bounds"):
    /// eviction drops an arbitrary registered set to make room.
    fn evict_one(&self) {
        if let Some(qid) = self.sets.iter().next().map(|e| e.key().clone()) {
            self.unregister(&qid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_entry_overlap_rule() {
        let mut rs = ReadSet::new("q1", None);
        rs.record(ResourceType::File, "/inbox/a.txt", 0, AccessType::Content, 0);
        assert!(rs.overlaps_with_write("/inbox/a.txt", 1));
        assert!(!rs.overlaps_with_write("/inbox/a.txt", 0));
    }

    #[test]
    fn listing_entry_overlap_extends_to_descendants() {
        let mut rs = ReadSet::new("q1", None);
        rs.record(ResourceType::Directory, "/inbox", 0, AccessType::List, 0);
        assert!(rs.overlaps_with_write("/inbox/new.txt", 1));
        assert!(!rs.overlaps_with_write("/other/new.txt", 1));
    }

    /// Regression guard named explicitly in §4.I: a non-stale direct
    /// entry must not short-circuit evaluation of the listing entry.
    #[test]
    fn non_stale_direct_entry_does_not_mask_stale_listing_entry() {
        let mut rs = ReadSet::new("q1", None);
        rs.record(ResourceType::File, "/inbox/a.txt", 5, AccessType::Content, 0);
        rs.record(ResourceType::Directory, "/inbox", 0, AccessType::List, 0);
        // write_rev=1: direct entry at rev 5 is NOT stale (5 >= 1), but
        // the listing entry at rev 0 IS stale (0 < 1) and still must fire.
        assert!(rs.overlaps_with_write("/inbox/a.txt", 1));
    }

    #[test]
    fn registry_indices_updated_on_register_and_unregister() {
        let registry = ReadSetRegistry::new(100);
        let mut rs = ReadSet::new("q1", Some("zoneA".to_string()));
        rs.record(ResourceType::File, "/a.txt", 0, AccessType::Content, 0);
        registry.register(rs);

        assert_eq!(registry.get_affected_queries("/a.txt", 1, None), vec!["q1".to_string()]);
        assert_eq!(registry.get_queries_for_zone("zoneA"), vec!["q1".to_string()]);

        registry.unregister("q1");
        assert!(registry.get_affected_queries("/a.txt", 1, None).is_empty());
        assert!(registry.get_queries_for_zone("zoneA").is_empty());
    }

    #[test]
    fn zone_filter_is_strict_subset() {
        let registry = ReadSetRegistry::new(100);
        let mut rs_a = ReadSet::new("qa", Some("zoneA".to_string()));
        rs_a.record(ResourceType::File, "/a.txt", 0, AccessType::Content, 0);
        registry.register(rs_a);
        let mut rs_b = ReadSet::new("qb", Some("zoneB".to_string()));
        rs_b.record(ResourceType::File, "/a.txt", 0, AccessType::Content, 0);
        registry.register(rs_b);

        let unfiltered = registry.get_affected_queries("/a.txt", 1, None);
        let filtered = registry.get_affected_queries("/a.txt", 1, Some("zoneA"));
        assert_eq!(filtered, vec!["qa".to_string()]);
        assert!(unfiltered.len() >= filtered.len());
    }
}
