//! Stable resource int-ID assignment with reverse lookup (§4.F
//! "Resource int-ID map", §9 "string interning ... mapped abstractly to
//! deterministic id assignment").

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

pub type ResourceKey = (String, String, Option<String>);

/// Assigns a stable `u32` to each `(resource_type, resource_id,
/// zone_id)` triple, insert-on-miss, with an in-memory reverse map.
pub struct ResourceIdMap {
    forward: DashMap<ResourceKey, u32>,
    reverse: DashMap<u32, ResourceKey>,
    next_id: AtomicU32,
}

impl Default for ResourceIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceIdMap {
    pub fn new() -> Self {
        Self { forward: DashMap::new(), reverse: DashMap::new(), next_id: AtomicU32::new(1) }
    }

    /// Insert-on-miss `UPSERT`-like get-or-create.
    pub fn get_or_create(&self, resource_type: &str, resource_id: &str, zone_id: Option<&str>) -> u32 {
        let key: ResourceKey = (resource_type.to_string(), resource_id.to_string(), zone_id.map(str::to_string));
        if let Some(existing) = self.forward.get(&key) {
            return *existing;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.forward.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(id);
                self.reverse.insert(id, key);
                id
            }
        }
    }

    pub fn get(&self, resource_type: &str, resource_id: &str, zone_id: Option<&str>) -> Option<u32> {
        let key: ResourceKey = (resource_type.to_string(), resource_id.to_string(), zone_id.map(str::to_string));
        self.forward.get(&key).map(|v| *v)
    }

    pub fn reverse_lookup(&self, int_id: u32) -> Option<ResourceKey> {
        self.reverse.get(&int_id).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_resource_gets_same_id() {
        let map = ResourceIdMap::new();
        let a = map.get_or_create("file", "/a.txt", None);
        let b = map.get_or_create("file", "/a.txt", None);
        assert_eq!(a, b);
    }

    #[test]
    fn different_zones_get_different_ids() {
        let map = ResourceIdMap::new();
        let a = map.get_or_create("file", "/a.txt", Some("zone1"));
        let b = map.get_or_create("file", "/a.txt", Some("zone2"));
        assert_ne!(a, b);
    }

    #[test]
    fn reverse_lookup_recovers_original_key() {
        let map = ResourceIdMap::new();
        let id = map.get_or_create("file", "/a.txt", None);
        let (ty, rid, zone) = map.reverse_lookup(id).unwrap();
        assert_eq!(ty, "file");
        assert_eq!(rid, "/a.txt");
        assert_eq!(zone, None);
    }
}
