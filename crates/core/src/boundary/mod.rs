//! Boundary cache (§4.G): caches the nearest ancestor that grants a
//! permission, so a re-check skips the ancestor walk entirely.

use std::sync::Arc;

use dashmap::DashMap;

use crate::rebac::{CheckEngine, Permission, Subject, TupleStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    zone_id: Option<String>,
    subject_type: String,
    subject_id: String,
    permission: &'static str,
    path: String,
}

/// `(zone, subject_type, subject_id, permission, path) -> boundary path`.
pub struct BoundaryCache {
    entries: DashMap<Key, String>,
}

impl Default for BoundaryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundaryCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Wire this cache's eviction into a tuple store's changelog (§4.G
    /// "Must register an invalidation callback with the tuple store").
    /// Any boundary whose path is on the ancestor chain of the written
    /// tuple's object is evicted — conservatively, every cached
    /// boundary that is a prefix of (or equal to) the tuple's path.
    pub fn attach(self: &Arc<Self>, store: &TupleStore) {
        let this = self.clone();
        store.on_change(move |tuple| {
            if tuple.object.0 != "file" {
                return;
            }
            this.invalidate_chain(&tuple.object.1);
        });
    }

    pub fn get(&self, zone_id: Option<&str>, subject: &Subject, permission: Permission, path: &str) -> Option<String> {
        let key = Key {
            zone_id: zone_id.map(str::to_string),
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
            permission: permission.as_str(),
            path: path.to_string(),
        };
        self.entries.get(&key).map(|v| v.clone())
    }

    pub fn set(&self, zone_id: Option<&str>, subject: &Subject, permission: Permission, path: &str, boundary: &str) {
        let key = Key {
            zone_id: zone_id.map(str::to_string),
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
            permission: permission.as_str(),
            path: path.to_string(),
        };
        self.entries.insert(key, boundary.to_string());
    }

    /// Re-verify the single tuple at a cached boundary (cheap path
    /// that skips the ancestor walk entirely on success).
    pub fn reverify(&self, engine: &CheckEngine, subject: &Subject, permission: Permission, boundary: &str, zone_id: Option<&str>) -> bool {
        engine.check(subject, permission, ("file", boundary), zone_id)
    }

    /// Evict every cached boundary equal to or an ancestor of `path`
    /// (a write/delete at `path` may have changed any of them).
    fn invalidate_chain(&self, path: &str) {
        self.entries.retain(|k, _| !(k.path == path || path.starts_with(&format!("{}/", k.path)) || k.path.starts_with(&format!("{path}/"))));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebac::{SubjectRef, Tuple};

    #[test]
    fn boundary_hit_skips_ancestor_walk_and_invalidates_on_delete() {
        let store = Arc::new(TupleStore::new());
        let engine = CheckEngine::new(store.clone());
        let boundary = Arc::new(BoundaryCache::new());
        boundary.attach(&store);

        let alice = Subject::new("user", "alice");
        let id = store
            .write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/workspace/proj"), None))
            .unwrap();

        assert!(engine.check(&alice, Permission::Read, ("file", "/workspace/proj/a/b/c.txt"), None));
        boundary.set(None, &alice, Permission::Read, "/workspace/proj/a/b/c.txt", "/workspace/proj");

        assert!(boundary.reverify(&engine, &alice, Permission::Read, "/workspace/proj", None));

        store.delete(id);
        assert!(boundary.get(None, &alice, Permission::Read, "/workspace/proj/a/b/c.txt").is_none());
        assert!(!engine.check(&alice, Permission::Read, ("file", "/workspace/proj/a/b/c.txt"), None));
    }
}
