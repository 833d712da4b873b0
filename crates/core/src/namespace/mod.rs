//! Namespace manager (§4.H): per-subject path visibility, independent
//! of fine-grained permission. Unmounted/invisible paths are
//! `NotFound`, never `AccessDenied`.

use std::sync::RwLock;

use dashmap::DashMap;

use crate::rebac::{CheckEngine, Permission, Subject};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubjectKey {
    subject_type: String,
    subject_id: String,
}

struct SubjectView {
    grants_hash: u64,
    /// Cached `NotFound` decisions (path -> visible), invalidated in
    /// bulk whenever `grants_hash` changes (§4.H).
    decisions: RwLock<DashMap<String, bool>>,
}

/// Per-subject visibility over the mount table, backed by the ReBAC
/// traverse permission: a path is visible if the subject can traverse
/// it (directly or via an ancestor grant).
pub struct NamespaceManager {
    views: DashMap<SubjectKey, SubjectView>,
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceManager {
    pub fn new() -> Self {
        Self { views: DashMap::new() }
    }

    /// §4.H `is_visible`.
    pub fn is_visible(&self, engine: &CheckEngine, subject: &Subject, path: &str, zone_id: Option<&str>) -> bool {
        let key = SubjectKey { subject_type: subject.subject_type.clone(), subject_id: subject.subject_id.clone() };
        let current_hash = self.grants_hash_for(engine, subject, zone_id);

        let view = self.views.entry(key).or_insert_with(|| SubjectView {
            grants_hash: current_hash,
            decisions: RwLock::new(DashMap::new()),
        });

        if view.grants_hash != current_hash {
            view.decisions.write().unwrap().clear();
        }
        drop(view);

        if let Some(view) = self.views.get(&SubjectKey {
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
        }) {
            if let Some(cached) = view.decisions.read().unwrap().get(path) {
                return *cached;
            }
        }

        let visible = engine.check(subject, Permission::Traverse, ("file", path), zone_id)
            || engine.check(subject, Permission::Read, ("file", path), zone_id);

        if let Some(view) = self.views.get(&SubjectKey {
            subject_type: subject.subject_type.clone(),
            subject_id: subject.subject_id.clone(),
        }) {
            view.decisions.read().unwrap().insert(path.to_string(), visible);
        }
        visible
    }

    /// A short digest of the subject's current view, bumped whenever
    /// their ReBAC grants change (§4.H "grants_hash").
    fn grants_hash_for(&self, engine: &CheckEngine, subject: &Subject, _zone_id: Option<&str>) -> u64 {
        engine.store().current_change_id()
    }

    /// Invalidate a subject's cached view explicitly (e.g. after a
    /// bulk grant change that the changelog doesn't cover per-subject).
    pub fn invalidate(&self, subject: &Subject) {
        self.views.remove(&SubjectKey { subject_type: subject.subject_type.clone(), subject_id: subject.subject_id.clone() });
    }

    pub fn invalidate_all(&self) {
        self.views.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebac::{SubjectRef, Tuple, TupleStore};
    use std::sync::Arc;

    #[test]
    fn unmounted_path_is_invisible() {
        let store = Arc::new(TupleStore::new());
        let engine = CheckEngine::new(store);
        let ns = NamespaceManager::new();
        let bob = Subject::new("agent", "bot2");
        assert!(!ns.is_visible(&engine, &bob, "/workspace/secret", None));
    }

    #[test]
    fn granting_traverse_makes_path_visible() {
        let store = Arc::new(TupleStore::new());
        let engine = CheckEngine::new(store.clone());
        let ns = NamespaceManager::new();
        let alice = Subject::new("user", "alice");
        assert!(!ns.is_visible(&engine, &alice, "/workspace/proj", None));
        store
            .write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/workspace/proj"), None))
            .unwrap();
        assert!(ns.is_visible(&engine, &alice, "/workspace/proj", None));
    }

    #[test]
    fn visibility_monotonicity_revoke_does_not_grow_visible_set() {
        let store = Arc::new(TupleStore::new());
        let engine = CheckEngine::new(store.clone());
        let ns = NamespaceManager::new();
        let alice = Subject::new("user", "alice");
        let id = store
            .write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/a"), None))
            .unwrap();
        assert!(ns.is_visible(&engine, &alice, "/a", None));
        store.delete(id);
        assert!(!ns.is_visible(&engine, &alice, "/a", None));
    }
}
