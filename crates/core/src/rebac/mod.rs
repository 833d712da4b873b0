//! ReBAC tuple store and check engine (§4.E): a small Zanzibar-style
//! graph — direct relations, computed permissions, group/zone
//! indirection, public sharing, and bounded ancestor-chain inheritance.

mod schema;
mod store;

pub use schema::{permission_union, Permission};
pub use store::{Subject, SubjectRef, Tuple, TupleId, TupleStore};

use std::sync::Arc;

use crate::error::{NexusError, NexusResult};

/// Ancestor-walk depth bound (§4.E "Parent inheritance").
pub const MAX_DEPTH: usize = 10;

/// Grant specificity, most-specific first (§4.E "Result priority"):
/// direct beats implied-from-relation-union beats inherited-from-ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GrantKind {
    Inherited,
    Implied,
    Direct,
}

/// Outcome of a check, carrying the path that granted it (§4.E "Result
/// priority" — used to populate the boundary cache).
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub granted: bool,
    pub granting_object: Option<(String, String)>,
    pub kind: Option<GrantKind>,
}

impl CheckResult {
    fn deny() -> Self {
        Self { granted: false, granting_object: None, kind: None }
    }
    fn grant(object: (String, String), kind: GrantKind) -> Self {
        Self { granted: true, granting_object: Some(object), kind: Some(kind) }
    }
}

/// Check engine: resolves a computed permission against the tuple
/// graph, walking ancestors of file-type objects up to `MAX_DEPTH`.
pub struct CheckEngine {
    store: Arc<TupleStore>,
}

impl CheckEngine {
    pub fn new(store: Arc<TupleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TupleStore> {
        &self.store
    }

    /// §4.E `check`. `object` is `(object_type, object_id)`; for
    /// `object_type == "file"`, `object_id` is the virtual path and the
    /// engine walks ancestors on a direct-check miss.
    pub fn check(&self, subject: &Subject, permission: Permission, object: (&str, &str), zone_id: Option<&str>) -> bool {
        self.check_detailed(subject, permission, object, zone_id).granted
    }

    pub fn check_detailed(
        &self,
        subject: &Subject,
        permission: Permission,
        object: (&str, &str),
        zone_id: Option<&str>,
    ) -> CheckResult {
        let (object_type, object_id) = object;

        if permission == Permission::Traverse {
            // §4.E "TRAVERSE is implied by read or write".
            let read = self.check_direct_and_implied(subject, Permission::Read, object, zone_id);
            if read.granted {
                return read;
            }
            let write = self.check_direct_and_implied(subject, Permission::Write, object, zone_id);
            if write.granted {
                return write;
            }
        } else {
            let direct = self.check_direct_and_implied(subject, permission, object, zone_id);
            if direct.granted {
                return direct;
            }
        }

        if object_type != "file" {
            return CheckResult::deny();
        }

        // §4.E "Parent inheritance" / §9 "batched check for depth > 2".
        let ancestors = ancestor_chain(object_id);
        let depth = ancestors.len();
        if depth <= 2 {
            for ancestor in &ancestors {
                let result = self.check_direct_and_implied(
                    subject,
                    if permission == Permission::Traverse { Permission::Read } else { permission },
                    ("file", ancestor),
                    zone_id,
                );
                if result.granted {
                    return CheckResult::grant(
                        ("file".to_string(), ancestor.clone()),
                        GrantKind::Inherited,
                    );
                }
            }
            return CheckResult::deny();
        }

        self.check_bulk_ancestors(subject, permission, &ancestors, zone_id)
    }

    /// Bulk ancestor resolution: one tuple-store lookup covering every
    /// ancestor instead of `depth` sequential round-trips (§4.E
    /// "Batched check").
    fn check_bulk_ancestors(
        &self,
        subject: &Subject,
        permission: Permission,
        ancestors: &[String],
        zone_id: Option<&str>,
    ) -> CheckResult {
        let objects: Vec<(String, String)> =
            ancestors.iter().map(|a| ("file".to_string(), a.clone())).collect();
        let queries: Vec<(Subject, Permission, (String, String))> =
            objects.iter().map(|o| (subject.clone(), permission, o.clone())).collect();
        let results = self.check_bulk_raw(&queries, zone_id);
        for (ancestor, granted) in ancestors.iter().zip(results.iter()) {
            if *granted {
                return CheckResult::grant(("file".to_string(), ancestor.clone()), GrantKind::Inherited);
            }
        }
        CheckResult::deny()
    }

    fn check_bulk_raw(
        &self,
        queries: &[(Subject, Permission, (String, String))],
        zone_id: Option<&str>,
    ) -> Vec<bool> {
        queries
            .iter()
            .map(|(s, p, o)| self.check_direct_and_implied(s, *p, (o.0.as_str(), o.1.as_str()), zone_id).granted)
            .collect()
    }

    /// `check_bulk` (§4.E): batch-check independent `(subject,
    /// permission, object)` triples, each resolved with the full
    /// (direct + inherited) semantics.
    pub fn check_bulk(
        &self,
        queries: &[(Subject, Permission, (String, String))],
        zone_id: Option<&str>,
    ) -> Vec<bool> {
        queries
            .iter()
            .map(|(s, p, o)| self.check(s, *p, (o.0.as_str(), o.1.as_str()), zone_id))
            .collect()
    }

    /// Direct relation check at a single object, including relation
    /// union (§4.E computed permissions), group/zone indirection, and
    /// public sharing — no ancestor walk.
    fn check_direct_and_implied(
        &self,
        subject: &Subject,
        permission: Permission,
        object: (&str, &str),
        zone_id: Option<&str>,
    ) -> CheckResult {
        let required_relations = permission_union(permission);
        let tuples = self.store.list_for_object(object.0, object.1, zone_id);

        for relation in required_relations {
            for tuple in tuples.iter().filter(|t| t.relation == *relation) {
                if self.subject_matches(subject, &tuple.subject, zone_id) {
                    let kind = if *relation == permission.direct_relation_name() {
                        GrantKind::Direct
                    } else {
                        GrantKind::Implied
                    };
                    return CheckResult::grant((object.0.to_string(), object.1.to_string()), kind);
                }
            }
        }
        CheckResult::deny()
    }

    fn subject_matches(&self, subject: &Subject, candidate: &SubjectRef, zone_id: Option<&str>) -> bool {
        match candidate {
            SubjectRef::Direct(s) => s == subject,
            SubjectRef::Public => true,
            SubjectRef::Userset { object_type, object_id, relation } if object_type == "zone" && relation == "member" => {
                // §4.E "zone acts like group": membership is implied by
                // the checking context's zone matching the tuple's zone,
                // or by an explicit membership tuple.
                zone_id == Some(object_id.as_str())
                    || self.store.has_direct_tuple(subject, relation, "zone", object_id)
            }
            SubjectRef::Userset { object_type, object_id, relation } => {
                self.store.has_direct_tuple(subject, relation, object_type, object_id)
            }
        }
    }

    /// §4.E `expand`: the set of subjects (direct only — group/zone
    /// usersets are reported as themselves, not recursively expanded)
    /// holding `relation` on `object`.
    pub fn expand(&self, object: (&str, &str), relation: &str) -> Vec<SubjectRef> {
        self.store
            .list_for_object(object.0, object.1, None)
            .into_iter()
            .filter(|t| t.relation == relation)
            .map(|t| t.subject)
            .collect()
    }
}

/// Ancestors of a file path, nearest first: `/a/b/c` -> `["/a/b", "/a", "/"]`.
/// Bounded by `MAX_DEPTH`.
fn ancestor_chain(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        if out.len() >= MAX_DEPTH {
            break;
        }
        let parent = if idx == 0 { "/" } else { &current[..idx] };
        out.push(parent.to_string());
        if parent == "/" {
            break;
        }
        current = parent;
    }
    out
}

pub fn validate_tuple(tuple: &Tuple) -> NexusResult<()> {
    if tuple.relation.is_empty() {
        return Err(NexusError::Validation("tuple relation must not be empty".to_string()));
    }
    if tuple.object.0.is_empty() || tuple.object.1.is_empty() {
        return Err(NexusError::Validation("tuple object must have type and id".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (Arc<TupleStore>, CheckEngine) {
        let store = Arc::new(TupleStore::new());
        let engine = CheckEngine::new(store.clone());
        (store, engine)
    }

    #[test]
    fn direct_viewer_grants_read() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        store.write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/a.txt"), None)).unwrap();
        assert!(engine.check(&alice, Permission::Read, ("file", "/a.txt"), None));
        assert!(!engine.check(&alice, Permission::Write, ("file", "/a.txt"), None));
    }

    #[test]
    fn inheritance_grants_descendants() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        store
            .write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/workspace/proj"), None))
            .unwrap();
        assert!(engine.check(&alice, Permission::Read, ("file", "/workspace/proj/a/b/c.txt"), None));
    }

    #[test]
    fn deleting_tuple_revokes_inherited_access() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        let id = store
            .write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/workspace/proj"), None))
            .unwrap();
        assert!(engine.check(&alice, Permission::Read, ("file", "/workspace/proj/a/b/c.txt"), None));
        store.delete(id);
        assert!(!engine.check(&alice, Permission::Read, ("file", "/workspace/proj/a/b/c.txt"), None));
    }

    #[test]
    fn group_membership_grants_via_userset() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        store.write(Tuple::direct(SubjectRef::Direct(alice.clone()), "member", ("group", "eng"), None)).unwrap();
        store
            .write(Tuple::direct(
                SubjectRef::Userset { object_type: "group".to_string(), object_id: "eng".to_string(), relation: "member".to_string() },
                "direct_editor",
                ("file", "/shared/doc.txt"),
                None,
            ))
            .unwrap();
        assert!(engine.check(&alice, Permission::Write, ("file", "/shared/doc.txt"), None));
    }

    #[test]
    fn public_role_grants_everyone() {
        let (store, engine) = engine();
        store
            .write(Tuple::direct(SubjectRef::Public, "direct_viewer", ("file", "/public/readme.md"), None))
            .unwrap();
        let bob = Subject::new("user", "bob");
        assert!(engine.check(&bob, Permission::Read, ("file", "/public/readme.md"), None));
    }

    #[test]
    fn deep_path_uses_batched_ancestor_walk() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        store.write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_owner", ("file", "/a"), None)).unwrap();
        assert!(engine.check(&alice, Permission::Write, ("file", "/a/b/c/d/e/f.txt"), None));
    }

    #[test]
    fn ancestor_walk_is_bounded_by_max_depth() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        // Grant at root: within MAX_DEPTH for a path this shallow.
        store.write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/"), None)).unwrap();
        let deep_path = format!("/{}", (0..MAX_DEPTH + 5).map(|i| format!("d{i}")).collect::<Vec<_>>().join("/"));
        // Root grant is beyond MAX_DEPTH ancestors away; the walk must not find it.
        assert!(!engine.check(&alice, Permission::Read, ("file", &deep_path), None));
    }

    #[test]
    fn check_bulk_resolves_independent_queries() {
        let (store, engine) = engine();
        let alice = Subject::new("user", "alice");
        store.write(Tuple::direct(SubjectRef::Direct(alice.clone()), "direct_viewer", ("file", "/a.txt"), None)).unwrap();
        let queries = vec![
            (alice.clone(), Permission::Read, ("file".to_string(), "/a.txt".to_string())),
            (alice.clone(), Permission::Read, ("file".to_string(), "/b.txt".to_string())),
        ];
        let results = engine.check_bulk(&queries, None);
        assert_eq!(results, vec![true, false]);
    }
}
