//! Tuple store (§4.E, §3 "Permission tuple"): write/delete/list with
//! deterministic dedup and a monotonic changelog for cache staleness
//! detection (the "Zookie pattern").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use dashmap::DashMap;

pub type TupleId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    pub subject_type: String,
    pub subject_id: String,
}

impl Subject {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self { subject_type: subject_type.into(), subject_id: subject_id.into() }
    }
}

/// A tuple's subject: a direct subject, a userset indirection through
/// another object's relation (group/zone membership), or the public
/// role (§3 "Userset", §4.E "Public sharing").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubjectRef {
    Direct(Subject),
    Userset { object_type: String, object_id: String, relation: String },
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub subject: SubjectRef,
    pub relation: String,
    pub object: (String, String),
    pub zone_id: Option<String>,
}

impl Tuple {
    pub fn direct(subject: SubjectRef, relation: impl Into<String>, object: (&str, &str), zone_id: Option<&str>) -> Self {
        Self {
            subject,
            relation: relation.into(),
            object: (object.0.to_string(), object.1.to_string()),
            zone_id: zone_id.map(str::to_string),
        }
    }
}

struct Entry {
    tuple: Tuple,
    change_id: u64,
}

/// In-memory tuple store. Indexed by object for `list`/check lookups;
/// dedup is by the full 4-tuple (§3 "deterministic dedup").
pub struct TupleStore {
    by_id: DashMap<TupleId, Entry>,
    by_object: DashMap<(String, String), Vec<TupleId>>,
    next_id: AtomicU64,
    change_id: AtomicU64,
    invalidation_callbacks: RwLock<Vec<Box<dyn Fn(&Tuple) + Send + Sync>>>,
}

impl Default for TupleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TupleStore {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_object: DashMap::new(),
            next_id: AtomicU64::new(1),
            change_id: AtomicU64::new(0),
            invalidation_callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback invoked on every write/delete (§4.G
    /// "Must register an invalidation callback with the tuple store").
    pub fn on_change(&self, callback: impl Fn(&Tuple) + Send + Sync + 'static) {
        self.invalidation_callbacks.write().unwrap().push(Box::new(callback));
    }

    fn notify(&self, tuple: &Tuple) {
        for cb in self.invalidation_callbacks.read().unwrap().iter() {
            cb(tuple);
        }
    }

    fn next_change_id(&self) -> u64 {
        self.change_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// §4.E `write`. Deterministic dedup: writing an identical tuple
    /// again returns the existing id without creating a duplicate.
    pub fn write(&self, tuple: Tuple) -> super::NexusResult<TupleId> {
        super::validate_tuple(&tuple)?;

        let key = tuple.object.clone();
        if let Some(ids) = self.by_object.get(&key) {
            for id in ids.iter() {
                if let Some(entry) = self.by_id.get(id) {
                    if entry.tuple == tuple {
                        return Ok(*id);
                    }
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let change_id = self.next_change_id();
        self.by_object.entry(key).or_default().push(id);
        self.notify(&tuple);
        self.by_id.insert(id, Entry { tuple, change_id });
        Ok(id)
    }

    /// §4.E `delete`: returns `false` without throwing if the tuple id
    /// is unknown.
    pub fn delete(&self, id: TupleId) -> bool {
        let Some((_, entry)) = self.by_id.remove(&id) else {
            return false;
        };
        if let Some(mut ids) = self.by_object.get_mut(&entry.tuple.object) {
            ids.retain(|x| *x != id);
        }
        self.change_id.fetch_add(1, Ordering::SeqCst);
        self.notify(&entry.tuple);
        true
    }

    pub fn get(&self, id: TupleId) -> Option<Tuple> {
        self.by_id.get(&id).map(|e| e.tuple.clone())
    }

    /// §4.E `list`: filter by any combination of subject/relation/object.
    pub fn list(&self, subject: Option<&Subject>, relation: Option<&str>, object: Option<(&str, &str)>) -> Vec<Tuple> {
        self.by_id
            .iter()
            .map(|e| e.tuple.clone())
            .filter(|t| {
                relation.map_or(true, |r| t.relation == r)
                    && object.map_or(true, |(ty, id)| t.object.0 == ty && t.object.1 == id)
                    && subject.map_or(true, |s| matches!(&t.subject, SubjectRef::Direct(d) if d == s))
            })
            .collect()
    }

    pub fn list_for_object(&self, object_type: &str, object_id: &str, zone_id: Option<&str>) -> Vec<Tuple> {
        let key = (object_type.to_string(), object_id.to_string());
        let Some(ids) = self.by_object.get(&key) else { return Vec::new() };
        ids.iter()
            .filter_map(|id| self.by_id.get(id).map(|e| e.tuple.clone()))
            .filter(|t| t.zone_id.is_none() || t.zone_id.as_deref() == zone_id)
            .collect()
    }

    pub fn has_direct_tuple(&self, subject: &Subject, relation: &str, object_type: &str, object_id: &str) -> bool {
        self.list_for_object(object_type, object_id, None)
            .iter()
            .any(|t| t.relation == relation && matches!(&t.subject, SubjectRef::Direct(s) if s == subject))
    }

    pub fn current_change_id(&self) -> u64 {
        self.change_id.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_full_tuple() {
        let store = TupleStore::new();
        let alice = Subject::new("user", "alice");
        let t = Tuple::direct(SubjectRef::Direct(alice), "direct_viewer", ("file", "/a"), None);
        let id1 = store.write(t.clone()).unwrap();
        let id2 = store.write(t).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_unknown_returns_false() {
        let store = TupleStore::new();
        assert!(!store.delete(999));
    }

    #[test]
    fn change_id_increases_on_write_and_delete() {
        let store = TupleStore::new();
        let before = store.current_change_id();
        let alice = Subject::new("user", "alice");
        let id = store
            .write(Tuple::direct(SubjectRef::Direct(alice), "direct_viewer", ("file", "/a"), None))
            .unwrap();
        assert!(store.current_change_id() > before);
        let after_write = store.current_change_id();
        store.delete(id);
        assert!(store.current_change_id() > after_write);
    }

    #[test]
    fn invalidation_callback_fires_on_write_and_delete() {
        let store = TupleStore::new();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let calls2 = calls.clone();
        store.on_change(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        let alice = Subject::new("user", "alice");
        let id = store
            .write(Tuple::direct(SubjectRef::Direct(alice), "direct_viewer", ("file", "/a"), None))
            .unwrap();
        store.delete(id);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
