//! Filesystem façade (§4.L): the glue every client call goes through —
//! normalize, check visibility, check staleness, route, check
//! permission, perform I/O, track reads, invalidate caches.

mod glob;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

use crate::backend::{Backend, FileInfo};
use crate::error::{NexusError, NexusResult};
use crate::metacache::MetadataCache;
use crate::permissions::{CheckContext, PermissionEngine};
use crate::readset::{AccessType, ReadSet, ReadSetRegistry, ResourceType};
use crate::rebac::Permission;
use crate::router::{normalize_path, BackendHandle, PathRouter};
use crate::zone::ZoneRevisionCounter;

/// Per-call context: subject/zone/admin identity plus optional read-set
/// tracking (§3 "Read set", §4.L step 7).
pub struct OperationContext {
    pub check: CheckContext,
    pub track_reads: bool,
    pub read_set: Option<ReadSet>,
}

impl OperationContext {
    pub fn new(check: CheckContext) -> Self {
        Self { check, track_reads: false, read_set: None }
    }

    pub fn with_read_tracking(mut self, query_id: impl Into<String>) -> Self {
        self.track_reads = true;
        self.read_set = Some(ReadSet::new(query_id, self.check.zone_id.clone()));
        self
    }

    fn record(&mut self, resource_type: ResourceType, resource_id: &str, revision: u64, access_type: AccessType) {
        if !self.track_reads {
            return;
        }
        if let Some(rs) = &mut self.read_set {
            rs.record(resource_type, resource_id, revision, access_type, crate::tiger::now_secs());
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

/// Top-level entry point: wires together the router, backends,
/// permission engine, metadata cache, read-set registry and zone
/// revision counter (§2 data-flow diagram, §4.L).
pub struct Nexus {
    router: PathRouter,
    backends: DashMap<String, Arc<dyn Backend>>,
    permissions: PermissionEngine,
    metadata_cache: MetadataCache<FileInfo>,
    read_set_registry: Arc<ReadSetRegistry>,
    zone_revisions: ZoneRevisionCounter,
}

impl Nexus {
    pub fn new(
        router: PathRouter,
        permissions: PermissionEngine,
        metadata_cache: MetadataCache<FileInfo>,
        read_set_registry: Arc<ReadSetRegistry>,
    ) -> Self {
        Self {
            router,
            backends: DashMap::new(),
            permissions,
            metadata_cache,
            read_set_registry,
            zone_revisions: ZoneRevisionCounter::new(),
        }
    }

    pub fn mount(&self, point: &str, backend: Arc<dyn Backend>, priority: i32, readonly: bool) -> NexusResult<()> {
        let handle = BackendHandle::new(backend.name().to_string());
        self.backends.insert(handle.0.clone(), backend);
        self.router.add_mount(point, handle, priority, readonly)
    }

    fn backend_for(&self, handle: &BackendHandle) -> NexusResult<Arc<dyn Backend>> {
        self.backends
            .get(&handle.0)
            .map(|b| b.clone())
            .ok_or_else(|| NexusError::Backend(format!("no backend registered for {}", handle.0)))
    }

    /// Steps 1-5 shared by every operation: normalize, route, and check
    /// permission. Returns the resolved backend and its path.
    fn prepare(&self, ctx: &OperationContext, path: &str, permission: Permission, check_write: bool) -> NexusResult<(Arc<dyn Backend>, String)> {
        let path = normalize_path(path)?;
        self.permissions.check(&ctx.check, &path, permission)?;
        let route = self.router.route(&path, ctx.check.zone_id.as_deref(), ctx.check.is_admin, check_write)?;
        let backend = self.backend_for(&route.backend)?;
        Ok((backend, route.backend_path))
    }

    // --- Reads -----------------------------------------------------

    pub fn read(&self, path: &str, ctx: &mut OperationContext) -> NexusResult<Vec<u8>> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Read, false)?;
        let bytes = backend.read(&backend_path)?;
        let revision = self.zone_revisions.current(ctx.check.zone_id.as_deref());
        ctx.record(ResourceType::File, &path, revision, AccessType::Content);
        Ok(bytes)
    }

    pub fn read_range(&self, path: &str, start: u64, end: u64, ctx: &mut OperationContext) -> NexusResult<Vec<u8>> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Read, false)?;
        let bytes = backend.read_range(&backend_path, start, end)?;
        let revision = self.zone_revisions.current(ctx.check.zone_id.as_deref());
        ctx.record(ResourceType::File, &path, revision, AccessType::Content);
        Ok(bytes)
    }

    pub fn stat(&self, path: &str, ctx: &mut OperationContext) -> NexusResult<FileInfo> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Read, false)?;
        let info = backend.get_file_info(&backend_path)?;
        let revision = self.zone_revisions.current(ctx.check.zone_id.as_deref());
        self.metadata_cache.put(&path, info.clone(), ctx.read_set.clone(), Some(revision));
        ctx.record(ResourceType::Metadata, &path, revision, AccessType::Metadata);
        Ok(info)
    }

    pub fn exists(&self, path: &str, ctx: &mut OperationContext) -> NexusResult<bool> {
        let path = normalize_path(path)?;
        match self.prepare(ctx, &path, Permission::Traverse, false) {
            Ok((backend, backend_path)) => {
                let revision = self.zone_revisions.current(ctx.check.zone_id.as_deref());
                ctx.record(ResourceType::File, &path, revision, AccessType::Exists);
                Ok(backend.exists(&backend_path))
            }
            Err(NexusError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn list(&self, path: &str, recursive: bool, ctx: &mut OperationContext) -> NexusResult<Vec<DirEntry>> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Read, false)?;
        let revision = self.zone_revisions.current(ctx.check.zone_id.as_deref());
        ctx.record(ResourceType::Directory, &path, revision, AccessType::List);
        self.list_inner(&backend, &backend_path, &path, recursive, ctx)
    }

    fn list_inner(&self, backend: &Arc<dyn Backend>, backend_path: &str, virtual_path: &str, recursive: bool, ctx: &mut OperationContext) -> NexusResult<Vec<DirEntry>> {
        let names = backend.list_dir(backend_path)?;
        let mut out = Vec::new();
        for name in names {
            let child_backend_path = join(backend_path, &name);
            let child_virtual = join(virtual_path, &name);
            let is_dir = backend.is_directory(&child_backend_path);
            out.push(DirEntry { name: name.clone(), is_directory: is_dir });
            if recursive && is_dir {
                let revision = self.zone_revisions.current(ctx.check.zone_id.as_deref());
                ctx.record(ResourceType::Directory, &child_virtual, revision, AccessType::List);
                let nested = self.list_inner(backend, &child_backend_path, &child_virtual, recursive, ctx)?;
                for entry in nested {
                    out.push(DirEntry { name: format!("{name}/{}", entry.name), is_directory: entry.is_directory });
                }
            }
        }
        Ok(out)
    }

    /// `list_paginated`: a stable offset/limit window over `list`'s
    /// (sorted) output, cursor is the next offset as a string.
    pub fn list_paginated(&self, path: &str, limit: usize, cursor: Option<&str>, ctx: &mut OperationContext) -> NexusResult<(Vec<DirEntry>, Option<String>)> {
        let mut entries = self.list(path, false, ctx)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let page: Vec<DirEntry> = entries.iter().skip(offset).take(limit).cloned().collect();
        let next_cursor = if offset + page.len() < entries.len() { Some((offset + page.len()).to_string()) } else { None };
        Ok((page, next_cursor))
    }

    // --- Writes ------------------------------------------------------

    pub fn write(&self, path: &str, bytes: &[u8], ctx: &OperationContext) -> NexusResult<String> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Write, true)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        let version = backend.write(&backend_path, bytes)?;
        self.metadata_cache.invalidate_for_write(&path, new_rev, ctx.check.zone_id.as_deref());
        Ok(version)
    }

    /// §4.L `edit`: optimistic-concurrency replace with an `if_match`
    /// expected version. No fuzzy-matching engine is implemented here;
    /// callers supply the fully materialised new content.
    pub fn edit(&self, path: &str, new_bytes: &[u8], if_match: Option<&str>, ctx: &OperationContext) -> NexusResult<String> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Write, true)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        let version = backend.write_with_version(&backend_path, new_bytes, if_match)?;
        self.metadata_cache.invalidate_for_write(&path, new_rev, ctx.check.zone_id.as_deref());
        Ok(version)
    }

    pub fn delete(&self, path: &str, ctx: &OperationContext) -> NexusResult<()> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Write, true)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        backend.delete(&backend_path)?;
        self.metadata_cache.invalidate_for_write(&path, new_rev, ctx.check.zone_id.as_deref());
        Ok(())
    }

    pub fn mkdir(&self, path: &str, parents: bool, exist_ok: bool, ctx: &OperationContext) -> NexusResult<()> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Write, true)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        backend.mkdir(&backend_path, parents, exist_ok)?;
        self.metadata_cache.invalidate_for_write(&path, new_rev, ctx.check.zone_id.as_deref());
        Ok(())
    }

    pub fn rmdir(&self, path: &str, recursive: bool, ctx: &OperationContext) -> NexusResult<()> {
        let path = normalize_path(path)?;
        let (backend, backend_path) = self.prepare(ctx, &path, Permission::Write, true)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        backend.rmdir(&backend_path, recursive)?;
        self.metadata_cache.invalidate_for_write(&path, new_rev, ctx.check.zone_id.as_deref());
        Ok(())
    }

    /// §4.L `rename`. Same-backend moves delegate to a single
    /// write+delete pair on that backend (cheapest atomic
    /// approximation available through the uniform `Backend`
    /// contract); cross-backend moves copy then delete (§16 decision:
    /// no cross-backend atomicity is claimed).
    pub fn rename(&self, old_path: &str, new_path: &str, ctx: &OperationContext) -> NexusResult<()> {
        let old_path = normalize_path(old_path)?;
        let new_path = normalize_path(new_path)?;
        let (old_backend, old_backend_path) = self.prepare(ctx, &old_path, Permission::Write, true)?;
        let (new_backend, new_backend_path) = self.prepare(ctx, &new_path, Permission::Write, true)?;

        let bytes = old_backend.read(&old_backend_path)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        new_backend.write(&new_backend_path, &bytes)?;
        old_backend.delete(&old_backend_path)?;

        self.metadata_cache.invalidate_for_write(&old_path, new_rev, ctx.check.zone_id.as_deref());
        self.metadata_cache.invalidate_for_write(&new_path, new_rev, ctx.check.zone_id.as_deref());
        Ok(())
    }

    pub fn copy(&self, src_path: &str, dst_path: &str, ctx: &OperationContext) -> NexusResult<()> {
        let src_path = normalize_path(src_path)?;
        let dst_path = normalize_path(dst_path)?;
        let (src_backend, src_backend_path) = self.prepare(ctx, &src_path, Permission::Read, false)?;
        let (dst_backend, dst_backend_path) = self.prepare(ctx, &dst_path, Permission::Write, true)?;

        let bytes = src_backend.read(&src_backend_path)?;
        let new_rev = self.zone_revisions.bump(ctx.check.zone_id.as_deref());
        dst_backend.write(&dst_backend_path, &bytes)?;

        self.metadata_cache.invalidate_for_write(&dst_path, new_rev, ctx.check.zone_id.as_deref());
        Ok(())
    }

    // --- Search --------------------------------------------------------

    pub fn glob(&self, pattern: &str, base: &str, ctx: &mut OperationContext) -> NexusResult<Vec<String>> {
        let matcher = glob::glob_to_regex(pattern);
        let entries = self.list(base, true, ctx)?;
        let base = normalize_path(base)?;
        Ok(entries
            .into_iter()
            .filter(|e| matcher.is_match(&e.name))
            .map(|e| join(&base, &e.name))
            .collect())
    }

    pub fn grep(&self, pattern: &str, base: &str, ignore_case: bool, file_pattern: Option<&str>, max_results: usize, ctx: &mut OperationContext) -> NexusResult<Vec<GrepMatch>> {
        let re = if ignore_case {
            Regex::new(&format!("(?i){pattern}")).map_err(|e| NexusError::Validation(e.to_string()))?
        } else {
            Regex::new(pattern).map_err(|e| NexusError::Validation(e.to_string()))?
        };
        let file_matcher = file_pattern.map(glob::glob_to_regex);

        let candidates = if let Some(fp) = file_pattern {
            self.glob(fp, base, ctx)?
        } else {
            let entries = self.list(base, true, ctx)?;
            let base_norm = normalize_path(base)?;
            entries.into_iter().filter(|e| !e.is_directory).map(|e| join(&base_norm, &e.name)).collect()
        };

        let mut matches = Vec::new();
        for path in candidates {
            if matches.len() >= max_results {
                break;
            }
            if let Some(fm) = &file_matcher {
                let name = path.rsplit('/').next().unwrap_or(&path);
                if !fm.is_match(name) {
                    continue;
                }
            }
            let Ok(bytes) = self.read(&path, ctx) else { continue };
            let Ok(text) = String::from_utf8(bytes) else { continue };
            for (i, line) in text.lines().enumerate() {
                if matches.len() >= max_results {
                    break;
                }
                if re.is_match(line) {
                    matches.push(GrepMatch { path: path.clone(), line_number: i + 1, line: line.to_string() });
                }
            }
        }
        Ok(matches)
    }

    /// §4.L `batch_get_content_hashes`: best-effort per path, missing
    /// entries map to `None` rather than failing the whole batch.
    pub fn batch_get_content_hashes(&self, paths: &[String], ctx: &mut OperationContext) -> NexusResult<HashMap<String, Option<String>>> {
        let mut out = HashMap::new();
        for path in paths {
            let hash = match self.stat(path, ctx) {
                Ok(info) => info.content_hash,
                Err(NexusError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            out.insert(path.clone(), hash);
        }
        Ok(out)
    }

    pub fn read_set_registry(&self) -> &Arc<ReadSetRegistry> {
        &self.read_set_registry
    }

    pub fn router(&self) -> &PathRouter {
        &self.router
    }

    pub fn permissions(&self) -> &PermissionEngine {
        &self.permissions
    }
}

fn join(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{name}")
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::boundary::BoundaryCache;
    use crate::config::NexusConfig;
    use crate::namespace::NamespaceManager;
    use crate::permissions::{BypassPolicy, NullAuditSink};
    use crate::rebac::{CheckEngine, Subject, SubjectRef, Tuple, TupleStore};
    use crate::tiger::TigerCache;
    use std::time::Duration;

    fn nexus_with_grant(subject: &Subject, grant_path: &str) -> (tempfile::TempDir, Arc<TupleStore>, Nexus) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TupleStore::new());
        store
            .write(Tuple::direct(SubjectRef::Direct(subject.clone()), "direct_owner", ("file", grant_path), None))
            .unwrap();
        let check_engine = CheckEngine::new(store.clone());
        let boundary = Arc::new(BoundaryCache::new());
        boundary.attach(&store);
        let engine = crate::permissions::PermissionEngine::new(
            check_engine,
            boundary,
            Arc::new(TigerCache::new(1000)),
            Arc::new(NamespaceManager::new()),
            None,
            BypassPolicy::default(),
            Arc::new(NullAuditSink),
        );
        let cfg = NexusConfig::default();
        let metadata_cache = MetadataCache::new(cfg.metadata_cache_size, Duration::from_secs(cfg.metadata_cache_ttl_seconds));
        let read_set_registry = Arc::new(ReadSetRegistry::new(cfg.metadata_cache_size));
        let router = PathRouter::new(cfg.readonly_namespaces.clone());
        let nexus = Nexus::new(router, engine, metadata_cache, read_set_registry);
        let backend = Arc::new(LocalBackend::new("local", dir.path(), 1000, 0.01, 16 * 1024 * 1024, 64 * 1024, 4).unwrap());
        nexus.mount("/", backend, 0, false).unwrap();
        (dir, store, nexus)
    }

    #[test]
    fn write_then_read_roundtrips_through_facade() {
        let alice = Subject::new("user", "alice");
        let (_dir, _store, nexus) = nexus_with_grant(&alice, "/");
        let ctx = OperationContext::new(CheckContext::user("alice"));
        nexus.write("/a.txt", b"hello", &ctx).unwrap();
        let mut ctx = ctx;
        assert_eq!(nexus.read("/a.txt", &mut ctx).unwrap(), b"hello");
    }

    #[test]
    fn write_without_grant_is_denied() {
        let alice = Subject::new("user", "alice");
        let (_dir, _store, nexus) = nexus_with_grant(&alice, "/workspace");
        let ctx = OperationContext::new(CheckContext::user("alice"));
        let err = nexus.write("/outside/a.txt", b"x", &ctx).unwrap_err();
        assert!(matches!(err, NexusError::NotFound(_)));
    }

    #[test]
    fn write_invalidates_metadata_cache_for_subsequent_stat() {
        let alice = Subject::new("user", "alice");
        let (_dir, _store, nexus) = nexus_with_grant(&alice, "/");
        let mut ctx = OperationContext::new(CheckContext::user("alice")).with_read_tracking("q1");
        nexus.write("/a.txt", b"v1", &ctx).unwrap();
        let info1 = nexus.stat("/a.txt", &mut ctx).unwrap();
        assert_eq!(info1.size, 2);
        nexus.write("/a.txt", b"v2-longer", &ctx).unwrap();
        let info2 = nexus.stat("/a.txt", &mut ctx).unwrap();
        assert_eq!(info2.size, 9);
    }

    #[test]
    fn list_and_glob_find_written_files() {
        let alice = Subject::new("user", "alice");
        let (_dir, _store, nexus) = nexus_with_grant(&alice, "/");
        let ctx = OperationContext::new(CheckContext::user("alice"));
        nexus.mkdir("/proj", true, false, &ctx).unwrap();
        nexus.write("/proj/a.rs", b"fn main() {}", &ctx).unwrap();
        nexus.write("/proj/b.txt", b"notes", &ctx).unwrap();
        let mut ctx = ctx;
        let matches = nexus.glob("*.rs", "/proj", &mut ctx).unwrap();
        assert_eq!(matches, vec!["/proj/a.rs".to_string()]);
    }

    #[test]
    fn grep_finds_matching_lines() {
        let alice = Subject::new("user", "alice");
        let (_dir, _store, nexus) = nexus_with_grant(&alice, "/");
        let ctx = OperationContext::new(CheckContext::user("alice"));
        nexus.write("/notes.txt", b"first line\nTODO: fix this\nlast line", &ctx).unwrap();
        let mut ctx = ctx;
        let matches = nexus.grep("TODO", "/", false, None, 10, &mut ctx).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_number, 2);
    }

    #[test]
    fn rename_moves_content_and_removes_source() {
        let alice = Subject::new("user", "alice");
        let (_dir, _store, nexus) = nexus_with_grant(&alice, "/");
        let ctx = OperationContext::new(CheckContext::user("alice"));
        nexus.write("/a.txt", b"hi", &ctx).unwrap();
        nexus.rename("/a.txt", "/b.txt", &ctx).unwrap();
        let mut ctx = ctx;
        assert_eq!(nexus.read("/b.txt", &mut ctx).unwrap(), b"hi");
        assert!(!nexus.exists("/a.txt", &mut ctx).unwrap());
    }
}
