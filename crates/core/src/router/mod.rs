//! Path router (§4.C): mount table, longest-prefix matching, zone and
//! read-only namespace policy.

mod normalize;

pub use normalize::normalize_path;

use std::sync::Arc;
use std::sync::RwLock;

use crate::error::{NexusError, NexusResult};

/// Opaque handle identifying a mounted backend. The router does not
/// depend on the `Backend` trait directly (it lives in `crate::backend`)
/// to keep the mount table free of I/O concerns; callers resolve the
/// handle to a concrete backend themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendHandle(pub String);

impl BackendHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub mount_point: String,
    pub backend: BackendHandle,
    pub priority: i32,
    pub readonly: bool,
}

/// Result of a successful route (§4.C).
#[derive(Debug, Clone)]
pub struct Route {
    pub backend: BackendHandle,
    pub backend_path: String,
    pub mount_point: String,
    pub readonly: bool,
}

/// Copy-on-write mount table (§5 "Shared-resource policy: Mount
/// table"): `add_mount`/`remove_mount` install a new immutable
/// snapshot; `route` reads the current snapshot without taking a lock
/// across the match itself.
pub struct PathRouter {
    mounts: RwLock<Arc<Vec<Mount>>>,
    readonly_namespaces: Vec<String>,
    zone_scoped_namespaces: Vec<String>,
}

impl PathRouter {
    pub fn new(readonly_namespaces: Vec<String>) -> Self {
        Self::with_zone_namespaces(readonly_namespaces, vec!["shared".to_string()])
    }

    /// `zone_scoped_namespaces` names the first-path-segment namespaces
    /// whose second segment is a zone id (§4.C "Paths of the form
    /// `/<ns>/<zone>/...`"). Spec.md is silent on which namespaces carry
    /// this shape; restricting it to a named set (default `["shared"]`,
    /// matching §8 scenario 3's `/shared/B/...` example) avoids treating
    /// every ordinary mount's second segment as a zone id.
    pub fn with_zone_namespaces(readonly_namespaces: Vec<String>, zone_scoped_namespaces: Vec<String>) -> Self {
        Self {
            mounts: RwLock::new(Arc::new(Vec::new())),
            readonly_namespaces,
            zone_scoped_namespaces,
        }
    }

    pub fn add_mount(&self, point: &str, backend: BackendHandle, priority: i32, readonly: bool) -> NexusResult<()> {
        let point = normalize_path(point)?;
        let mut guard = self.mounts.write().unwrap();
        let mut next = (**guard).clone();
        next.push(Mount { mount_point: point, backend, priority, readonly });
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn remove_mount(&self, point: &str) -> NexusResult<()> {
        let point = normalize_path(point)?;
        let mut guard = self.mounts.write().unwrap();
        let next: Vec<Mount> = (**guard).iter().filter(|m| m.mount_point != point).cloned().collect();
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn list_mounts(&self) -> Vec<Mount> {
        (**self.mounts.read().unwrap()).clone()
    }

    /// §4.C `route`. `zone_id` is the caller's context zone; paths of
    /// the form `/<ns>/<zone>/...` are checked against it unless
    /// `is_admin`.
    pub fn route(
        &self,
        path: &str,
        zone_id: Option<&str>,
        is_admin: bool,
        check_write: bool,
    ) -> NexusResult<Route> {
        let path = normalize_path(path)?;

        if let Some(ns) = self.readonly_namespace_prefix(&path) {
            if check_write {
                return Err(NexusError::AccessDenied(format!(
                    "namespace {ns} is read-only"
                )));
            }
        }

        self.check_zone_policy(&path, zone_id, is_admin)?;

        let snapshot = self.mounts.read().unwrap().clone();
        let best = snapshot
            .iter()
            .filter(|m| is_prefix_match(&m.mount_point, &path))
            .max_by_key(|m| (m.mount_point.len(), m.priority))
            .ok_or_else(|| NexusError::NotFound(format!("no mount covers {path}")))?;

        let backend_path = strip_prefix(&best.mount_point, &path);
        Ok(Route {
            backend: best.backend.clone(),
            backend_path,
            mount_point: best.mount_point.clone(),
            readonly: best.readonly,
        })
    }

    fn readonly_namespace_prefix<'a>(&'a self, path: &str) -> Option<&'a str> {
        self.readonly_namespaces
            .iter()
            .find(|ns| is_prefix_match(ns, path))
            .map(|s| s.as_str())
    }

    /// §4.C "Zone policy": `/<ns>/<zone>/...` must match `ctx.zone_id`
    /// unless the caller is admin.
    fn check_zone_policy(&self, path: &str, zone_id: Option<&str>, is_admin: bool) -> NexusResult<()> {
        if is_admin {
            return Ok(());
        }
        let Some(zone_id) = zone_id else { return Ok(()) };
        let mut segments = path.trim_start_matches('/').splitn(3, '/');
        let Some(ns) = segments.next() else { return Ok(()) };
        if !self.zone_scoped_namespaces.iter().any(|z| z == ns) {
            return Ok(());
        }
        let Some(path_zone) = segments.next() else { return Ok(()) };
        if !path_zone.is_empty() && path_zone != zone_id {
            return Err(NexusError::AccessDenied(format!(
                "zone {path_zone} is not visible from zone {zone_id}"
            )));
        }
        Ok(())
    }
}

fn is_prefix_match(mount_point: &str, path: &str) -> bool {
    if mount_point == "/" {
        return true;
    }
    path == mount_point || path.starts_with(&format!("{mount_point}/"))
}

fn strip_prefix(mount_point: &str, path: &str) -> String {
    if mount_point == "/" {
        return path.to_string();
    }
    let rest = path.strip_prefix(mount_point).unwrap_or(path);
    if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> PathRouter {
        let r = PathRouter::new(vec!["/system".to_string(), "/archives".to_string()]);
        r.add_mount("/", BackendHandle::new("local"), 0, false).unwrap();
        r.add_mount("/workspace", BackendHandle::new("workspace-fs"), 10, false).unwrap();
        r.add_mount("/workspace/shared", BackendHandle::new("shared-fs"), 20, false).unwrap();
        r.add_mount("/system", BackendHandle::new("local"), 10, true).unwrap();
        r
    }

    #[test]
    fn longest_prefix_wins() {
        let r = router();
        let route = r.route("/workspace/shared/doc.txt", None, false, false).unwrap();
        assert_eq!(route.mount_point, "/workspace/shared");
        assert_eq!(route.backend_path, "/doc.txt");
    }

    #[test]
    fn longest_prefix_is_deterministic_across_repeated_calls() {
        let r = router();
        let a = r.route("/workspace/proj/a.txt", None, false, false).unwrap();
        let b = r.route("/workspace/proj/a.txt", None, false, false).unwrap();
        assert_eq!(a.mount_point, b.mount_point);
        assert_eq!(a.backend_path, b.backend_path);
        assert_eq!(a.readonly, b.readonly);
    }

    #[test]
    fn readonly_namespace_rejects_writes_even_for_admin() {
        let r = router();
        let err = r.route("/system/config", None, true, true).unwrap_err();
        assert!(matches!(err, NexusError::AccessDenied(_)));
    }

    #[test]
    fn readonly_namespace_allows_reads() {
        let r = router();
        let route = r.route("/system/config", None, false, false).unwrap();
        assert_eq!(route.backend_path, "/config");
    }

    #[test]
    fn zone_isolation_denies_cross_zone_non_admin() {
        let r = router();
        r.add_mount("/shared/zoneB", BackendHandle::new("local"), 5, false).unwrap();
        let err = r.route("/shared/zoneB/file.txt", Some("zoneA"), false, false).unwrap_err();
        assert!(matches!(err, NexusError::AccessDenied(_)));
    }

    #[test]
    fn zone_isolation_allows_admin() {
        let r = router();
        r.add_mount("/shared/zoneB", BackendHandle::new("local"), 5, false).unwrap();
        let route = r.route("/shared/zoneB/file.txt", Some("zoneA"), true, false).unwrap();
        assert_eq!(route.backend_path, "/file.txt");
    }

    #[test]
    fn missing_mount_is_not_found() {
        let r = PathRouter::new(vec![]);
        let err = r.route("/nowhere", None, false, false).unwrap_err();
        assert!(matches!(err, NexusError::NotFound(_)));
    }
}
