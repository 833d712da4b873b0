//! Permission engine: the composed component wiring the boundary
//! cache, tiger cache, ReBAC check engine, namespace manager, and
//! stale-session detection into the single `check` entry point every
//! façade operation calls. Grounded on `PermissionEnforcer.check` in
//! the original implementation.

use std::sync::Arc;

use crate::agent::{check_stale_session, AgentRegistry};
use crate::boundary::BoundaryCache;
use crate::error::{NexusError, NexusResult};
use crate::namespace::NamespaceManager;
use crate::rebac::{CheckEngine, Permission, Subject};
use crate::tiger::TigerCache;

/// Capability flag gating cross-zone admin access (§15 "Cross-zone
/// admin guard"); the only capability currently modeled.
pub const MANAGE_ZONES: &str = "manage_zones";

#[derive(Debug, Clone)]
pub struct CheckContext {
    pub subject: Subject,
    pub zone_id: Option<String>,
    pub is_admin: bool,
    pub is_system: bool,
    pub admin_capabilities: Vec<String>,
    pub agent_id: Option<String>,
    pub agent_generation: Option<u64>,
}

impl CheckContext {
    pub fn user(subject_id: impl Into<String>) -> Self {
        Self {
            subject: Subject::new("user", subject_id),
            zone_id: None,
            is_admin: false,
            is_system: false,
            admin_capabilities: Vec::new(),
            agent_id: None,
            agent_generation: None,
        }
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.admin_capabilities.iter().any(|c| c == capability || c == "admin:*:*")
    }
}

/// Records every bypass decision, granted or denied (§15 "audit
/// logging"). The default sink discards; callers wire in a real one.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub subject: Subject,
    pub path: String,
    pub permission: &'static str,
    pub bypass_kind: &'static str,
    pub allowed: bool,
    pub reason: &'static str,
}

pub struct NullAuditSink;
impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Admin/system bypass configuration (§15, mirroring the
/// `permission.admin_bypass*` config keys).
#[derive(Debug, Clone)]
pub struct BypassPolicy {
    pub allow_admin_bypass: bool,
    pub allow_system_bypass: bool,
    pub admin_bypass_paths: Vec<String>,
}

impl Default for BypassPolicy {
    fn default() -> Self {
        Self { allow_admin_bypass: false, allow_system_bypass: true, admin_bypass_paths: Vec::new() }
    }
}

/// The composed permission engine (§2 data-flow: boundary cache ->
/// tiger cache -> check engine, with namespace visibility and
/// stale-session checks wrapping the whole thing).
pub struct PermissionEngine {
    check_engine: CheckEngine,
    boundary: Arc<BoundaryCache>,
    tiger: Arc<TigerCache>,
    namespace: Arc<NamespaceManager>,
    agent_registry: Option<Arc<AgentRegistry>>,
    bypass: BypassPolicy,
    audit: Arc<dyn AuditSink>,
}

impl PermissionEngine {
    pub fn new(
        check_engine: CheckEngine,
        boundary: Arc<BoundaryCache>,
        tiger: Arc<TigerCache>,
        namespace: Arc<NamespaceManager>,
        agent_registry: Option<Arc<AgentRegistry>>,
        bypass: BypassPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { check_engine, boundary, tiger, namespace, agent_registry, bypass, audit }
    }

    /// §4 "Permission Engine" `check`, grounded on
    /// `PermissionEnforcer.check`: system bypass -> admin bypass ->
    /// namespace visibility -> stale-session -> ReBAC.
    pub fn check(&self, ctx: &CheckContext, path: &str, permission: Permission) -> NexusResult<()> {
        if ctx.is_system {
            return self.check_system_bypass(ctx, path, permission);
        }

        if ctx.is_admin {
            if let Some(result) = self.try_admin_bypass(ctx, path, permission)? {
                return result;
            }
            // Kill-switch off, path not allowlisted, or missing
            // capability: fall through to ordinary ReBAC.
        }

        // §4.H: unmounted/invisible paths are NotFound, never AccessDenied.
        if !self.namespace.is_visible(&self.check_engine, &ctx.subject, path, ctx.zone_id.as_deref()) {
            return Err(NexusError::NotFound(format!("{path} not found")));
        }

        check_stale_session(
            self.agent_registry.as_deref(),
            &ctx.subject.subject_type,
            ctx.agent_id.as_deref(),
            ctx.agent_generation,
        )?;

        self.check_rebac(ctx, path, permission)
    }

    fn check_system_bypass(&self, ctx: &CheckContext, path: &str, permission: Permission) -> NexusResult<()> {
        if !self.bypass.allow_system_bypass {
            self.audit.record(AuditEvent {
                subject: ctx.subject.clone(),
                path: path.to_string(),
                permission: permission.as_str(),
                bypass_kind: "system",
                allowed: false,
                reason: "kill_switch_disabled",
            });
            return Err(NexusError::AccessDenied("system bypass disabled by configuration".to_string()));
        }

        // System bypass: read anywhere, write/execute only under /system.
        let allowed = permission == Permission::Read || permission == Permission::Traverse || path.starts_with("/system");
        self.audit.record(AuditEvent {
            subject: ctx.subject.clone(),
            path: path.to_string(),
            permission: permission.as_str(),
            bypass_kind: "system",
            allowed,
            reason: if allowed { "granted" } else { "scope_limit" },
        });
        if allowed {
            Ok(())
        } else {
            Err(NexusError::AccessDenied(format!("system bypass not allowed for {path}")))
        }
    }

    /// Returns `Some(result)` when the bypass path conclusively decides
    /// the check (including cross-zone denial); `None` means "fall
    /// through to ordinary ReBAC" (§15).
    fn try_admin_bypass(&self, ctx: &CheckContext, path: &str, permission: Permission) -> NexusResult<Option<NexusResult<()>>> {
        if !self.bypass.allow_admin_bypass {
            self.audit.record(AuditEvent {
                subject: ctx.subject.clone(),
                path: path.to_string(),
                permission: permission.as_str(),
                bypass_kind: "admin",
                allowed: false,
                reason: "kill_switch_disabled",
            });
            return Ok(None);
        }

        if !self.bypass.admin_bypass_paths.is_empty()
            && !self.bypass.admin_bypass_paths.iter().any(|p| path.starts_with(p.as_str()))
        {
            self.audit.record(AuditEvent {
                subject: ctx.subject.clone(),
                path: path.to_string(),
                permission: permission.as_str(),
                bypass_kind: "admin",
                allowed: false,
                reason: "path_not_in_allowlist",
            });
            return Ok(None);
        }

        // §15 "Cross-zone admin guard" (Issue #819): `/zone/<id>/...`
        // outside the admin's own context zone requires MANAGE_ZONES.
        if let Some(path_zone) = extract_zone_segment(path) {
            if let Some(ctx_zone) = &ctx.zone_id {
                if path_zone != ctx_zone.as_str() && !ctx.has_capability(MANAGE_ZONES) {
                    self.audit.record(AuditEvent {
                        subject: ctx.subject.clone(),
                        path: path.to_string(),
                        permission: permission.as_str(),
                        bypass_kind: "admin",
                        allowed: false,
                        reason: "cross_zone_access_denied",
                    });
                    return Ok(Some(Err(NexusError::AccessDenied(format!(
                        "cross-zone access requires {MANAGE_ZONES} capability (context zone {ctx_zone}, path zone {path_zone})"
                    )))));
                }
            }
        }

        self.audit.record(AuditEvent {
            subject: ctx.subject.clone(),
            path: path.to_string(),
            permission: permission.as_str(),
            bypass_kind: "admin",
            allowed: true,
            reason: "granted",
        });
        Ok(Some(Ok(())))
    }

    /// §2 read path: boundary cache -> tiger cache -> check engine,
    /// populating each on a miss.
    fn check_rebac(&self, ctx: &CheckContext, path: &str, permission: Permission) -> NexusResult<()> {
        if let Some(boundary) = self.boundary.get(ctx.zone_id.as_deref(), &ctx.subject, permission, path) {
            if self.boundary.reverify(&self.check_engine, &ctx.subject, permission, &boundary, ctx.zone_id.as_deref()) {
                return Ok(());
            }
        }

        let result = self.check_engine.check_detailed(&ctx.subject, permission, ("file", path), ctx.zone_id.as_deref());
        if result.granted {
            if let Some((_, boundary_path)) = &result.granting_object {
                self.boundary.set(ctx.zone_id.as_deref(), &ctx.subject, permission, path, boundary_path);
            }
            Ok(())
        } else {
            Err(NexusError::AccessDenied(format!("{} denied on {path}", permission.as_str())))
        }
    }

    /// §15 `has_accessible_descendants`: whether the subject can see
    /// anything under `prefix`, used so an otherwise-invisible
    /// directory is still listed when it contains a visible descendant.
    pub fn has_accessible_descendants(&self, key: &crate::tiger::BitmapKey, prefix_int_ids: &[u32]) -> bool {
        let accessible = self.tiger.accessible_resources(key);
        if accessible.is_empty() {
            return false;
        }
        let accessible_set: std::collections::HashSet<u32> = accessible.into_iter().collect();
        prefix_int_ids.iter().any(|id| accessible_set.contains(id))
    }

    pub fn tiger(&self) -> &Arc<TigerCache> {
        &self.tiger
    }

    pub fn boundary(&self) -> &Arc<BoundaryCache> {
        &self.boundary
    }

    pub fn check_engine(&self) -> &CheckEngine {
        &self.check_engine
    }
}

/// Extracts `<zone>` from a path of the form `/zone/<zone>/...`
/// (§15 "Cross-zone admin guard"), or `None` otherwise.
fn extract_zone_segment(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/zone/")?;
    rest.split('/').next().filter(|s| !s.is_empty())
}
