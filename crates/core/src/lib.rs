//! Nexus core: content-addressed storage, path routing, ReBAC
//! permissions, and precise cache-invalidation substrate for a virtual
//! filesystem unifying heterogeneous storage backends behind a single
//! POSIX-like namespace.

pub mod agent;
pub mod backend;
pub mod boundary;
pub mod cas;
pub mod config;
pub mod error;
pub mod facade;
pub mod metacache;
pub mod namespace;
pub mod permissions;
pub mod readset;
pub mod rebac;
pub mod router;
pub mod tiger;
pub mod zone;

pub use config::NexusConfig;
pub use error::{NexusError, NexusResult};
pub use facade::{DirEntry, GrepMatch, Nexus, OperationContext};

use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentRegistry;
use crate::backend::LocalBackend;
use crate::boundary::BoundaryCache;
use crate::metacache::MetadataCache;
use crate::namespace::NamespaceManager;
use crate::permissions::{BypassPolicy, NullAuditSink, PermissionEngine};
use crate::readset::ReadSetRegistry;
use crate::rebac::{CheckEngine, TupleStore};
use crate::router::PathRouter;
use crate::tiger::TigerCache;

/// Builds a fully-wired `Nexus` instance from config, with a single
/// `LocalBackend` mounted at the root — the shape every shell crate
/// (`nexus-cli`, `nexus-mcp`, `nexus-http`) constructs on startup.
pub struct NexusBuilder {
    config: NexusConfig,
    tuple_store: Arc<TupleStore>,
    agent_registry: Option<Arc<AgentRegistry>>,
    bypass: BypassPolicy,
}

impl NexusBuilder {
    pub fn new(config: NexusConfig) -> Self {
        Self {
            config,
            tuple_store: Arc::new(TupleStore::new()),
            agent_registry: Some(Arc::new(AgentRegistry::new())),
            bypass: BypassPolicy::default(),
        }
    }

    pub fn with_tuple_store(mut self, store: Arc<TupleStore>) -> Self {
        self.tuple_store = store;
        self
    }

    pub fn with_bypass_policy(mut self, bypass: BypassPolicy) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn tuple_store(&self) -> &Arc<TupleStore> {
        &self.tuple_store
    }

    pub fn agent_registry(&self) -> Option<&Arc<AgentRegistry>> {
        self.agent_registry.as_ref()
    }

    pub fn build(self) -> NexusResult<Nexus> {
        let check_engine = CheckEngine::new(self.tuple_store.clone());
        let boundary = Arc::new(BoundaryCache::new());
        boundary.attach(&self.tuple_store);

        let permissions = PermissionEngine::new(
            check_engine,
            boundary,
            Arc::new(TigerCache::new(self.config.tiger_cache_size)),
            Arc::new(NamespaceManager::new()),
            self.agent_registry,
            self.bypass,
            Arc::new(NullAuditSink),
        );

        let metadata_cache = MetadataCache::new(
            self.config.metadata_cache_size,
            Duration::from_secs(self.config.metadata_cache_ttl_seconds),
        );
        let read_set_registry = Arc::new(ReadSetRegistry::new(self.config.metadata_cache_size));
        let router = PathRouter::new(self.config.readonly_namespaces.clone());

        let nexus = Nexus::new(router, permissions, metadata_cache, read_set_registry);

        let local = Arc::new(LocalBackend::new(
            "local",
            &self.config.data_dir,
            self.config.bloom_capacity,
            self.config.bloom_fp_rate,
            self.config.chunk_threshold_bytes,
            self.config.chunk_target_bytes,
            self.config.batch_read_workers,
        )?);
        nexus.mount("/", local, 0, false)?;

        Ok(nexus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_usable_nexus() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NexusConfig::default();
        config.data_dir = dir.path().to_string_lossy().into_owned();
        let nexus = NexusBuilder::new(config).build().unwrap();

        let check = crate::permissions::CheckContext { is_system: true, ..crate::permissions::CheckContext::user("svc") };
        let ctx = OperationContext::new(check);
        nexus.write("/hello.txt", b"hi", &ctx).unwrap();
        let mut ctx = ctx;
        assert_eq!(nexus.read("/hello.txt", &mut ctx).unwrap(), b"hi");
    }
}
