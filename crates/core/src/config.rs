//! Runtime configuration, loaded from a TOML file or defaults.
//!
//! Mirrors the way the teacher loads `.codescope.toml`: a plain struct
//! with a `load` that falls back to `Default` on a missing file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NexusError, NexusResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    /// Root of the local CAS + virtual-directory tree. Required for the
    /// local backend; other backends ignore it.
    pub data_dir: String,

    pub chunk_threshold_bytes: u64,
    pub chunk_target_bytes: u64,

    pub bloom_capacity: usize,
    pub bloom_fp_rate: f64,

    pub batch_read_workers: usize,

    pub zone_ids: Vec<String>,

    pub metadata_cache_ttl_seconds: u64,
    pub metadata_cache_size: usize,

    pub permission_enforce: bool,
    pub permission_admin_bypass: bool,
    pub permission_admin_bypass_paths: Vec<String>,

    pub tiger_cache_size: usize,
    pub tiger_cache_ttl_seconds: u64,

    pub agent_heartbeat_flush_interval_seconds: u64,

    /// Namespaces that reject every mutating call regardless of admin
    /// status (§4.C "Read-only namespaces").
    pub readonly_namespaces: Vec<String>,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            data_dir: "./nexus-data".to_string(),
            chunk_threshold_bytes: 16 * 1024 * 1024,
            chunk_target_bytes: 1024 * 1024,
            bloom_capacity: 100_000,
            bloom_fp_rate: 0.01,
            batch_read_workers: 8,
            zone_ids: vec!["default".to_string()],
            metadata_cache_ttl_seconds: 300,
            metadata_cache_size: 4096,
            permission_enforce: true,
            permission_admin_bypass: false,
            permission_admin_bypass_paths: Vec::new(),
            tiger_cache_size: 10_000,
            tiger_cache_ttl_seconds: 300,
            agent_heartbeat_flush_interval_seconds: 1,
            readonly_namespaces: vec!["/system".to_string(), "/archives".to_string()],
        }
    }
}

impl NexusConfig {
    /// Load from a TOML file. Missing file -> defaults; malformed TOML
    /// is surfaced as a `Validation` error.
    pub fn load(path: impl AsRef<Path>) -> NexusResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| NexusError::Validation(format!("invalid config at {path:?}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(NexusError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = NexusConfig::default();
        assert_eq!(cfg.chunk_threshold_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.chunk_target_bytes, 1024 * 1024);
        assert_eq!(cfg.bloom_capacity, 100_000);
        assert!((cfg.bloom_fp_rate - 0.01).abs() < f64::EPSILON);
        assert_eq!(cfg.batch_read_workers, 8);
        assert_eq!(cfg.zone_ids, vec!["default".to_string()]);
        assert_eq!(cfg.metadata_cache_ttl_seconds, 300);
        assert_eq!(cfg.metadata_cache_size, 4096);
        assert!(cfg.permission_enforce);
        assert!(!cfg.permission_admin_bypass);
        assert_eq!(cfg.tiger_cache_size, 10_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = NexusConfig::load("/nonexistent/path/does-not-exist.toml").unwrap();
        assert_eq!(cfg.data_dir, NexusConfig::default().data_dir);
    }

    #[test]
    fn loads_overrides_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexus.toml");
        std::fs::write(&path, "data_dir = \"/tmp/x\"\nchunk_target_bytes = 2048\n").unwrap();
        let cfg = NexusConfig::load(&path).unwrap();
        assert_eq!(cfg.data_dir, "/tmp/x");
        assert_eq!(cfg.chunk_target_bytes, 2048);
    }
}
