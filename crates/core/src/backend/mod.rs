//! Backend interface (§4.D): the uniform contract every storage
//! adapter (local disk, object store, SaaS connector) implements.
//! Only the local-disk adapter is provided here; everything else is an
//! interface consumer out of scope per spec.md §1.

mod local;

pub use local::LocalBackend;

use crate::cas::ContentHash;
use crate::error::{NexusError, NexusResult};

/// Capability flags (§4.D, §9 "dynamic dispatch over backends"):
/// backends that lack a capability return `NotImplemented` rather than
/// faking behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub supports_parallel_mmap_read: bool,
    pub supports_caching: bool,
    pub read_only: bool,
    pub content_addressed: bool,
    pub multipart: bool,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub size: u64,
    pub modified_at: Option<u64>,
    pub backend_version: Option<String>,
    pub content_hash: Option<String>,
}

/// Every backend implements this contract (§4.D). Default methods
/// return `NotImplemented` so adapters only need to override what
/// their `capabilities()` advertise.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Capabilities;

    fn read(&self, path: &str) -> NexusResult<Vec<u8>>;
    fn read_range(&self, path: &str, start: u64, end: u64) -> NexusResult<Vec<u8>> {
        let bytes = self.read(path)?;
        let end = (end as usize).min(bytes.len().saturating_sub(1));
        if start as usize > end {
            return Ok(Vec::new());
        }
        Ok(bytes[start as usize..=end].to_vec())
    }

    fn write(&self, path: &str, bytes: &[u8]) -> NexusResult<String>;

    /// Optimistic-concurrency write (§4.D): fails `Conflict` if the
    /// backend's current version doesn't match `expected_version`.
    fn write_with_version(&self, path: &str, bytes: &[u8], expected_version: Option<&str>) -> NexusResult<String>;

    fn delete(&self, path: &str) -> NexusResult<()>;
    fn exists(&self, path: &str) -> bool;
    fn size(&self, path: &str) -> NexusResult<u64>;
    fn is_directory(&self, path: &str) -> bool;
    fn list_dir(&self, path: &str) -> NexusResult<Vec<String>>;
    fn mkdir(&self, path: &str, parents: bool, exist_ok: bool) -> NexusResult<()>;
    fn rmdir(&self, path: &str, recursive: bool) -> NexusResult<()>;

    fn get_file_info(&self, path: &str) -> NexusResult<FileInfo> {
        Ok(FileInfo {
            size: self.size(path)?,
            modified_at: None,
            backend_version: None,
            content_hash: None,
        })
    }

    fn get_version(&self, _path: &str) -> NexusResult<Option<String>> {
        Err(NexusError::NotImplemented(format!("{} does not track versions", self.name())))
    }

    fn generate_presigned_url(&self, _path: &str, _ttl_seconds: u64) -> NexusResult<String> {
        Err(NexusError::NotImplemented(format!("{} does not support presigned URLs", self.name())))
    }

    // --- Content-addressed extension (§4.D) -------------------------

    fn content_read(&self, _hash: &ContentHash) -> NexusResult<Vec<u8>> {
        Err(NexusError::NotImplemented(format!("{} is not content-addressed", self.name())))
    }
    fn content_write(&self, _bytes: &[u8]) -> NexusResult<ContentHash> {
        Err(NexusError::NotImplemented(format!("{} is not content-addressed", self.name())))
    }
    fn content_release(&self, _hash: &ContentHash) -> NexusResult<()> {
        Err(NexusError::NotImplemented(format!("{} is not content-addressed", self.name())))
    }
    fn content_exists(&self, _hash: &ContentHash) -> bool {
        false
    }
    fn content_size(&self, _hash: &ContentHash) -> NexusResult<u64> {
        Err(NexusError::NotImplemented(format!("{} is not content-addressed", self.name())))
    }
    fn content_ref_count(&self, _hash: &ContentHash) -> NexusResult<u64> {
        Err(NexusError::NotImplemented(format!("{} is not content-addressed", self.name())))
    }

    // --- Multipart (§4.A, §4.D) --------------------------------------

    fn multipart_begin(&self, _path: &str) -> NexusResult<String> {
        Err(NexusError::NotImplemented(format!("{} does not support multipart uploads", self.name())))
    }
    fn multipart_part(&self, _upload_id: &str, _part_number: u32, _bytes: &[u8]) -> NexusResult<()> {
        Err(NexusError::NotImplemented(format!("{} does not support multipart uploads", self.name())))
    }
    fn multipart_commit(&self, _upload_id: &str, _part_numbers: &[u32]) -> NexusResult<String> {
        Err(NexusError::NotImplemented(format!("{} does not support multipart uploads", self.name())))
    }
    fn multipart_abort(&self, _upload_id: &str) -> NexusResult<()> {
        Err(NexusError::NotImplemented(format!("{} does not support multipart uploads", self.name())))
    }
}
