//! Local-disk backend (§4.D), grounded on `LocalBackend` in the
//! original Python implementation: plain-path file storage for regular
//! reads/writes/listing, plus a delegated `CasStore` for the
//! content-addressed extension methods.

use std::fs;
use std::path::PathBuf;

use crate::cas::{CasStore, ContentHash};
use crate::error::{NexusError, NexusResult};

use super::{Backend, Capabilities, FileInfo};

pub struct LocalBackend {
    name: String,
    root: PathBuf,
    cas: CasStore,
}

impl LocalBackend {
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        bloom_capacity: usize,
        bloom_fp_rate: f64,
        chunk_threshold: u64,
        chunk_target: u64,
        batch_read_workers: usize,
    ) -> NexusResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("dirs")).map_err(|e| NexusError::io(&root, e))?;
        let cas = CasStore::open(&root, bloom_capacity, bloom_fp_rate, chunk_threshold, chunk_target, batch_read_workers)?;
        Ok(Self { name: name.into(), root, cas })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join("dirs").join(path.trim_start_matches('/'))
    }

    fn version_of(bytes: &[u8]) -> String {
        ContentHash::of(bytes).to_string()
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_parallel_mmap_read: true,
            supports_caching: true,
            read_only: false,
            content_addressed: true,
            multipart: true,
        }
    }

    fn read(&self, path: &str) -> NexusResult<Vec<u8>> {
        let p = self.resolve(path);
        fs::read(&p).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(format!("{path} not found")),
            _ => NexusError::io(p, e),
        })
    }

    fn write(&self, path: &str, bytes: &[u8]) -> NexusResult<String> {
        let p = self.resolve(path);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| NexusError::io(parent, e))?;
        }
        let tmp = p.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, bytes).map_err(|e| NexusError::io(&tmp, e))?;
        fs::rename(&tmp, &p).map_err(|e| NexusError::io(&p, e))?;
        Ok(Self::version_of(bytes))
    }

    fn write_with_version(&self, path: &str, bytes: &[u8], expected_version: Option<&str>) -> NexusResult<String> {
        if let Some(expected) = expected_version {
            let current = if self.exists(path) {
                Some(Self::version_of(&self.read(path)?))
            } else {
                None
            };
            if current.as_deref() != Some(expected) {
                return Err(NexusError::Conflict {
                    expected: expected.to_string(),
                    actual: current.unwrap_or_else(|| "<missing>".to_string()),
                });
            }
        }
        self.write(path, bytes)
    }

    fn delete(&self, path: &str) -> NexusResult<()> {
        let p = self.resolve(path);
        fs::remove_file(&p).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(format!("{path} not found")),
            _ => NexusError::io(p, e),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn size(&self, path: &str) -> NexusResult<u64> {
        let p = self.resolve(path);
        fs::metadata(&p)
            .map(|m| m.len())
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => NexusError::NotFound(format!("{path} not found")),
                _ => NexusError::io(p, e),
            })
    }

    fn is_directory(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn list_dir(&self, path: &str) -> NexusResult<Vec<String>> {
        let p = self.resolve(path);
        let entries = fs::read_dir(&p).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(format!("{path} not found")),
            _ => NexusError::io(&p, e),
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    fn mkdir(&self, path: &str, parents: bool, exist_ok: bool) -> NexusResult<()> {
        let p = self.resolve(path);
        if p.exists() {
            return if exist_ok {
                Ok(())
            } else {
                Err(NexusError::AlreadyExists(format!("{path} already exists")))
            };
        }
        let result = if parents { fs::create_dir_all(&p) } else { fs::create_dir(&p) };
        result.map_err(|e| NexusError::io(p, e))
    }

    fn rmdir(&self, path: &str, recursive: bool) -> NexusResult<()> {
        let p = self.resolve(path);
        let result = if recursive { fs::remove_dir_all(&p) } else { fs::remove_dir(&p) };
        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(format!("{path} not found")),
            _ => NexusError::io(p, e),
        })
    }

    fn get_file_info(&self, path: &str) -> NexusResult<FileInfo> {
        let p = self.resolve(path);
        let meta = fs::metadata(&p).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(format!("{path} not found")),
            _ => NexusError::io(&p, e),
        })?;
        let modified_at = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        let content_hash = if meta.is_file() {
            Some(Self::version_of(&self.read(path)?))
        } else {
            None
        };
        Ok(FileInfo { size: meta.len(), modified_at, backend_version: content_hash.clone(), content_hash })
    }

    fn get_version(&self, path: &str) -> NexusResult<Option<String>> {
        if !self.exists(path) {
            return Ok(None);
        }
        Ok(Some(Self::version_of(&self.read(path)?)))
    }

    fn content_read(&self, hash: &ContentHash) -> NexusResult<Vec<u8>> {
        self.cas.read(hash)
    }
    fn content_write(&self, bytes: &[u8]) -> NexusResult<ContentHash> {
        self.cas.write(bytes)
    }
    fn content_release(&self, hash: &ContentHash) -> NexusResult<()> {
        self.cas.release(hash)
    }
    fn content_exists(&self, hash: &ContentHash) -> bool {
        self.cas.exists(hash)
    }
    fn content_size(&self, hash: &ContentHash) -> NexusResult<u64> {
        self.cas.size(hash)
    }
    fn content_ref_count(&self, hash: &ContentHash) -> NexusResult<u64> {
        self.cas.ref_count(hash)
    }

    fn multipart_begin(&self, _path: &str) -> NexusResult<String> {
        self.cas.multipart_begin()
    }
    fn multipart_part(&self, upload_id: &str, part_number: u32, bytes: &[u8]) -> NexusResult<()> {
        self.cas.multipart_part(upload_id, part_number, bytes)
    }
    fn multipart_commit(&self, upload_id: &str, part_numbers: &[u32]) -> NexusResult<String> {
        Ok(self.cas.multipart_commit(upload_id, part_numbers)?.to_string())
    }
    fn multipart_abort(&self, upload_id: &str) -> NexusResult<()> {
        self.cas.multipart_abort(upload_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path(), 1000, 0.01, 16 * 1024 * 1024, 64 * 1024, 4).unwrap();
        (dir, backend)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (_dir, b) = backend();
        b.write("/a/b.txt", b"hello").unwrap();
        assert_eq!(b.read("/a/b.txt").unwrap(), b"hello");
    }

    #[test]
    fn write_with_version_conflict() {
        let (_dir, b) = backend();
        b.write("/f.txt", b"v1").unwrap();
        let v1 = b.get_version("/f.txt").unwrap().unwrap();
        b.write("/f.txt", b"v2").unwrap();
        let err = b.write_with_version("/f.txt", b"v3", Some(&v1)).unwrap_err();
        assert!(matches!(err, NexusError::Conflict { .. }));
    }

    #[test]
    fn mkdir_and_list_dir() {
        let (_dir, b) = backend();
        b.mkdir("/proj", true, false).unwrap();
        b.write("/proj/a.txt", b"1").unwrap();
        b.write("/proj/b.txt", b"2").unwrap();
        let names = b.list_dir("/proj").unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn content_addressed_delegates_to_cas() {
        let (_dir, b) = backend();
        let hash = b.content_write(b"shared content").unwrap();
        assert!(b.content_exists(&hash));
        assert_eq!(b.content_read(&hash).unwrap(), b"shared content");
    }
}
