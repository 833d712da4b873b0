//! Content-addressed blob store (§4.A).
//!
//! On-disk layout (§6):
//! ```text
//! cas/<hh>/<HH>/<hash>          immutable content or manifest blob
//! cas/<hh>/<HH>/<hash>.meta     JSON: {ref_count, is_chunk, is_manifest, size, created_at}
//! uploads/<uuid>/part_NNNNNN    multipart staging
//! uploads/<uuid>/_meta.json     staging metadata
//! ```
//!
//! Writes are lock-free across distinct hashes: content is written to a
//! temp file, fsynced, and renamed into place; if the final path
//! already exists the temp file is discarded and the existing `.meta`
//! is updated under a single-writer lock scoped to that hash (§5
//! "CAS meta file").

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cas::bloom::BloomFilter;
use crate::cas::chunker;
use crate::cas::hash::ContentHash;
use crate::error::{NexusError, NexusResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMeta {
    pub ref_count: u64,
    pub is_chunk: bool,
    pub is_manifest: bool,
    pub size: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestChunk {
    hash: String,
    len: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    size: u64,
    chunks: Vec<ManifestChunk>,
}

pub struct CasStore {
    root: PathBuf,
    bloom: BloomFilter,
    /// Single-writer lock per hash, scoped only to meta mutation —
    /// readers never take this lock (§5 "CAS meta file").
    write_locks: DashMap<ContentHash, std::sync::Arc<Mutex<()>>>,
    chunk_threshold: u64,
    chunk_target: u64,
    batch_read_workers: usize,
    next_upload_id: AtomicU64,
}

impl CasStore {
    pub fn open(
        root: impl Into<PathBuf>,
        bloom_capacity: usize,
        bloom_fp_rate: f64,
        chunk_threshold: u64,
        chunk_target: u64,
        batch_read_workers: usize,
    ) -> NexusResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("cas")).map_err(|e| NexusError::io(&root, e))?;
        std::fs::create_dir_all(root.join("uploads")).map_err(|e| NexusError::io(&root, e))?;

        let bloom = BloomFilter::new(bloom_capacity, bloom_fp_rate);
        let store = Self {
            root,
            bloom,
            write_locks: DashMap::new(),
            chunk_threshold,
            chunk_target,
            batch_read_workers: batch_read_workers.max(1),
            next_upload_id: AtomicU64::new(0),
        };
        store.populate_bloom_from_disk()?;
        Ok(store)
    }

    fn populate_bloom_from_disk(&self) -> NexusResult<()> {
        let cas_root = self.root.join("cas");
        let Ok(level1) = std::fs::read_dir(&cas_root) else {
            return Ok(());
        };
        for l1 in level1.flatten() {
            let Ok(level2) = std::fs::read_dir(l1.path()) else { continue };
            for l2 in level2.flatten() {
                let Ok(entries) = std::fs::read_dir(l2.path()) else { continue };
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.ends_with(".meta") {
                        continue;
                    }
                    if let Some(hash) = ContentHash::from_hex(&name) {
                        self.bloom.insert(hash.to_string().as_bytes());
                    }
                }
            }
        }
        Ok(())
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let (d1, d2) = hash.fanout();
        self.root.join("cas").join(d1).join(d2).join(hash.to_string())
    }

    fn meta_path(&self, hash: &ContentHash) -> PathBuf {
        let mut p = self.blob_path(hash).into_os_string();
        p.push(".meta");
        PathBuf::from(p)
    }

    fn lock_for(&self, hash: ContentHash) -> std::sync::Arc<Mutex<()>> {
        self.write_locks.entry(hash).or_insert_with(|| std::sync::Arc::new(Mutex::new(()))).clone()
    }

    fn read_meta(&self, hash: &ContentHash) -> NexusResult<Option<BlobMeta>> {
        let path = self.meta_path(hash);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let meta: BlobMeta = serde_json::from_slice(&bytes)
                    .map_err(|e| NexusError::Integrity(format!("corrupt meta {path:?}: {e}")))?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NexusError::io(path, e)),
        }
    }

    fn write_meta(&self, hash: &ContentHash, meta: &BlobMeta) -> NexusResult<()> {
        let path = self.meta_path(hash);
        let tmp = path.with_extension("meta.tmp");
        let bytes = serde_json::to_vec(meta)
            .map_err(|e| NexusError::Validation(format!("cannot serialize meta: {e}")))?;
        std::fs::write(&tmp, &bytes).map_err(|e| NexusError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| NexusError::io(&path, e))?;
        Ok(())
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }

    /// Materialise a single (non-chunked) blob if absent, else bump its
    /// reference count. Returns the content hash. This is the
    /// lock-free fast path described in §5: temp-write, fsync, rename;
    /// only the ref-count bump on an existing blob takes the per-hash
    /// lock.
    fn store_blob(&self, content: &[u8], is_chunk: bool, is_manifest: bool) -> NexusResult<ContentHash> {
        let hash = ContentHash::of(content);
        let path = self.blob_path(&hash);

        for attempt in 0..3 {
            let lock = self.lock_for(hash);
            let _guard = lock.lock().unwrap();

            if let Some(mut meta) = self.read_meta(&hash)? {
                meta.ref_count += 1;
                self.write_meta(&hash, &meta)?;
                return Ok(hash);
            }

            drop(_guard);

            match self.materialize(&path, content) {
                Ok(()) => {
                    let lock = self.lock_for(hash);
                    let _guard = lock.lock().unwrap();
                    if self.read_meta(&hash)?.is_none() {
                        let meta = BlobMeta {
                            ref_count: 1,
                            is_chunk,
                            is_manifest,
                            size: content.len() as u64,
                            created_at: Self::now(),
                        };
                        self.write_meta(&hash, &meta)?;
                        self.bloom.insert(hash.to_string().as_bytes());
                    }
                    return Ok(hash);
                }
                Err(_) if attempt < 2 => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!()
    }

    /// Write content to a temp file, fsync, rename into place. If the
    /// destination already exists by the time we'd rename, the temp
    /// file is discarded — another writer won the race. Idempotent.
    fn materialize(&self, path: &Path, content: &[u8]) -> NexusResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NexusError::io(parent, e))?;
        }
        let tmp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        {
            let mut f = std::fs::File::create(&tmp).map_err(|e| NexusError::io(&tmp, e))?;
            f.write_all(content).map_err(|e| NexusError::io(&tmp, e))?;
            f.sync_all().map_err(|e| NexusError::io(&tmp, e))?;
        }
        if path.exists() {
            let _ = std::fs::remove_file(&tmp);
            return Ok(());
        }
        match std::fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                if path.exists() {
                    Ok(())
                } else {
                    Err(NexusError::io(path, e))
                }
            }
        }
    }

    /// §4.A `write`.
    pub fn write(&self, content: &[u8]) -> NexusResult<ContentHash> {
        if content.len() as u64 >= self.chunk_threshold {
            return self.write_chunked(content);
        }
        self.store_blob(content, false, false)
    }

    fn write_chunked(&self, content: &[u8]) -> NexusResult<ContentHash> {
        let boundaries = chunker::split(content, self.chunk_target as usize);
        let chunk_results: Vec<NexusResult<ManifestChunk>> = boundaries
            .par_iter()
            .map(|b| {
                let slice = &content[b.start..b.end];
                let hash = self.store_blob(slice, true, false)?;
                Ok(ManifestChunk { hash: hash.to_string(), len: slice.len() as u64 })
            })
            .collect();

        let mut chunks = Vec::with_capacity(chunk_results.len());
        for r in chunk_results {
            chunks.push(r?);
        }

        let manifest = Manifest { size: content.len() as u64, chunks };
        let manifest_bytes = serde_json::to_vec(&manifest)
            .map_err(|e| NexusError::Validation(format!("cannot serialize manifest: {e}")))?;
        self.store_blob(&manifest_bytes, false, true)
    }

    /// §4.A `read`.
    pub fn read(&self, hash: &ContentHash) -> NexusResult<Vec<u8>> {
        let meta = self
            .read_meta(hash)?
            .ok_or_else(|| NexusError::NotFound(format!("blob {hash} not found")))?;

        if meta.is_manifest {
            return self.read_manifest(hash);
        }

        let path = self.blob_path(hash);
        let bytes = self.read_with_retry(&path)?;
        let actual = ContentHash::of(&bytes);
        if actual != *hash {
            return Err(NexusError::Integrity(format!(
                "hash mismatch for {hash}: computed {actual}"
            )));
        }
        Ok(bytes)
    }

    fn read_with_retry(&self, path: &Path) -> NexusResult<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..3 {
            match std::fs::read(path) {
                Ok(bytes) => return Ok(bytes),
                Err(e)
                    if e.kind() == std::io::ErrorKind::NotFound && attempt < 2 =>
                {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(NexusError::NotFound(format!("blob content missing at {path:?}")))
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
        Err(NexusError::io(path, last_err.unwrap()))
    }

    fn load_manifest(&self, hash: &ContentHash) -> NexusResult<Manifest> {
        let path = self.blob_path(hash);
        let bytes = self.read_with_retry(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| NexusError::Integrity(format!("corrupt manifest {hash}: {e}")))
    }

    fn read_manifest(&self, hash: &ContentHash) -> NexusResult<Vec<u8>> {
        let manifest = self.load_manifest(hash)?;
        let hashes: Vec<ContentHash> = manifest
            .chunks
            .iter()
            .map(|c| {
                ContentHash::from_hex(&c.hash)
                    .ok_or_else(|| NexusError::Integrity(format!("malformed chunk hash {}", c.hash)))
            })
            .collect::<NexusResult<_>>()?;

        let chunk_count = hashes.len().max(1);
        let workers = self.batch_read_workers.min(chunk_count);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build();
        let parts: Vec<NexusResult<Vec<u8>>> = match pool {
            Ok(pool) => pool.install(|| hashes.par_iter().map(|h| self.read(h)).collect()),
            Err(_) => hashes.iter().map(|h| self.read(h)).collect(),
        };

        let mut out = Vec::with_capacity(manifest.size as usize);
        for part in parts {
            out.extend_from_slice(&part?);
        }
        Ok(out)
    }

    /// §4.A `read_range`.
    pub fn read_range(&self, hash: &ContentHash, start: u64, end: u64) -> NexusResult<Vec<u8>> {
        let meta = self
            .read_meta(hash)?
            .ok_or_else(|| NexusError::NotFound(format!("blob {hash} not found")))?;

        let end = end.min(meta.size.saturating_sub(1));
        if start > end {
            return Ok(Vec::new());
        }

        if !meta.is_manifest {
            let bytes = self.read(hash)?;
            let s = start as usize;
            let e = (end as usize + 1).min(bytes.len());
            return Ok(bytes[s..e].to_vec());
        }

        let manifest = self.load_manifest(hash)?;
        let mut out = Vec::new();
        let mut offset: u64 = 0;
        for c in &manifest.chunks {
            let chunk_start = offset;
            let chunk_end = offset + c.len;
            offset = chunk_end;
            if chunk_end <= start || chunk_start > end {
                continue;
            }
            let chunk_hash = ContentHash::from_hex(&c.hash)
                .ok_or_else(|| NexusError::Integrity(format!("malformed chunk hash {}", c.hash)))?;
            let chunk_bytes = self.read(&chunk_hash)?;
            let local_start = start.saturating_sub(chunk_start) as usize;
            let local_end = (end.min(chunk_end - 1) - chunk_start + 1) as usize;
            out.extend_from_slice(&chunk_bytes[local_start..local_end]);
        }
        Ok(out)
    }

    /// §4.A `release`.
    pub fn release(&self, hash: &ContentHash) -> NexusResult<()> {
        let lock = self.lock_for(*hash);
        let _guard = lock.lock().unwrap();

        let Some(mut meta) = self.read_meta(hash)? else {
            // Double-release of an already-gone blob is not an error (§4.A).
            return Ok(());
        };

        if meta.ref_count == 0 {
            return Err(NexusError::Integrity(format!(
                "ref_count underflow releasing {hash}: already at 0"
            )));
        }

        meta.ref_count -= 1;
        if meta.ref_count > 0 {
            self.write_meta(hash, &meta)?;
            return Ok(());
        }

        let chunk_hashes = if meta.is_manifest {
            let manifest = self.load_manifest(hash)?;
            manifest
                .chunks
                .iter()
                .map(|c| {
                    ContentHash::from_hex(&c.hash).ok_or_else(|| {
                        NexusError::Integrity(format!("malformed chunk hash {}", c.hash))
                    })
                })
                .collect::<NexusResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let path = self.blob_path(hash);
        let meta_path = self.meta_path(hash);
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&meta_path);
        drop(_guard);

        for chunk_hash in chunk_hashes {
            self.release(&chunk_hash)?;
        }
        Ok(())
    }

    /// §4.A `exists`.
    pub fn exists(&self, hash: &ContentHash) -> bool {
        if !self.bloom.might_exist(hash.to_string().as_bytes()) {
            return false;
        }
        self.blob_path(hash).exists()
    }

    /// §4.A `size`.
    pub fn size(&self, hash: &ContentHash) -> NexusResult<u64> {
        let meta = self
            .read_meta(hash)?
            .ok_or_else(|| NexusError::NotFound(format!("blob {hash} not found")))?;
        Ok(meta.size)
    }

    pub fn ref_count(&self, hash: &ContentHash) -> NexusResult<u64> {
        let meta = self
            .read_meta(hash)?
            .ok_or_else(|| NexusError::NotFound(format!("blob {hash} not found")))?;
        Ok(meta.ref_count)
    }

    // --- Multipart uploads (§4.A) -----------------------------------

    pub fn multipart_begin(&self) -> NexusResult<String> {
        let id = format!(
            "{}-{}",
            Self::now(),
            self.next_upload_id.fetch_add(1, Ordering::Relaxed)
        );
        let dir = self.root.join("uploads").join(&id);
        std::fs::create_dir_all(&dir).map_err(|e| NexusError::io(&dir, e))?;
        Ok(id)
    }

    pub fn multipart_part(&self, upload_id: &str, part_number: u32, bytes: &[u8]) -> NexusResult<()> {
        let dir = self.root.join("uploads").join(upload_id);
        if !dir.exists() {
            return Err(NexusError::NotFound(format!("upload {upload_id} not found")));
        }
        let part_path = dir.join(format!("part_{part_number:06}"));
        std::fs::write(&part_path, bytes).map_err(|e| NexusError::io(&part_path, e))
    }

    pub fn multipart_commit(&self, upload_id: &str, part_numbers: &[u32]) -> NexusResult<ContentHash> {
        let dir = self.root.join("uploads").join(upload_id);
        let mut assembled = Vec::new();
        for n in part_numbers {
            let part_path = dir.join(format!("part_{n:06}"));
            let bytes = std::fs::read(&part_path).map_err(|e| NexusError::io(&part_path, e))?;
            assembled.extend_from_slice(&bytes);
        }
        let hash = self.write(&assembled)?;
        let _ = std::fs::remove_dir_all(&dir);
        Ok(hash)
    }

    pub fn multipart_abort(&self, upload_id: &str) -> NexusResult<()> {
        let dir = self.root.join("uploads").join(upload_id);
        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CasStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CasStore::open(dir.path(), 1000, 0.01, 16 * 1024 * 1024, 64 * 1024, 4).unwrap();
        (dir, store)
    }

    #[test]
    fn roundtrip_small_blob() {
        let (_dir, store) = store();
        let hash = store.write(b"hello world").unwrap();
        assert_eq!(store.read(&hash).unwrap(), b"hello world");
    }

    #[test]
    fn dedup_across_two_writes() {
        let (_dir, store) = store();
        let h1 = store.write(b"hello world").unwrap();
        let h2 = store.write(b"hello world").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.ref_count(&h1).unwrap(), 2);

        store.release(&h1).unwrap();
        assert_eq!(store.read(&h1).unwrap(), b"hello world");

        store.release(&h1).unwrap();
        assert!(!store.exists(&h1));
    }

    #[test]
    fn double_release_is_not_error() {
        let (_dir, store) = store();
        let hash = store.write(b"x").unwrap();
        store.release(&hash).unwrap();
        // Second release of an already-gone blob must not throw (§4.A).
        store.release(&hash).unwrap();
    }

    #[test]
    fn chunked_roundtrip_and_range_read() {
        let (_dir, store) = store();
        // deterministic pseudo-random 20MiB
        let mut data = vec![0u8; 20 * 1024 * 1024];
        let mut state: u64 = 88172645463325252;
        for b in data.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *b = (state & 0xff) as u8;
        }

        let hash = store.write(&data).unwrap();
        let roundtrip = store.read(&hash).unwrap();
        assert_eq!(roundtrip, data);

        let slice = store.read_range(&hash, 5_000_000, 5_000_099).unwrap();
        assert_eq!(slice.len(), 100);
        assert_eq!(slice, data[5_000_000..5_000_100]);
    }

    #[test]
    fn integrity_error_on_hash_mismatch() {
        let (_dir, store) = store();
        let hash = store.write(b"original").unwrap();
        let path = store.blob_path(&hash);
        std::fs::write(&path, b"tampered!").unwrap();
        let err = store.read(&hash).unwrap_err();
        assert!(matches!(err, NexusError::Integrity(_)));
    }

    #[test]
    fn zero_length_write_is_well_known() {
        let (_dir, store) = store();
        let hash = store.write(b"").unwrap();
        assert_eq!(hash, crate::cas::hash::EMPTY_HASH);
        assert_eq!(store.read(&hash).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn multipart_upload_assembles_in_order() {
        let (_dir, store) = store();
        let id = store.multipart_begin().unwrap();
        store.multipart_part(&id, 1, b"hello ").unwrap();
        store.multipart_part(&id, 2, b"world").unwrap();
        let hash = store.multipart_commit(&id, &[1, 2]).unwrap();
        assert_eq!(store.read(&hash).unwrap(), b"hello world");
    }
}
