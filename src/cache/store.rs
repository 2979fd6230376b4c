//! Content-addressed artifact store

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use super::error::CacheError;
use super::key::CacheKey;
use super::metadata::{CacheEntry, CacheMetadata};

/// Environment variable overriding the cache base directory
pub const CACHE_DIR_ENV: &str = "NATIVECALL_CACHE_DIR";

const METADATA_DIR: &str = "metadata";
const IR_EXTENSION: &str = "ir";

/// Stores compiled artifacts under their cache key
///
/// ```text
/// <root>/<key><DLL_SUFFIX>        artifact
/// <root>/<key>.ir                 optional IR dump
/// <root>/metadata/<key>.json      metadata; present only for complete entries
/// <root>/<namespace>/...          nested caches of the same shape
/// ```
#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Cache rooted at `root`; the directory is created on first store
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache at [`CacheManager::default_root`]
    pub fn with_default_root() -> Self {
        Self::new(Self::default_root())
    }

    /// `$NATIVECALL_CACHE_DIR` (or `~/.cache/nativecall`), scoped by crate
    /// version so incompatible releases never share artifacts.
    pub fn default_root() -> PathBuf {
        let base = std::env::var_os(CACHE_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache").join("nativecall"))
            })
            .or_else(|| std::env::var_os("LOCALAPPDATA").map(|dir| PathBuf::from(dir).join("nativecall")))
            .unwrap_or_else(|| std::env::temp_dir().join("nativecall"));
        base.join(format!("v{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Nested cache under `<root>/<name>`
    pub fn namespace(&self, name: &str) -> CacheManager {
        CacheManager::new(self.root.join(name))
    }

    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}{}", key, std::env::consts::DLL_SUFFIX))
    }

    pub fn metadata_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(METADATA_DIR).join(format!("{}.json", key))
    }

    pub fn ir_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key, IR_EXTENSION))
    }

    // =========================================================================
    // Lookup / store
    // =========================================================================

    /// Artifact path for a complete, readable entry
    ///
    /// A missing metadata file, or an artifact that cannot be read, is a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let artifact = self.artifact_path(key);

        if !self.metadata_path(key).is_file() {
            if artifact.exists() {
                debug!("cache entry {} has no metadata, treating as miss", key.short());
            } else {
                debug!("cache miss {}", key.short());
            }
            return None;
        }

        if is_readable(&artifact) {
            debug!("cache hit {}", key.short());
            Some(artifact)
        } else {
            debug!("cache entry {} is torn (artifact unreadable)", key.short());
            None
        }
    }

    /// Copy `artifact` into the cache and record its metadata
    ///
    /// The artifact is renamed into place before the metadata is written,
    /// so a crash leaves at worst an entry that `lookup` reports as a miss.
    pub fn store(
        &self,
        key: &CacheKey,
        artifact: &Path,
        metadata: &CacheMetadata,
    ) -> Result<CacheEntry, CacheError> {
        let metadata_dir = self.root.join(METADATA_DIR);
        fs::create_dir_all(&metadata_dir).map_err(|e| CacheError::io(&metadata_dir, e))?;

        let artifact_path = self.artifact_path(key);
        copy_atomic(artifact, &artifact_path)?;

        let json = serde_json::to_vec_pretty(metadata).map_err(|source| {
            CacheError::Serialization {
                key: key.to_string(),
                source,
            }
        })?;
        write_atomic(&self.metadata_path(key), &json)?;

        info!(
            "cached {} ({} function(s)) at {}",
            key.short(),
            metadata.functions.len(),
            artifact_path.display()
        );

        Ok(CacheEntry {
            key: key.clone(),
            artifact_path,
            metadata: metadata.clone(),
        })
    }

    /// Store an IR dump as `<key>.ir`
    pub fn store_ir(&self, key: &CacheKey, ir_file: &Path) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;
        let dest = self.ir_path(key);
        copy_atomic(ir_file, &dest)?;
        Ok(dest)
    }

    /// Full metadata for a stored entry
    pub fn load_metadata(&self, key: &CacheKey) -> Option<CacheMetadata> {
        let path = self.metadata_path(key);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!("ignoring unreadable metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Remove an entry; `true` when anything was deleted
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        // metadata first: once it is gone the entry is a miss
        let mut removed = false;
        for path in [
            self.metadata_path(key),
            self.artifact_path(key),
            self.ir_path(key),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Complete entries in this cache and its namespaces
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries = Vec::new();
        self.collect_entries(&mut entries);
        entries
    }

    fn collect_entries(&self, out: &mut Vec<CacheEntry>) {
        let mut keys: Vec<CacheKey> = read_dir_paths(&self.root.join(METADATA_DIR))
            .into_iter()
            .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
            .filter_map(|p| CacheKey::parse(p.file_stem()?.to_str()?))
            .collect();
        keys.sort();

        for key in keys {
            if let Some(artifact_path) = self.lookup(&key) {
                if let Some(metadata) = self.load_metadata(&key) {
                    out.push(CacheEntry {
                        key,
                        artifact_path,
                        metadata,
                    });
                }
            }
        }

        for namespace in self.namespaces() {
            namespace.collect_entries(out);
        }
    }

    // =========================================================================
    // Pruning
    // =========================================================================

    /// Remove entries whose artifact is older than `max_age`
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(UNIX_EPOCH);
        self.prune_before(cutoff)
    }

    /// Remove entries whose artifact was modified strictly before `cutoff`
    pub fn prune_before(&self, cutoff: SystemTime) -> usize {
        let mut removed = 0;

        for artifact in self.artifacts() {
            if artifact.modified < cutoff && self.invalidate(&artifact.key) {
                removed += 1;
            }
        }
        self.remove_orphan_metadata();

        for namespace in self.namespaces() {
            removed += namespace.prune_before(cutoff);
        }

        if removed > 0 {
            info!("pruned {} cache entr(ies) from {}", removed, self.root.display());
        }
        removed
    }

    /// Remove oldest entries (across namespaces) until the cache fits in
    /// `max_bytes`
    pub fn prune_to_size(&self, max_bytes: u64) -> usize {
        let mut size = self.size_bytes();
        if size <= max_bytes {
            return 0;
        }

        let mut candidates = Vec::new();
        self.collect_artifacts(&mut candidates);
        candidates.sort_by_key(|(_, artifact)| artifact.modified);

        let mut removed = 0;
        for (cache, artifact) in candidates {
            if size <= max_bytes {
                break;
            }
            let entry_size = cache.entry_size(&artifact.key);
            if cache.invalidate(&artifact.key) {
                size = size.saturating_sub(entry_size);
                removed += 1;
            }
        }

        info!("pruned {} cache entr(ies) to fit {} bytes", removed, max_bytes);
        removed
    }

    fn collect_artifacts(&self, out: &mut Vec<(CacheManager, StoredArtifact)>) {
        for artifact in self.artifacts() {
            out.push((self.clone(), artifact));
        }
        for namespace in self.namespaces() {
            namespace.collect_artifacts(out);
        }
    }

    fn entry_size(&self, key: &CacheKey) -> u64 {
        [
            self.artifact_path(key),
            self.metadata_path(key),
            self.ir_path(key),
        ]
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
    }

    fn artifacts(&self) -> Vec<StoredArtifact> {
        let suffix = std::env::consts::DLL_SUFFIX;
        read_dir_paths(&self.root)
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?;
                let key = CacheKey::parse(name.strip_suffix(suffix)?)?;
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some(StoredArtifact { key, modified })
            })
            .collect()
    }

    fn remove_orphan_metadata(&self) {
        for path in read_dir_paths(&self.root.join(METADATA_DIR)) {
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::parse)
            else {
                continue;
            };
            if !self.artifact_path(&key).exists() {
                debug!("removing orphan metadata {}", path.display());
                if let Err(e) = fs::remove_file(&path) {
                    warn!("failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }

    fn namespaces(&self) -> Vec<CacheManager> {
        read_dir_paths(&self.root)
            .into_iter()
            .filter(|p| p.is_dir() && p.file_name().map_or(false, |n| n != METADATA_DIR))
            .map(CacheManager::new)
            .collect()
    }

    // =========================================================================
    // Size / clear
    // =========================================================================

    /// Total bytes on disk under the root, namespaces included
    pub fn size_bytes(&self) -> u64 {
        dir_size(&self.root)
    }

    /// Delete everything under the root
    ///
    /// Falls back to file-by-file deletion when the tree cannot be removed
    /// at once; files that still cannot be deleted are left in place.
    pub fn clear(&self) {
        if !self.root.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            warn!(
                "failed to remove {}: {}; deleting files individually",
                self.root.display(),
                e
            );
            remove_tree_best_effort(&self.root);
        }
    }
}

struct StoredArtifact {
    key: CacheKey,
    modified: SystemTime,
}

fn is_readable(path: &Path) -> bool {
    let mut byte = [0u8; 1];
    File::open(path)
        .and_then(|mut file| file.read(&mut byte))
        .map_or(false, |n| n == 1)
}

fn copy_atomic(src: &Path, dest: &Path) -> Result<(), CacheError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut input = File::open(src).map_err(|e| CacheError::io(src, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(|e| CacheError::io(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| CacheError::io(dest, e.error))?;
    Ok(())
}

fn write_atomic(dest: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| CacheError::io(tmp.path(), e))?;
    tmp.persist(dest).map_err(|e| CacheError::io(dest, e.error))?;
    Ok(())
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn dir_size(dir: &Path) -> u64 {
    read_dir_paths(dir)
        .into_iter()
        .map(|path| match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => dir_size(&path),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

fn remove_tree_best_effort(dir: &Path) {
    for path in read_dir_paths(dir) {
        if path.is_dir() {
            remove_tree_best_effort(&path);
        } else if let Err(e) = fs::remove_file(&path) {
            debug!("leaving {} in place: {}", path.display(), e);
        }
    }
    let _ = fs::remove_dir(dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::content_digest;

    fn key(tag: &str) -> CacheKey {
        CacheKey::parse(&content_digest(tag)).unwrap()
    }

    fn metadata(key: &CacheKey) -> CacheMetadata {
        CacheMetadata::new(key, key.as_str(), "opt=2", "test-target")
            .with_functions(vec!["add".into()])
    }

    fn fake_artifact(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join(format!("build-{}", bytes.len()));
        fs::write(&path, bytes).unwrap();
        path
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_store_then_lookup() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("cache"));
        let k = key("a");

        assert!(cache.lookup(&k).is_none());
        assert!(!cache.root().exists(), "root is created lazily");

        let artifact = fake_artifact(scratch.path(), b"\x7fELF...");
        let entry = cache.store(&k, &artifact, &metadata(&k)).unwrap();

        assert_eq!(cache.lookup(&k), Some(entry.artifact_path.clone()));
        assert_eq!(fs::read(&entry.artifact_path).unwrap(), b"\x7fELF...");
        assert_eq!(cache.load_metadata(&k), Some(entry.metadata.clone()));
        assert_eq!(cache.entries(), vec![entry]);
    }

    #[test]
    fn test_torn_entries_are_misses() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path());
        let k = key("torn");
        let artifact = fake_artifact(scratch.path(), b"lib");
        cache.store(&k, &artifact, &metadata(&k)).unwrap();

        fs::remove_file(cache.artifact_path(&k)).unwrap();
        assert!(cache.metadata_path(&k).exists());
        assert!(cache.lookup(&k).is_none());

        let k2 = key("no-metadata");
        fs::write(cache.artifact_path(&k2), b"lib").unwrap();
        assert!(cache.lookup(&k2).is_none());
    }

    #[test]
    fn test_empty_artifact_is_miss() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        let k = key("empty");
        let artifact = fake_artifact(scratch.path(), b"");
        cache.store(&k, &artifact, &metadata(&k)).unwrap();
        assert!(cache.lookup(&k).is_none());
    }

    #[test]
    fn test_corrupt_metadata_loads_as_none() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path());
        let k = key("corrupt");
        let artifact = fake_artifact(scratch.path(), b"lib");
        cache.store(&k, &artifact, &metadata(&k)).unwrap();
        fs::write(cache.metadata_path(&k), b"{ not json").unwrap();

        assert!(cache.load_metadata(&k).is_none());
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_invalidate() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        let k = key("inv");
        let artifact = fake_artifact(scratch.path(), b"lib");
        cache.store(&k, &artifact, &metadata(&k)).unwrap();
        cache.store_ir(&k, &artifact).unwrap();

        assert!(cache.invalidate(&k));
        assert!(!cache.ir_path(&k).exists());
        assert!(cache.lookup(&k).is_none());
        assert!(!cache.invalidate(&k));
    }

    #[test]
    fn test_prune_boundary() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        let cutoff = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let artifact = fake_artifact(scratch.path(), b"lib");

        let older = key("older");
        let exact = key("exact");
        let newer = key("newer");
        for (k, offset) in [(&older, -10i64), (&exact, 0), (&newer, 10)] {
            cache.store(k, &artifact, &metadata(k)).unwrap();
            let time = if offset < 0 {
                cutoff - Duration::from_secs(offset.unsigned_abs())
            } else {
                cutoff + Duration::from_secs(offset as u64)
            };
            set_mtime(&cache.artifact_path(k), time);
        }

        assert_eq!(cache.prune_before(cutoff), 1);
        assert!(cache.lookup(&older).is_none());
        assert!(cache.lookup(&exact).is_some());
        assert!(cache.lookup(&newer).is_some());
    }

    #[test]
    fn test_prune_by_age_keeps_fresh_entries() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        let k = key("fresh");
        let artifact = fake_artifact(scratch.path(), b"lib");
        cache.store(&k, &artifact, &metadata(&k)).unwrap();

        assert_eq!(cache.prune(Duration::from_secs(3600)), 0);
        assert!(cache.lookup(&k).is_some());
    }

    #[test]
    fn test_prune_descends_into_namespaces() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        let projects = cache.namespace("projects");
        let k = key("project");
        let artifact = fake_artifact(scratch.path(), b"lib");
        projects.store(&k, &artifact, &metadata(&k)).unwrap();
        set_mtime(&projects.artifact_path(&k), UNIX_EPOCH + Duration::from_secs(10));

        assert!(cache.lookup(&k).is_none(), "namespaces are isolated");
        assert_eq!(cache.entries().len(), 1);
        assert_eq!(cache.prune(Duration::from_secs(60)), 1);
        assert!(projects.lookup(&k).is_none());
    }

    #[test]
    fn test_prune_to_size_removes_oldest_first() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        let artifact = fake_artifact(scratch.path(), &[1u8; 4096]);
        let base = UNIX_EPOCH + Duration::from_secs(1_000_000);

        let keys: Vec<CacheKey> = (0..3).map(|i| key(&format!("size-{}", i))).collect();
        for (i, k) in keys.iter().enumerate() {
            cache.store(k, &artifact, &metadata(k)).unwrap();
            set_mtime(&cache.artifact_path(k), base + Duration::from_secs(i as u64));
        }

        let total = cache.size_bytes();
        assert!(total > 3 * 4096);
        let removed = cache.prune_to_size(total - 1);
        assert_eq!(removed, 1);
        assert!(cache.lookup(&keys[0]).is_none());
        assert!(cache.lookup(&keys[1]).is_some());
        assert!(cache.lookup(&keys[2]).is_some());
        assert_eq!(cache.prune_to_size(u64::MAX), 0);
    }

    #[test]
    fn test_clear_and_size() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(scratch.path().join("c"));
        assert_eq!(cache.size_bytes(), 0);

        let k = key("clear");
        let artifact = fake_artifact(scratch.path(), b"library-bytes");
        cache.store(&k, &artifact, &metadata(&k)).unwrap();
        assert!(cache.size_bytes() >= b"library-bytes".len() as u64);

        cache.clear();
        assert!(!cache.root().exists());
        assert_eq!(cache.size_bytes(), 0);
        cache.clear();
    }

    #[test]
    fn test_default_root_is_version_scoped() {
        let root = CacheManager::default_root();
        let last = root.file_name().unwrap().to_str().unwrap();
        assert_eq!(last, format!("v{}", env!("CARGO_PKG_VERSION")));
    }
}
