//! Pluggable artifact cache for compiled modules.
//!
//! Artifacts are LLVM bitcode keyed by a structural hash of the module and
//! its dependencies, so a key is only ever valid for exactly one module
//! state and stale entries can never be served. Implementations may be
//! shared between contexts and must bring their own serialization
//! discipline; the default store writes whole files atomically.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cache artifact: {0}")]
    Io(#[from] io::Error),
}

/// Capability interface for the artifact store.
pub trait ModuleCache: Send + Sync {
    /// Retrieve the artifact stored under `key`, if any.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store an artifact under `key`, replacing any previous one.
    fn put(&self, key: &str, artifact: &[u8]) -> Result<(), CacheError>;
}

/// File-per-artifact store rooted at a directory, normally
/// `<workspace>/lib`. Writes go to a temporary sibling and are renamed into
/// place so concurrent readers never observe a torn artifact.
#[derive(Debug)]
pub struct DefaultModuleCache {
    dir: PathBuf,
}

impl DefaultModuleCache {
    pub fn new(dir: impl Into<PathBuf>) -> DefaultModuleCache {
        DefaultModuleCache { dir: dir.into() }
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        // Keys embed module full names; flatten the path separators.
        let file: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{file}.bc"))
    }
}

impl ModuleCache for DefaultModuleCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.artifact_path(key);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!(key, path = %path.display(), "module cache hit");
                Some(bytes)
            }
            Err(_) => None,
        }
    }

    fn put(&self, key: &str, artifact: &[u8]) -> Result<(), CacheError> {
        let path = self.artifact_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("bc.tmp");
        fs::write(&tmp, artifact)?;
        fs::rename(&tmp, &path)?;
        debug!(key, path = %path.display(), "module cache store");
        Ok(())
    }
}

/// Cache that stores nothing, for contexts without a workspace.
#[derive(Debug, Default)]
pub struct NullModuleCache;

impl ModuleCache for NullModuleCache {
    fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: &str, _artifact: &[u8]) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Walk the directory used for a module name + hash into a cache key.
pub fn artifact_key(module_full_name: &str, structural_hash: &str) -> String {
    format!("{module_full_name}@{structural_hash}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_the_default_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DefaultModuleCache::new(dir.path());

        let key = artifact_key("test/main", "abc123");
        assert!(cache.get(&key).is_none());

        cache.put(&key, b"fake bitcode").unwrap();
        assert_eq!(cache.get(&key).unwrap(), b"fake bitcode");

        // A different hash is a different key.
        assert!(cache.get(&artifact_key("test/main", "def456")).is_none());
    }

    #[test]
    fn null_cache_never_hits() {
        let cache = NullModuleCache;
        cache.put("k", b"data").unwrap();
        assert!(cache.get("k").is_none());
    }
}
