//! Module fetching capability.
//!
//! Fetching is performed by an out-of-scope collaborator (the reference
//! implementation clones VCS repositories); the core only defines the
//! interface it calls when a module is neither loaded nor present in the
//! workspace. Tests and embedders plug in their own sources.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no fetcher is configured; cannot retrieve `{0}`")]
    NotConfigured(String),
    #[error("module `{0}` not found")]
    NotFound(String),
    #[error("network failure fetching `{name}`: {message}")]
    Network { name: String, message: String },
    #[error("invalid module data for `{name}`: {message}")]
    InvalidData { name: String, message: String },
}

/// Produces the JSON bytes of a module given its full name.
pub trait ModuleFetcher {
    fn fetch(&self, full_name: &str) -> Result<Vec<u8>, FetchError>;
}

/// In-memory fetcher mapping full names to module JSON, used by tests and
/// embedders that preload their module set.
#[derive(Debug, Default)]
pub struct MapFetcher {
    modules: HashMap<String, Vec<u8>>,
}

impl MapFetcher {
    pub fn new() -> MapFetcher {
        MapFetcher::default()
    }

    pub fn insert(&mut self, full_name: impl Into<String>, json_bytes: impl Into<Vec<u8>>) {
        self.modules.insert(full_name.into(), json_bytes.into());
    }
}

impl ModuleFetcher for MapFetcher {
    fn fetch(&self, full_name: &str) -> Result<Vec<u8>, FetchError> {
        self.modules
            .get(full_name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(full_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_fetcher_serves_inserted_modules() {
        let mut fetcher = MapFetcher::new();
        fetcher.insert("test/dep", br#"{"dependencies":[]}"#.to_vec());

        assert!(fetcher.fetch("test/dep").is_ok());
        assert!(matches!(
            fetcher.fetch("test/missing"),
            Err(FetchError::NotFound(_))
        ));
    }
}
