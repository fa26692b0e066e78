//! Persistent `path → hash` map used for change detection during sync.
//!
//! A single flat JSON file under the user's config directory, rewritten whole on
//! `save` using write-then-rename for crash safety — the same pattern this codebase
//! already uses for its own config writes (see `init.rs`'s merge-and-rewrite of
//! `.mcp.json`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Default)]
pub struct MetaStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl MetaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), entries: BTreeMap::new() }
    }

    /// Load from disk. A missing file yields an empty map; a corrupt file yields an
    /// empty map plus a warning log — neither is an error, per §4.1.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "meta-store file is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read meta-store, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    /// Rewrite the whole file via write-then-rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn set(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(path.into(), hash.into());
    }

    pub fn delete(&mut self, path: &str) {
        self.entries.remove(path);
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn file_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        let mut store = MetaStore::new(&path);
        store.set("a.rs", "hash-a");
        store.set("b.rs", "hash-b");
        store.save().unwrap();

        let reloaded = MetaStore::load(&path);
        assert_eq!(reloaded.get("a.rs"), Some("hash-a"));
        assert_eq!(reloaded.get("b.rs"), Some("hash-b"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::load(dir.path().join("nope.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = MetaStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn delete_removes_entry() {
        let mut store = MetaStore::new("/dev/null");
        store.set("a.rs", "hash-a");
        store.delete("a.rs");
        assert_eq!(store.get("a.rs"), None);
    }
}
