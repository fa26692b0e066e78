//! Shared data types flowing between the Chunker, Syncer, Worker Pool, and Store.

use serde::{Deserialize, Serialize};

/// Dense embedding dimensionality. Fixed per §3 of the design.
pub const EMBEDDING_DIM: usize = 384;

/// Per-token dimensionality of the ColBERT late-interaction model.
pub const COLBERT_DIM: usize = 48;

/// A file as read off disk, before chunking. Discarded once its chunk batch is written.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Path relative to the project root.
    pub path: String,
    /// Content digest at the time of read.
    pub hash: String,
    pub bytes: usize,
    pub text: String,
}

/// A contiguous text window from one file, ready to be embedded and stored.
///
/// The anchor convention is pinned here (see DESIGN.md open-question log): the anchor
/// chunk always carries `chunk_index == 0`, body chunks are numbered `1..N`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Opaque id, assigned at write time (absent until the store assigns one).
    pub id: Option<u64>,
    pub path: String,
    /// Digest of the file this chunk was extracted from.
    pub hash: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_index: u32,
    pub is_anchor: bool,
    #[serde(default)]
    pub context_prev: String,
    #[serde(default)]
    pub context_next: String,
    #[serde(default)]
    pub vector: Vec<f32>,
}

impl Chunk {
    /// `start_line == 0` is the sentinel for a chunk spanning zero source lines (an
    /// anchor over an empty file); every real line range is 1-based.
    pub fn num_lines(&self) -> u32 {
        if self.start_line == 0 {
            0
        } else {
            self.end_line.saturating_sub(self.start_line) + 1
        }
    }
}

/// Progress phases reported by the Syncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Enumerate,
    Index,
    Finalize,
}

/// A single progress callback payload, emitted at least once per file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub processed: usize,
    pub total: usize,
    pub current_path: Option<String>,
}

/// Summary returned by a completed sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub indexed: usize,
    pub errors: usize,
}

/// A single `filters.all[*]` entry translated by the Searcher into a store predicate.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterEntry {
    pub key: String,
    pub operator: String,
    pub value: String,
}

/// Validate that `rel_path`, when joined to `project_root`, does not escape it.
///
/// Mirrors the path-traversal guard this codebase already applies in its HTTP layer:
/// rejects empty paths, literal `..` components, and absolute paths outright, then
/// canonicalizes and checks containment.
pub fn validate_path(
    project_root: &std::path::Path,
    rel_path: &str,
) -> std::result::Result<std::path::PathBuf, &'static str> {
    if rel_path.is_empty() {
        return Err("empty path");
    }
    let candidate = std::path::Path::new(rel_path);
    if candidate.is_absolute() {
        return Err("absolute paths are not allowed");
    }
    if candidate.components().any(|c| c == std::path::Component::ParentDir) {
        return Err("parent directory references are not allowed");
    }

    let joined = project_root.join(candidate);
    let canonical_root = project_root
        .canonicalize()
        .map_err(|_| "project root does not exist")?;
    let canonical = joined.canonicalize().unwrap_or(joined);

    if canonical == canonical_root || canonical.starts_with(&canonical_root) {
        Ok(canonical)
    } else {
        Err("path escapes project root")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_num_lines() {
        let c = Chunk {
            id: None,
            path: "a.rs".into(),
            hash: "h".into(),
            content: String::new(),
            start_line: 10,
            end_line: 12,
            chunk_index: 1,
            is_anchor: false,
            context_prev: String::new(),
            context_next: String::new(),
            vector: vec![],
        };
        assert_eq!(c.num_lines(), 3);
    }

    #[test]
    fn validate_path_rejects_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path(dir.path(), "../sibling").unwrap_err();
        assert_eq!(err, "parent directory references are not allowed");
    }

    #[test]
    fn validate_path_allows_root_itself() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = validate_path(dir.path(), ".").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn validate_path_rejects_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_path(dir.path(), "/etc/passwd").unwrap_err();
        assert_eq!(err, "absolute paths are not allowed");
    }
}
