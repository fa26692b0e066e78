//! Enumerate → diff → index pipeline, run under the project's writer lock.
//!
//! Chunking and embedding for new/changed files runs with bounded concurrency (a
//! dedicated rayon pool sized `P ≈ 2×workers`, matching this codebase's existing
//! preference for rayon over hand-rolled thread pools for CPU-bound fan-out); the
//! resulting rows are flushed to the store sequentially so per-path `delete` always
//! precedes that path's `add`, per the ordering guarantee in the concurrency model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use osgrep_core::error::Result;
use osgrep_core::types::{Chunk, SyncPhase, SyncProgress, SyncReport};
use osgrep_core::{hash, lock, MetaStore};
use osgrep_store::predicate::WherePredicate;
use osgrep_store::Store;

use crate::worker_client::WorkerClient;

/// Chunks embedded per request to the worker pool.
const EMBED_BATCH_SIZE: usize = 32;
/// Rows buffered before a flush to the store.
const FLUSH_BATCH_SIZE: usize = 500;

pub struct Syncer {
    project_root: PathBuf,
    lock_dir: PathBuf,
    meta_store_path: PathBuf,
    worker_concurrency: usize,
    worker: Arc<WorkerClient>,
}

struct FileOutcome {
    abs_path: PathBuf,
    rel_path: String,
    hash: String,
    rows: Vec<Chunk>,
}

impl Syncer {
    pub fn new(
        project_root: PathBuf,
        lock_dir: PathBuf,
        meta_store_path: PathBuf,
        worker_concurrency: usize,
        worker: Arc<WorkerClient>,
    ) -> Self {
        Self { project_root, lock_dir, meta_store_path, worker_concurrency, worker }
    }

    pub fn run(
        &self,
        store: &mut Store,
        mut on_progress: impl FnMut(SyncProgress),
    ) -> Result<SyncReport> {
        let _guard = lock::acquire(&self.lock_dir)?;

        let candidates = enumerate_files(&self.project_root);
        on_progress(SyncProgress {
            phase: SyncPhase::Enumerate,
            processed: candidates.len(),
            total: candidates.len(),
            current_path: None,
        });

        let mut meta = MetaStore::load(&self.meta_store_path);
        let mut report = SyncReport::default();
        report.scanned = candidates.len();

        let mut new_or_changed: Vec<(PathBuf, String)> = Vec::new();
        let mut seen_abs: std::collections::HashSet<String> = std::collections::HashSet::new();

        for (abs_path, rel_path) in &candidates {
            let key = abs_path.to_string_lossy().to_string();
            seen_abs.insert(key.clone());

            let bytes = match std::fs::read(abs_path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %abs_path.display(), error = %e, "failed to read file, skipping");
                    report.errors += 1;
                    continue;
                }
            };
            let digest = hash::digest(&bytes);

            match meta.get(&key) {
                Some(existing) if existing == digest.as_str() => report.unchanged += 1,
                Some(_) => {
                    report.changed += 1;
                    new_or_changed.push((abs_path.clone(), rel_path.clone()));
                }
                None => {
                    report.new += 1;
                    new_or_changed.push((abs_path.clone(), rel_path.clone()));
                }
            }
        }

        // Stale: meta-store entries under this project root that vanished from disk.
        let stale: Vec<String> = meta
            .paths()
            .filter(|p| Path::new(p).starts_with(&self.project_root) && !seen_abs.contains(*p))
            .map(str::to_string)
            .collect();

        for abs in &stale {
            if let Some(rel) = rel_path_of(&self.project_root, abs) {
                store.delete(&WherePredicate::PathEquals(rel).to_expr())?;
            }
            meta.delete(abs);
            report.stale += 1;
        }

        let total = new_or_changed.len();
        let p = self.worker_concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(p)
            .build()
            .map_err(|e| osgrep_core::OsgrepError::Other(e.to_string()))?;

        let outcomes: Vec<Option<FileOutcome>> = pool.install(|| {
            use rayon::prelude::*;
            new_or_changed
                .par_iter()
                .map(|(abs_path, rel_path)| self.process_file(abs_path, rel_path))
                .collect()
        });

        let mut buffer: Vec<Chunk> = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            on_progress(SyncProgress {
                phase: SyncPhase::Index,
                processed: i + 1,
                total,
                current_path: new_or_changed.get(i).map(|(_, r)| r.clone()),
            });

            let Some(outcome) = outcome else {
                report.errors += 1;
                continue;
            };

            // Per-path ordering: delete before add.
            store.delete(&WherePredicate::PathEquals(outcome.rel_path.clone()).to_expr())?;
            buffer.extend(outcome.rows);
            meta.set(outcome.abs_path.to_string_lossy().to_string(), outcome.hash);

            if buffer.len() >= FLUSH_BATCH_SIZE {
                let ids = store.add(&buffer)?;
                report.indexed += ids.len();
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            let ids = store.add(&buffer)?;
            report.indexed += ids.len();
        }

        store.create_fts_index("content")?;
        store.create_vector_index("vector")?;

        meta.save()?;
        on_progress(SyncProgress {
            phase: SyncPhase::Finalize,
            processed: total,
            total,
            current_path: None,
        });

        info!(
            scanned = report.scanned,
            new = report.new,
            changed = report.changed,
            stale = report.stale,
            indexed = report.indexed,
            errors = report.errors,
            "sync complete"
        );
        Ok(report)
    }

    /// Watch-mode resync: re-runs the index half of the same algorithm scoped to a
    /// specific set of changed paths instead of a full-tree enumeration, so a debounced
    /// batch of filesystem events doesn't pay for a whole-repo walk.
    pub fn sync_paths(&self, store: &mut Store, changed: &[PathBuf]) -> Result<SyncReport> {
        let _guard = lock::acquire(&self.lock_dir)?;
        let mut meta = MetaStore::load(&self.meta_store_path);
        let mut report = SyncReport::default();
        report.scanned = changed.len();

        for abs_path in changed {
            let key = abs_path.to_string_lossy().to_string();
            let Some(rel_path) = rel_path_of(&self.project_root, &key) else { continue };

            if !abs_path.exists() {
                store.delete(&WherePredicate::PathEquals(rel_path).to_expr())?;
                meta.delete(&key);
                report.stale += 1;
                continue;
            }

            match self.process_file(abs_path, &rel_path) {
                Some(outcome) => {
                    let is_new = meta.get(&key).is_none();
                    store.delete(&WherePredicate::PathEquals(outcome.rel_path.clone()).to_expr())?;
                    if !outcome.rows.is_empty() {
                        let ids = store.add(&outcome.rows)?;
                        report.indexed += ids.len();
                    }
                    meta.set(key, outcome.hash);
                    if is_new {
                        report.new += 1;
                    } else {
                        report.changed += 1;
                    }
                }
                None => report.errors += 1,
            }
        }

        store.create_fts_index("content")?;
        store.create_vector_index("vector")?;
        meta.save()?;
        Ok(report)
    }

    fn process_file(&self, abs_path: &Path, rel_path: &str) -> Option<FileOutcome> {
        let bytes = std::fs::read(abs_path).ok()?;
        let text = match String::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => {
                warn!(path = %abs_path.display(), "non-UTF-8 file, skipping");
                return None;
            }
        };
        let digest = hash::digest(text.as_bytes());
        let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let mut chunks = osgrep_core::chunker::chunk_file(rel_path, &text, &digest, ext);
        if chunks.is_empty() {
            return Some(FileOutcome { abs_path: abs_path.to_path_buf(), rel_path: rel_path.to_string(), hash: digest, rows: Vec::new() });
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let mut vectors = Vec::with_capacity(contents.len());
        for batch in contents.chunks(EMBED_BATCH_SIZE) {
            match self.worker.embed_batch(batch.to_vec()) {
                Ok(v) => vectors.extend(v),
                Err(e) => {
                    warn!(path = %abs_path.display(), error = %e, "embedding failed, skipping file");
                    return None;
                }
            }
        }
        if vectors.len() != chunks.len() {
            warn!(path = %abs_path.display(), "embedding count mismatch, skipping file");
            return None;
        }
        for (chunk, vector) in chunks.iter_mut().zip(vectors.into_iter()) {
            chunk.vector = vector;
        }

        let contents_snapshot: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        for i in 0..chunks.len() {
            chunks[i].context_prev = if i == 0 { String::new() } else { contents_snapshot[i - 1].clone() };
            chunks[i].context_next =
                if i + 1 < chunks.len() { contents_snapshot[i + 1].clone() } else { String::new() };
        }

        Some(FileOutcome { abs_path: abs_path.to_path_buf(), rel_path: rel_path.to_string(), hash: digest, rows: chunks })
    }
}

fn rel_path_of(project_root: &Path, abs: &str) -> Option<String> {
    Path::new(abs)
        .strip_prefix(project_root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// Walk `project_root` honoring `.gitignore` and `.osgrepignore`, matching this
/// codebase's existing `scan.rs::walk_files_parallel` conventions.
fn enumerate_files(project_root: &Path) -> Vec<(PathBuf, String)> {
    use ignore::WalkBuilder;
    use std::sync::Mutex;

    let results: Mutex<Vec<(PathBuf, String)>> = Mutex::new(Vec::new());
    WalkBuilder::new(project_root)
        .hidden(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .add_custom_ignore_filename(".osgrepignore")
        .threads(rayon::current_num_threads().min(12))
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let entry = match entry {
                    Ok(e) => e,
                    Err(_) => return ignore::WalkState::Continue,
                };
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    return ignore::WalkState::Continue;
                }
                if !looks_like_text(entry.path()) {
                    return ignore::WalkState::Continue;
                }
                let abs_path = entry.path().to_path_buf();
                let rel_path = abs_path
                    .strip_prefix(project_root)
                    .unwrap_or(&abs_path)
                    .to_string_lossy()
                    .replace('\\', "/");
                results.lock().unwrap().push((abs_path, rel_path));
                ignore::WalkState::Continue
            })
        });
    results.into_inner().unwrap()
}

fn looks_like_text(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else { return false };
    let mut buf = [0u8; 8192];
    let n = match std::io::Read::read(&mut file, &mut buf) {
        Ok(n) => n,
        Err(_) => return false,
    };
    !buf[..n].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rel_path_of_strips_root_and_normalizes_separators() {
        let root = Path::new("/repo");
        assert_eq!(rel_path_of(root, "/repo/src/main.rs"), Some("src/main.rs".to_string()));
        assert_eq!(rel_path_of(root, "/other/src/main.rs"), None);
    }

    #[test]
    fn looks_like_text_rejects_null_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("a.rs");
        std::fs::write(&text_path, b"fn main() {}\n").unwrap();
        assert!(looks_like_text(&text_path));

        let binary_path = dir.path().join("a.bin");
        std::fs::write(&binary_path, [0u8, 1, 2, 0, 3]).unwrap();
        assert!(!looks_like_text(&binary_path));
    }

    #[test]
    fn enumerate_files_skips_gitignored_and_binary_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "ignored.rs\n").unwrap();
        std::fs::write(dir.path().join("kept.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("ignored.rs"), "fn dead() {}\n").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2]).unwrap();

        let found = enumerate_files(dir.path());
        let rels: Vec<String> = found.into_iter().map(|(_, r)| r).collect();
        assert_eq!(rels, vec!["kept.rs".to_string()]);
    }

    #[test]
    fn stale_detection_uses_path_component_matching_not_string_prefix() {
        // A sibling directory sharing a string prefix with the project root must not be
        // treated as "under" it.
        let root = Path::new("/work/repo");
        assert!(Path::new("/work/repo/src/main.rs").starts_with(root));
        assert!(!Path::new("/work/repo-backup/src/main.rs").starts_with(root));
    }
}
