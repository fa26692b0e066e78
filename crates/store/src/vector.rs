//! Flat columnar vector sub-store, with an optional IVF-flat coarse index.
//!
//! Rows live entirely in memory once loaded (the table sizes this system targets — one
//! repository's chunks — comfortably fit), backed on disk by a single
//! write-then-rename file, matching the meta-store's own crash-safety pattern.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use osgrep_core::error::{OsgrepError, Result};
use osgrep_core::types::EMBEDDING_DIM;

use crate::row::{StoreMeta, StoredRow, CANONICAL_SCHEMA_VERSION};

/// Below this row count, `createVectorIndex` is a no-op: a flat scan is faster and the
/// IVF training step would not have enough data (§4.5).
pub const VECTOR_INDEX_MIN_ROWS: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IvfIndex {
    centroids: Vec<Vec<f32>>,
    assignments: Vec<usize>,
}

pub struct VectorStore {
    rows_path: PathBuf,
    meta_path: PathBuf,
    ivf_path: PathBuf,
    rows: Vec<StoredRow>,
    next_id: u64,
    ivf: Option<IvfIndex>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub row: StoredRow,
    pub distance: f32,
}

impl VectorStore {
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let rows_path = dir.join("rows.jsonl");
        let meta_path = dir.join("schema.json");
        let ivf_path = dir.join("ivf.json");

        let meta: StoreMeta = match std::fs::read(&meta_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => StoreMeta::default(),
        };

        let mut rows: Vec<StoredRow> = Vec::new();
        if let Ok(contents) = std::fs::read_to_string(&rows_path) {
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StoredRow>(line) {
                    Ok(row) => rows.push(row),
                    Err(e) => tracing::warn!(error = %e, "skipping unreadable row during load"),
                }
            }
        }

        let ivf = std::fs::read(&ivf_path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok());

        let next_id = rows.iter().map(|r| r.id).max().map(|m| m + 1).unwrap_or(0);

        let mut store = Self { rows_path, meta_path, ivf_path, rows, next_id, ivf };

        if meta.schema_version < CANONICAL_SCHEMA_VERSION {
            store.migrate()?;
        }
        Ok(store)
    }

    /// One-shot migration: rewrite every row through the canonical struct (serde
    /// defaults already fill any missing `context_prev`/`context_next`), then persist
    /// and bump the schema version. Guarded by the caller holding the writer lock.
    fn migrate(&mut self) -> Result<()> {
        tracing::info!(rows = self.rows.len(), "migrating vector store to canonical schema");
        let to_migration_error = |e: OsgrepError| OsgrepError::SchemaMigrationFailed { reason: e.to_string() };

        self.persist_rows().map_err(to_migration_error)?;
        let meta = StoreMeta { schema_version: CANONICAL_SCHEMA_VERSION };
        let bytes = serde_json::to_vec_pretty(&meta).map_err(|e| OsgrepError::SchemaMigrationFailed {
            reason: e.to_string(),
        })?;
        let tmp = self.meta_path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| OsgrepError::SchemaMigrationFailed { reason: e.to_string() })?;
        std::fs::rename(&tmp, &self.meta_path)
            .map_err(|e| OsgrepError::SchemaMigrationFailed { reason: e.to_string() })?;
        Ok(())
    }

    fn persist_rows(&self) -> Result<()> {
        let tmp = self.rows_path.with_extension("jsonl.tmp");
        let mut buf = String::new();
        for row in &self.rows {
            buf.push_str(&serde_json::to_string(row)?);
            buf.push('\n');
        }
        std::fs::write(&tmp, buf)?;
        std::fs::rename(&tmp, &self.rows_path)?;
        Ok(())
    }

    /// Append rows, assigning ids. Rejects rows whose vector dimension isn't D.
    pub fn add(&mut self, mut new_rows: Vec<StoredRow>) -> Result<Vec<u64>> {
        let mut ids = Vec::with_capacity(new_rows.len());
        for row in new_rows.iter_mut() {
            if row.vector.len() != EMBEDDING_DIM {
                return Err(OsgrepError::DimensionMismatch {
                    expected: EMBEDDING_DIM,
                    actual: row.vector.len(),
                });
            }
            row.id = self.next_id;
            ids.push(self.next_id);
            self.next_id += 1;
        }
        self.rows.extend(new_rows);
        self.persist_rows()?;
        self.ivf = None; // stale after mutation; caller re-runs createVectorIndex.
        std::fs::remove_file(&self.ivf_path).ok();
        Ok(ids)
    }

    pub fn delete_by_path(&mut self, path: &str) -> Result<usize> {
        let before = self.rows.len();
        self.rows.retain(|r| r.path != path);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.persist_rows()?;
            self.ivf = None;
            std::fs::remove_file(&self.ivf_path).ok();
        }
        Ok(removed)
    }

    pub fn rows_for_path(&self, path: &str) -> Vec<&StoredRow> {
        self.rows.iter().filter(|r| r.path == path).collect()
    }

    pub fn rows_for_path_prefix(&self, prefix: &str) -> Vec<&StoredRow> {
        self.rows.iter().filter(|r| r.path.starts_with(prefix)).collect()
    }

    pub fn delete_by_path_prefix(&mut self, prefix: &str) -> Result<usize> {
        let before = self.rows.len();
        self.rows.retain(|r| !r.path.starts_with(prefix));
        let removed = before - self.rows.len();
        if removed > 0 {
            self.persist_rows()?;
            self.ivf = None;
            std::fs::remove_file(&self.ivf_path).ok();
        }
        Ok(removed)
    }

    pub fn row_by_id(&self, id: u64) -> Option<&StoredRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn count_rows(&self) -> usize {
        self.rows.len()
    }

    /// Build (or rebuild) a coarse IVF-flat index. No-op below `VECTOR_INDEX_MIN_ROWS`.
    pub fn create_vector_index(&mut self) -> Result<()> {
        if self.rows.len() < VECTOR_INDEX_MIN_ROWS {
            return Ok(());
        }
        let n_clusters = (self.rows.len() as f64).sqrt().ceil().max(1.0) as usize;
        let ivf = train_ivf(&self.rows, n_clusters);
        let bytes = serde_json::to_vec(&ivf)?;
        let tmp = self.ivf_path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.ivf_path)?;
        self.ivf = Some(ivf);
        Ok(())
    }

    /// Top-k nearest rows by cosine distance (`1 - dot`, vectors are unit-length),
    /// optionally restricted by a path predicate.
    pub fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        predicate: Option<&crate::predicate::WherePredicate>,
    ) -> Vec<VectorHit> {
        let candidates: Box<dyn Iterator<Item = &StoredRow>> = match (&self.ivf, self.rows.len()) {
            (Some(ivf), n) if n >= VECTOR_INDEX_MIN_ROWS => {
                Box::new(self.ivf_candidates(ivf, query))
            }
            _ => Box::new(self.rows.iter()),
        };

        let mut scored: Vec<VectorHit> = candidates
            .filter(|row| predicate.map(|p| p.matches(&row.path)).unwrap_or(true))
            .map(|row| VectorHit { row: row.clone(), distance: 1.0 - dot(query, &row.vector) })
            .collect();

        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn ivf_candidates<'a>(&'a self, ivf: &IvfIndex, query: &[f32]) -> impl Iterator<Item = &'a StoredRow> {
        let nprobe = ivf.centroids.len().min(8).max(1);
        let mut by_dist: Vec<(usize, f32)> = ivf
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, 1.0 - dot(query, c)))
            .collect();
        by_dist.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let probe_clusters: std::collections::HashSet<usize> =
            by_dist.into_iter().take(nprobe).map(|(i, _)| i).collect();

        self.rows
            .iter()
            .enumerate()
            .filter(move |(i, _)| probe_clusters.contains(&ivf.assignments[*i]))
            .map(|(_, row)| row)
    }

    pub fn close(&mut self) -> Result<()> {
        self.persist_rows()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// A small, fixed-iteration k-means coarse quantizer — adequate for the IVF "nearest
/// clusters" candidate narrowing this store needs; not a production ANN algorithm.
fn train_ivf(rows: &[StoredRow], n_clusters: usize) -> IvfIndex {
    let n_clusters = n_clusters.max(1).min(rows.len());
    let mut centroids: Vec<Vec<f32>> = rows
        .iter()
        .step_by((rows.len() / n_clusters).max(1))
        .take(n_clusters)
        .map(|r| r.vector.clone())
        .collect();
    while centroids.len() < n_clusters {
        centroids.push(rows[0].vector.clone());
    }

    let mut assignments = vec![0usize; rows.len()];
    for _ in 0..10 {
        for (i, row) in rows.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f32::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = 1.0 - dot(&row.vector, centroid);
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        let mut sums = vec![vec![0f32; EMBEDDING_DIM]; n_clusters];
        let mut counts = vec![0usize; n_clusters];
        for (i, row) in rows.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (d, v) in sums[c].iter_mut().zip(row.vector.iter()) {
                *d += v;
            }
        }
        for c in 0..n_clusters {
            if counts[c] == 0 {
                continue;
            }
            for v in sums[c].iter_mut() {
                *v /= counts[c] as f32;
            }
            centroids[c] = sums[c].clone();
        }
    }

    IvfIndex { centroids, assignments }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u64, path: &str, vector: Vec<f32>) -> StoredRow {
        StoredRow {
            id,
            path: path.to_string(),
            hash: "h".into(),
            content: "content".into(),
            start_line: 1,
            end_line: 1,
            chunk_index: 0,
            is_anchor: false,
            context_prev: String::new(),
            context_next: String::new(),
            vector,
        }
    }

    fn unit_vec(mut v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in v.iter_mut() {
            *x /= norm;
        }
        v
    }

    #[test]
    fn rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open_or_create(dir.path()).unwrap();
        let bad = row(0, "a.rs", vec![1.0, 2.0]);
        let err = store.add(vec![bad]).unwrap_err();
        assert!(matches!(err, OsgrepError::DimensionMismatch { .. }));
    }

    #[test]
    fn add_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vec![0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        {
            let mut store = VectorStore::open_or_create(dir.path()).unwrap();
            store.add(vec![row(0, "a.rs", v.clone())]).unwrap();
        }
        let reloaded = VectorStore::open_or_create(dir.path()).unwrap();
        assert_eq!(reloaded.count_rows(), 1);
    }

    #[test]
    fn delete_by_path_removes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vec![0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        let mut store = VectorStore::open_or_create(dir.path()).unwrap();
        store.add(vec![row(0, "a.rs", v.clone()), row(0, "b.rs", v.clone())]).unwrap();
        let removed = store.delete_by_path("a.rs").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_rows(), 1);
    }

    #[test]
    fn vector_search_returns_closest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open_or_create(dir.path()).unwrap();
        let mut a = vec![0f32; EMBEDDING_DIM];
        a[0] = 1.0;
        let mut b = vec![0f32; EMBEDDING_DIM];
        b[1] = 1.0;
        store.add(vec![row(0, "a.rs", a.clone()), row(0, "b.rs", b)]).unwrap();

        let hits = store.vector_search(&a, 1, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row.path, "a.rs");
    }

    #[test]
    fn below_threshold_index_build_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open_or_create(dir.path()).unwrap();
        let mut v = vec![0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        store.add(vec![row(0, "a.rs", v)]).unwrap();
        store.create_vector_index().unwrap();
        assert!(!dir.path().join("ivf.json").exists());
    }

    #[test]
    fn unit_vec_helper_normalizes() {
        let v = unit_vec(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn migrate_failure_is_reported_as_schema_migration_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open_or_create(dir.path()).unwrap();
        // Replace the meta path with a directory so the write-then-rename in `migrate`
        // fails, exercising the error-wrapping rather than the happy path.
        std::fs::create_dir_all(&store.meta_path).unwrap();
        let err = store.migrate().unwrap_err();
        assert!(matches!(err, OsgrepError::SchemaMigrationFailed { .. }));
    }
}
