//! osgrep-store: the columnar vector+text table backing one repository's index.
//!
//! Two co-located sub-engines under `data/<store-name>/`: a tantivy `fts/` index for
//! full-text search, and a flat-file `vectors/` sub-store for dense nearest-neighbor
//! search. Both are driven through this single facade so the Searcher and Syncer never
//! depend on either engine's implementation-specific fields (§9: the `Store` interface
//! is a swappable capability set).

pub mod fts;
pub mod predicate;
pub mod row;
pub mod vector;

use std::path::{Path, PathBuf};

use osgrep_core::error::Result;
use osgrep_core::Chunk;

use fts::FtsStore;
use predicate::WherePredicate;
use row::StoredRow;
use vector::VectorStore;

pub use vector::{VectorHit, VECTOR_INDEX_MIN_ROWS};

pub struct Store {
    name: String,
    fts: FtsStore,
    vectors: VectorStore,
}

pub struct VectorSearchHit {
    pub row: StoredRow,
    pub distance: f32,
}

pub struct FtsSearchHit {
    pub row: StoredRow,
    pub score: f32,
}

impl Store {
    /// Open an existing store without creating one. Errors with `StoreMissing` if no
    /// store named `name` has ever been indexed under `data_dir` — callers that only
    /// read (e.g. a search request before the first sync) should treat that as "no
    /// results yet", not a hard failure (spec: "if the vector store is missing for the
    /// repo, return empty results, not an error").
    pub fn open(data_dir: &Path, name: &str) -> Result<Self> {
        if !store_exists(data_dir, name) {
            return Err(osgrep_core::OsgrepError::StoreMissing { name: name.to_string() });
        }
        let root = data_dir.join(name);
        let fts = FtsStore::open_or_create(&root.join("fts"))?;
        let vectors = VectorStore::open_or_create(&root.join("vectors"))?;
        Ok(Self { name: name.to_string(), fts, vectors })
    }

    /// Open `name` if it already exists; otherwise create it fresh with the canonical
    /// schema. Both sub-engines run their own schema/migration checks on open.
    pub fn open_or_create(data_dir: &Path, name: &str) -> Result<Self> {
        match Self::open(data_dir, name) {
            Ok(store) => Ok(store),
            Err(osgrep_core::OsgrepError::StoreMissing { .. }) => {
                let root = data_dir.join(name);
                let fts = FtsStore::open_or_create(&root.join("fts"))?;
                let vectors = VectorStore::open_or_create(&root.join("vectors"))?;
                Ok(Self { name: name.to_string(), fts, vectors })
            }
            Err(e) => Err(e),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append rows built from chunks. Both sub-engines are updated; an error embedding
    /// a row into one half leaves the other untouched (caller treats the file as failed
    /// and does not partially commit — see the Syncer's per-file error handling).
    pub fn add(&mut self, chunks: &[Chunk]) -> Result<Vec<u64>> {
        // Ids are assigned by the vector sub-store; mirror them into the FTS index.
        let unassigned: Vec<StoredRow> = chunks.iter().map(|c| StoredRow::from_chunk(0, c)).collect();
        let ids = self.vectors.add(unassigned)?;
        for (id, chunk) in ids.iter().zip(chunks.iter()) {
            self.fts.add(*id, &chunk.path, &chunk.content)?;
        }
        self.fts.commit()?;
        Ok(ids)
    }

    /// `delete(whereExpr)` — currently only the path-equality and path-prefix forms the
    /// Syncer and Searcher issue are supported, per §4.5/§4.6.
    pub fn delete(&mut self, where_expr: &str) -> Result<usize> {
        let predicate = WherePredicate::parse(where_expr)
            .ok_or_else(|| osgrep_core::OsgrepError::Other(format!("unsupported predicate: {where_expr}")))?;

        let removed_ids: Vec<u64> = match &predicate {
            WherePredicate::PathEquals(path) => {
                self.vectors.rows_for_path(path).iter().map(|r| r.id).collect()
            }
            WherePredicate::PathStartsWith(prefix) => self
                .vectors
                .rows_for_path_prefix(prefix)
                .iter()
                .map(|r| r.id)
                .collect(),
        };
        for id in &removed_ids {
            self.fts.delete(*id)?;
        }
        self.fts.commit()?;

        let removed = match &predicate {
            WherePredicate::PathEquals(path) => self.vectors.delete_by_path(path)?,
            WherePredicate::PathStartsWith(prefix) => self.vectors.delete_by_path_prefix(prefix)?,
        };
        Ok(removed)
    }

    pub fn vector_search(&self, vec: &[f32], k: usize, where_expr: Option<&str>) -> Result<Vec<VectorSearchHit>> {
        let predicate = where_expr.and_then(WherePredicate::parse);
        Ok(self
            .vectors
            .vector_search(vec, k, predicate.as_ref())
            .into_iter()
            .map(|h| VectorSearchHit { row: h.row, distance: h.distance })
            .collect())
    }

    pub fn fts_search(&self, text: &str, k: usize, where_expr: Option<&str>) -> Result<Vec<FtsSearchHit>> {
        let predicate = where_expr.and_then(|e| WherePredicate::parse(e));
        // Over-fetch before filtering by path, since tantivy itself only indexes
        // `content`.
        let raw = self.fts.search(text, k * 4)?;
        let mut hits = Vec::new();
        for hit in raw {
            if let Some(p) = &predicate {
                if !p.matches(&hit.path) {
                    continue;
                }
            }
            if let Some(row) = self.vectors.row_by_id(hit.chunk_id) {
                hits.push(FtsSearchHit { row: row.clone(), score: hit.score });
            }
            if hits.len() >= k {
                break;
            }
        }
        Ok(hits)
    }

    /// Idempotent: tantivy already indexes `content` as soon as the FTS sub-store is
    /// opened, so this is a no-op placeholder kept for interface parity with §4.5.
    pub fn create_fts_index(&mut self, _column: &str) -> Result<()> {
        Ok(())
    }

    pub fn create_vector_index(&mut self, _column: &str) -> Result<()> {
        self.vectors.create_vector_index()
    }

    pub fn count_rows(&self) -> usize {
        self.vectors.count_rows()
    }

    pub fn close(&mut self) -> Result<()> {
        self.vectors.close()?;
        self.fts.commit()
    }

    pub fn rows_for_path(&self, path: &str) -> Vec<StoredRow> {
        self.vectors.rows_for_path(path).into_iter().cloned().collect()
    }
}

pub fn store_exists(data_dir: &Path, name: &str) -> bool {
    data_dir.join(name).join("vectors").join("rows.jsonl").exists()
}

pub fn data_root(base: &Path, name: &str) -> PathBuf {
    base.join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_on_absent_store_returns_store_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = Store::open(dir.path(), "repo").unwrap_err();
        assert!(matches!(err, osgrep_core::OsgrepError::StoreMissing { name } if name == "repo"));
    }

    #[test]
    fn open_or_create_then_open_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!store_exists(dir.path(), "repo"));

        Store::open_or_create(dir.path(), "repo").unwrap();
        assert!(store_exists(dir.path(), "repo"));

        Store::open(dir.path(), "repo").unwrap();
    }
}
