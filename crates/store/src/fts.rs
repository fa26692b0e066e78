//! Tantivy-backed full-text search sub-store.
//!
//! `NoMergePolicy` is set on the writer deliberately: without it, tantivy's background
//! merge threads have been observed to die under concurrent indexing (I/O errors on
//! mmap'd segment files), killing the `IndexWriter` and losing uncommitted writes.
//! Explicit, caller-driven commits at flush points make segment management entirely
//! synchronous instead.

use std::path::Path;

use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::merge_policy::NoMergePolicy;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, NumericOptions, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexSettings, IndexWriter, TantivyDocument, Term};

use osgrep_core::error::{OsgrepError, Result};

pub struct FtsHit {
    pub chunk_id: u64,
    pub path: String,
    pub score: f32,
}

pub struct FtsStore {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    chunk_id_field: Field,
    content_field: Field,
    path_field: Field,
}

impl FtsStore {
    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut builder = Schema::builder();
        let chunk_id_field =
            builder.add_u64_field("chunk_id", NumericOptions::default().set_indexed().set_stored());
        let content_field = builder.add_text_field("content", TEXT);
        let path_field = builder.add_text_field("path", STRING | STORED);
        let schema = builder.build();

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).map_err(|e| OsgrepError::Other(e.to_string()))?
        } else {
            let mmap = MmapDirectory::open(dir).map_err(|e| OsgrepError::Other(e.to_string()))?;
            Index::create(mmap, schema, IndexSettings::default())
                .map_err(|e| OsgrepError::Other(e.to_string()))?
        };

        let reader = index.reader().map_err(|e| OsgrepError::Other(e.to_string()))?;

        Ok(Self { index, reader, writer: None, chunk_id_field, content_field, path_field })
    }

    fn ensure_writer(&mut self) -> Result<()> {
        if self.writer.is_none() {
            let writer = self
                .index
                .writer(50_000_000)
                .map_err(|e| OsgrepError::Other(e.to_string()))?;
            writer.set_merge_policy(Box::new(NoMergePolicy));
            self.writer = Some(writer);
        }
        Ok(())
    }

    pub fn add(&mut self, chunk_id: u64, path: &str, content: &str) -> Result<()> {
        self.ensure_writer()?;
        let mut doc = TantivyDocument::new();
        doc.add_u64(self.chunk_id_field, chunk_id);
        doc.add_text(self.content_field, content);
        doc.add_text(self.path_field, path);
        self.writer
            .as_mut()
            .unwrap()
            .add_document(doc)
            .map_err(|e| OsgrepError::Other(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&mut self, chunk_id: u64) -> Result<()> {
        self.ensure_writer()?;
        let term = Term::from_field_u64(self.chunk_id_field, chunk_id);
        self.writer.as_mut().unwrap().delete_term(term);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.commit().map_err(|e| OsgrepError::Other(e.to_string()))?;
            self.reader.reload().ok();
        }
        Ok(())
    }

    /// BM25 ranked search over `content`. Callers apply any path predicate themselves
    /// (the store's schema already surfaces `path` on each hit).
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);

        let parsed = match parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                let escaped: String = query
                    .chars()
                    .map(|c| if ":()[]{}^\"~*?\\/".contains(c) { ' ' } else { c })
                    .collect();
                parser
                    .parse_query(&escaped)
                    .map_err(|e| OsgrepError::Other(e.to_string()))?
            }
        };

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| OsgrepError::Other(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument =
                searcher.doc(addr).map_err(|e| OsgrepError::Other(e.to_string()))?;
            let chunk_id = doc.get_first(self.chunk_id_field).and_then(|v| v.as_u64());
            let path = doc
                .get_first(self.path_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(chunk_id) = chunk_id {
                results.push(FtsHit { chunk_id, path, score });
            }
        }
        Ok(results)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_commit_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FtsStore::open_or_create(dir.path()).unwrap();
        store.add(1, "src/main.rs", "fn hello_world() {}").unwrap();
        store.add(2, "src/config.rs", "struct UserConfig {}").unwrap();
        store.commit().unwrap();

        let hits = store.search("hello", 10).unwrap();
        assert_eq!(hits[0].chunk_id, 1);

        let hits = store.search("UserConfig", 10).unwrap();
        assert_eq!(hits[0].chunk_id, 2);
    }

    #[test]
    fn delete_removes_from_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FtsStore::open_or_create(dir.path()).unwrap();
        store.add(1, "a.rs", "shared token").unwrap();
        store.add(2, "b.rs", "shared token").unwrap();
        store.commit().unwrap();
        assert_eq!(store.search("shared", 10).unwrap().len(), 2);

        store.delete(1).unwrap();
        store.commit().unwrap();
        let hits = store.search("shared", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 2);
    }
}
