//! On-disk row representation and schema evolution.

use serde::{Deserialize, Serialize};

use osgrep_core::Chunk;

/// Canonical column set. Adding a column here means bumping `CANONICAL_SCHEMA_VERSION`
/// and handling it in `migrate_row`.
pub const CANONICAL_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: u64,
    pub path: String,
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
    pub vector: Vec<f32>,
}

impl StoredRow {
    pub fn from_chunk(id: u64, chunk: &Chunk) -> Self {
        Self {
            id,
            path: chunk.path.clone(),
            hash: chunk.hash.clone(),
            content: chunk.content.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            chunk_index: chunk.chunk_index,
            is_anchor: chunk.is_anchor,
            context_prev: chunk.context_prev.clone(),
            context_next: chunk.context_next.clone(),
            vector: chunk.vector.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub schema_version: u32,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self { schema_version: CANONICAL_SCHEMA_VERSION }
    }
}
