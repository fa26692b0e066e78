//! osgrep-core: content hashing, the meta-store, the structure-aware chunker, and the
//! per-repository writer lock. Shared by the worker pool, the store, and the server.

pub mod chunker;
pub mod config;
pub mod error;
pub mod hash;
pub mod lock;
pub mod meta_store;
pub mod types;

pub use error::{OsgrepError, Result};
pub use meta_store::MetaStore;
pub use types::{Chunk, FileRecord, SyncPhase, SyncProgress, SyncReport, COLBERT_DIM, EMBEDDING_DIM};
