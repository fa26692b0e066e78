//! osgrep-worker: the Worker Pool (subprocess supervision) and the in-worker
//! embedder/reranker facade used by the `osgrep-worker` subprocess binary.

pub mod model;
pub mod pool;
pub mod protocol;

pub use pool::{PoolConfig, WorkerPool};
