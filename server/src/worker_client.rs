//! Typed facade over the `osgrep-worker` pool's newline-JSON protocol. Every call blocks
//! the calling thread on the pool's reply channel — async callers must invoke these from
//! a `spawn_blocking` context, matching the pool's own documented contract.

use osgrep_core::error::{OsgrepError, Result};
use osgrep_worker::pool::{PoolConfig, PoolError, WorkerPool};
use osgrep_worker::protocol::{
    EmbedBatchPayload, EmbedBatchResult, EncodeQueryPayload, EncodeQueryResult, Method,
    RerankPayload, RerankResult,
};

pub struct WorkerClient {
    pool: WorkerPool,
}

/// Translate the pool's task-level failure kind into the shared error type so callers
/// can match `WorkerCrash`/`WorkerTimeout` instead of parsing message text.
fn convert_pool_error(e: PoolError) -> OsgrepError {
    match e {
        PoolError::Crashed { worker_id } => {
            OsgrepError::WorkerCrash { worker_id, reason: e.to_string() }
        }
        PoolError::TimedOut { worker_id, timeout_ms } => {
            OsgrepError::WorkerTimeout { worker_id, timeout_ms }
        }
        PoolError::Other(msg) => OsgrepError::Other(msg),
    }
}

impl WorkerClient {
    pub fn start(cfg: PoolConfig) -> Self {
        Self { pool: WorkerPool::start(cfg) }
    }

    pub fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let payload = serde_json::to_value(EmbedBatchPayload { texts })?;
        let raw = self
            .pool
            .submit(Method::ProcessFile, payload)
            .map_err(convert_pool_error)?;
        let result: EmbedBatchResult = serde_json::from_value(raw)?;
        Ok(result.vectors)
    }

    pub fn encode_query(&self, text: &str) -> Result<Vec<f32>> {
        let payload = serde_json::to_value(EncodeQueryPayload { text: text.to_string() })?;
        let raw = self
            .pool
            .submit(Method::EncodeQuery, payload)
            .map_err(convert_pool_error)?;
        let result: EncodeQueryResult = serde_json::from_value(raw)?;
        Ok(result.vector)
    }

    pub fn rerank(&self, query: &str, docs: Vec<String>) -> Result<Vec<f32>> {
        let payload = serde_json::to_value(RerankPayload { query: query.to_string(), docs })?;
        let raw = self.pool.submit(Method::Rerank, payload).map_err(convert_pool_error)?;
        let result: RerankResult = serde_json::from_value(raw)?;
        Ok(result.scores)
    }

    pub fn destroy(&self, wait: std::time::Duration) {
        self.pool.destroy(wait);
    }
}

pub fn default_pool_config(cfg: &crate::config::ServerConfig, worker_binary: std::path::PathBuf) -> PoolConfig {
    PoolConfig {
        worker_count: cfg.worker_count,
        worker_binary,
        model_dir: cfg.model_dir.clone(),
        timeout: std::time::Duration::from_millis(cfg.worker_timeout_ms),
        rss_threshold_bytes: osgrep_worker::pool::DEFAULT_RSS_THRESHOLD_BYTES,
    }
}
