//! Newline-delimited JSON wire protocol between the pool and a worker subprocess.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    ProcessFile,
    EncodeQuery,
    Rerank,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: Method,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self { id, result: None, error: Some(error.into()) }
    }
}

/// Payload for `processFile`: embed a batch of chunk texts.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedBatchPayload {
    pub texts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbedBatchResult {
    pub vectors: Vec<Vec<f32>>,
}

/// Payload for `encodeQuery`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EncodeQueryPayload {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncodeQueryResult {
    pub vector: Vec<f32>,
}

/// Payload for `rerank`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RerankPayload {
    pub query: String,
    pub docs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RerankResult {
    pub scores: Vec<f32>,
}
