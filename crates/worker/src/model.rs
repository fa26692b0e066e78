//! In-worker model facade: loads the dense embedding model and the ColBERT-style
//! late-interaction reranker from local artifacts and exposes `embed_batch`,
//! `encode_query`, and `rerank`.
//!
//! Mean-pooling + L2-normalization follows this codebase's existing candle-based
//! embedding pipeline; no network fetch is performed here (model artifacts are
//! assumed already present on disk, per the design's out-of-scope boundary).

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use osgrep_core::types::{COLBERT_DIM, EMBEDDING_DIM};

/// Query-side instruction prefix, matching how the dense model was trained for
/// asymmetric retrieval (§4.4).
const QUERY_PREFIX: &str = "Represent this sentence for searching relevant passages: ";

/// Token ids excluded from MaxSim on both sides of the ColBERT comparison (§6).
/// Ranges are inclusive on both ends.
const SKIPLIST_RANGES: &[(u32, u32)] = &[(2, 16), (27, 33), (60, 65), (92, 95)];

fn is_skipped(token_id: u32) -> bool {
    SKIPLIST_RANGES.iter().any(|&(lo, hi)| token_id >= lo && token_id <= hi)
}

pub struct ModelBundle {
    dense_model: BertModel,
    dense_tokenizer: Tokenizer,
    colbert_model: BertModel,
    colbert_tokenizer: Tokenizer,
    colbert_proj: Tensor,
    device: Device,
}

fn load_bert(dir: &Path, device: &Device) -> anyhow::Result<(BertModel, Tokenizer)> {
    let config_path = dir.join("config.json");
    let tokenizer_path = dir.join("tokenizer.json");
    let weights_path = dir.join("model.safetensors");

    let config_str = std::fs::read_to_string(&config_path)?;
    let config: BertConfig = serde_json::from_str(&config_str)?;
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer at {}: {e}", tokenizer_path.display()))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)?
    };
    let model = BertModel::load(vb, &config)?;
    Ok((model, tokenizer))
}

impl ModelBundle {
    /// Load the dense model from `model_dir` and the ColBERT adapter from
    /// `model_dir/colbert`. Both are process-local singletons, initialized once per
    /// worker and never shared across workers (§9: per-worker model state is not
    /// reentrant, no cross-worker coordination required).
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let device = Device::Cpu;
        let (dense_model, dense_tokenizer) = load_bert(model_dir, &device)?;

        let colbert_dir = model_dir.join("colbert");
        let (colbert_model, colbert_tokenizer) = load_bert(&colbert_dir, &device)?;
        let proj_path = colbert_dir.join("model.safetensors");
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[proj_path], DType::F32, &device)? };
        let colbert_proj = vb.get((EMBEDDING_DIM, COLBERT_DIM), "projection.weight")?;

        Ok(Self { dense_model, dense_tokenizer, colbert_model, colbert_tokenizer, colbert_proj, device })
    }

    /// Embed a batch of chunk texts, returning unit-length D=384 vectors.
    pub fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        encode_batch(&self.dense_model, &self.dense_tokenizer, &self.device, texts, EMBEDDING_DIM)
    }

    /// Embed a single query, with the asymmetric-retrieval instruction prefix.
    pub fn encode_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let prefixed = format!("{QUERY_PREFIX}{text}");
        let mut vecs =
            encode_batch(&self.dense_model, &self.dense_tokenizer, &self.device, &[prefixed], EMBEDDING_DIM)?;
        Ok(vecs.pop().unwrap_or_default())
    }

    /// ColBERT MaxSim rerank: for each doc, `score = Σ_t max_s q_t · d_s` over
    /// per-token projections, with skiplist tokens excluded from both sides.
    pub fn rerank(&self, query: &str, docs: &[String]) -> anyhow::Result<Vec<f32>> {
        let q_tokens = self.colbert_token_vectors(query)?;
        let mut scores = Vec::with_capacity(docs.len());
        for doc in docs {
            let d_tokens = self.colbert_token_vectors(doc)?;
            scores.push(max_sim(&q_tokens, &d_tokens));
        }
        Ok(scores)
    }

    /// Tokenize and project `text` into `[T, 48]` row vectors, skiplist tokens removed.
    fn colbert_token_vectors(&self, text: &str) -> anyhow::Result<Vec<Vec<f32>>> {
        let encoding = self
            .colbert_tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenize failed: {e}"))?;
        let ids = encoding.get_ids();
        let keep: Vec<usize> =
            (0..ids.len()).filter(|&i| !is_skipped(ids[i])).collect();
        if keep.is_empty() {
            return Ok(Vec::new());
        }

        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;
        let attention_mask = Tensor::ones(input_ids.shape(), DType::F32, &self.device)?;

        let hidden = self
            .colbert_model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        // hidden: [1, T, H] -> project to [1, T, 48]
        let projected = hidden.broadcast_matmul(&self.colbert_proj)?;
        let projected = projected.squeeze(0)?; // [T, 48]
        let normalized = l2_normalize_rows(&projected)?;

        let data = normalized.to_vec2::<f32>()?;
        Ok(keep.into_iter().map(|i| data[i].clone()).collect())
    }
}

fn l2_normalize_rows(t: &Tensor) -> candle_core::Result<Tensor> {
    let norm = t.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-9, f64::MAX)?;
    t.broadcast_div(&norm)
}

fn max_sim(query: &[Vec<f32>], doc: &[Vec<f32>]) -> f32 {
    if query.is_empty() || doc.is_empty() {
        return 0.0;
    }
    query
        .iter()
        .map(|q| {
            doc.iter()
                .map(|d| dot(q, d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .sum()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Mean-pool + L2-normalize a batch of texts through `model`, following this codebase's
/// existing candle embedding pipeline.
fn encode_batch(
    model: &BertModel,
    tokenizer: &Tokenizer,
    device: &Device,
    texts: &[String],
    dim: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow::anyhow!("tokenize batch failed: {e}"))?;

    let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
    let batch = encodings.len();

    let mut input_ids = vec![0u32; batch * max_len];
    let mut attention_mask = vec![0u8; batch * max_len];
    for (row, enc) in encodings.iter().enumerate() {
        for (col, &id) in enc.get_ids().iter().enumerate() {
            input_ids[row * max_len + col] = id;
            attention_mask[row * max_len + col] = 1;
        }
    }

    let input_ids = Tensor::from_vec(input_ids, (batch, max_len), device)?;
    let token_type_ids = input_ids.zeros_like()?;
    let mask_f32: Vec<f32> = attention_mask.iter().map(|&m| m as f32).collect();
    let attention_mask_f32 = Tensor::from_vec(mask_f32.clone(), (batch, max_len), device)?;

    let output = model.forward(&input_ids, &token_type_ids, Some(&attention_mask_f32))?;

    let mask = Tensor::from_vec(mask_f32, (batch, max_len), device)?.unsqueeze(2)?;
    let mask_expanded = mask.broadcast_as(output.shape())?;

    let summed = output.broadcast_mul(&mask_expanded)?.sum(1)?;
    let counts = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;
    let pooled = summed.broadcast_div(&counts)?;

    let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-9, f64::MAX)?;
    let normalized = pooled.broadcast_div(&norm)?;

    let flat: Vec<f32> = normalized.flatten_all()?.to_vec1()?;
    let mut vectors = Vec::with_capacity(batch);
    for row in 0..batch {
        vectors.push(flat[row * dim..(row + 1) * dim].to_vec());
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skiplist_matches_configured_ranges() {
        assert!(is_skipped(5));
        assert!(is_skipped(30));
        assert!(!is_skipped(20));
        assert!(!is_skipped(1));
    }

    #[test]
    fn skiplist_upper_bounds_are_inclusive() {
        assert!(is_skipped(16));
        assert!(is_skipped(33));
        assert!(is_skipped(60));
        assert!(is_skipped(65));
        assert!(is_skipped(92));
        assert!(is_skipped(95));
        assert!(!is_skipped(96));
        assert!(!is_skipped(17));
    }

    #[test]
    fn max_sim_of_identical_single_token_sets() {
        let v = vec![vec![1.0, 0.0, 0.0]];
        assert!((max_sim(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn max_sim_empty_is_zero() {
        assert_eq!(max_sim(&[], &[vec![1.0]]), 0.0);
    }
}
