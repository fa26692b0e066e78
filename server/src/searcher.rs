//! Candidate fan-out (dense + lexical) → RRF fusion → reranking → heuristic boosts.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use osgrep_core::error::Result;
use osgrep_store::Store;

use crate::worker_client::WorkerClient;

const FAN_OUT_K: usize = 200;
const RRF_K: f32 = 20.0;
const RERANK_HEAD: usize = 50;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub num_lines: u32,
    pub text: String,
    pub score: f32,
    pub is_anchor: bool,
}

struct FusedRow {
    path: String,
    start_line: u32,
    end_line: u32,
    content: String,
    context_prev: String,
    context_next: String,
    is_anchor: bool,
    rrf_score: f32,
}

pub struct Searcher {
    worker: Arc<WorkerClient>,
}

impl Searcher {
    pub fn new(worker: Arc<WorkerClient>) -> Self {
        Self { worker }
    }

    pub fn search(
        &self,
        store: &Store,
        query: &str,
        limit: usize,
        where_expr: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if store.count_rows() == 0 {
            return Ok(Vec::new());
        }

        let q_vec = self.worker.encode_query(query)?;

        let vector_hits = store.vector_search(&q_vec, FAN_OUT_K, where_expr)?;
        let fts_hits = store.fts_search(query, FAN_OUT_K, where_expr)?;

        let mut fused: HashMap<(String, u32), FusedRow> = HashMap::new();
        apply_rrf(&mut fused, vector_hits.into_iter().map(|h| h.row).collect());
        apply_rrf(&mut fused, fts_hits.into_iter().map(|h| h.row).collect());

        let mut candidates: Vec<FusedRow> = fused.into_values().collect();
        candidates.sort_by(|a, b| b.rrf_score.partial_cmp(&a.rrf_score).unwrap_or(std::cmp::Ordering::Equal));

        let max_rrf = candidates.first().map(|c| c.rrf_score).unwrap_or(1.0).max(f32::EPSILON);
        let head_len = candidates.len().min(RERANK_HEAD);

        let w_r = if looks_code_like(query) { 0.55 } else { 0.60 };

        let rerank_scores: Option<Vec<f32>> = if head_len > 0 {
            let docs: Vec<String> = candidates[..head_len].iter().map(|c| c.content.clone()).collect();
            match self.worker.rerank(query, docs) {
                Ok(scores) => Some(scores),
                Err(e) => {
                    warn!(error = %e, "rerank failed, falling back to pure RRF ordering");
                    None
                }
            }
        } else {
            None
        };

        let query_lower = query.to_lowercase();
        let query_tokens: Vec<String> = tokenize(&query_lower);

        let mut scored: Vec<(f32, FusedRow)> = Vec::with_capacity(candidates.len());
        for (i, row) in candidates.into_iter().enumerate() {
            let rrf_norm = row.rrf_score / max_rrf;
            let mut score = match &rerank_scores {
                Some(scores) if i < scores.len() => w_r * scores[i] + (1.0 - w_r) * rrf_norm,
                _ => rrf_norm,
            };

            score += heuristic_boosts(&row, &query_lower, &query_tokens);
            scored.push((score, row));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, row)| SearchHit {
                path: row.path.clone(),
                start_line: row.start_line,
                num_lines: row.end_line.saturating_sub(row.start_line) + 1,
                text: format!("{}{}{}", row.context_prev, row.content, row.context_next),
                score,
                is_anchor: row.is_anchor,
            })
            .collect())
    }
}

fn apply_rrf(fused: &mut HashMap<(String, u32), FusedRow>, rows: Vec<osgrep_store::row::StoredRow>) {
    for (rank, row) in rows.into_iter().enumerate() {
        let key = (row.path.clone(), row.start_line);
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        fused
            .entry(key)
            .and_modify(|f| f.rrf_score += contribution)
            .or_insert(FusedRow {
                path: row.path,
                start_line: row.start_line,
                end_line: row.end_line,
                content: row.content,
                context_prev: row.context_prev,
                context_next: row.context_next,
                is_anchor: row.is_anchor,
                rrf_score: contribution,
            });
    }
}

fn looks_code_like(query: &str) -> bool {
    query.chars().any(|c| c.is_ascii_uppercase() || c == '_')
        || query.contains('`')
        || query.contains('(')
        || query.contains('/')
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_string)
        .collect()
}

fn heuristic_boosts(row: &FusedRow, query_lower: &str, query_tokens: &[String]) -> f32 {
    let mut boost = 0.0;
    let content_lower = row.content.to_lowercase();

    if query_lower.len() >= 3 && content_lower.contains(query_lower) {
        boost += 0.25;
    }
    if row.is_anchor {
        boost += 0.12;
    }

    let path_lower = row.path.to_lowercase();
    if query_tokens.iter().any(|t| path_lower.contains(t.as_str())) {
        boost += 0.05;
    }

    let content_tokens: std::collections::HashSet<String> = tokenize(&content_lower).into_iter().collect();
    let overlap = query_tokens.iter().filter(|t| content_tokens.contains(*t)).count();
    boost += (overlap as f32 * 0.02).min(0.08);

    boost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_like_detection() {
        assert!(looks_code_like("fn process_batch()"));
        assert!(looks_code_like("SomeConst"));
        assert!(!looks_code_like("how do i sort a list"));
    }

    #[test]
    fn tokenize_drops_short_tokens() {
        let tokens = tokenize("fn to x encode_batch");
        assert_eq!(tokens, vec!["encode_batch".to_string()]);
    }
}
