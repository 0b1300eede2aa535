//! Hybrid retrieval: keyword (FTS + containment) and optional semantic scoring.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::db::{KnowledgeDB, StoredRecord};
use crate::error::AssistantError;

// with an embedding available, meaning beats exact wording
const WEIGHT_SEMANTIC: f64 = 0.6;
const WEIGHT_KEYWORD: f64 = 0.4;

pub const DEFAULT_TOP_K: usize = 3;
pub const MAX_TOP_K: usize = 20;

/// Candidates pulled from each source before merging.
const CANDIDATES: usize = 50;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct RetrieveRequest {
    #[serde(default)]
    pub query: String,
    /// Extra search terms (LLM keywords or segmentation).
    #[serde(default)]
    pub keywords: Vec<String>,
    pub top_k: Option<usize>,
    /// Restrict to one category (e.g. "學務處", "校園靜態資訊").
    pub category: Option<String>,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }

    pub fn keywords(mut self, k: Vec<String>) -> Self {
        self.keywords = k;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn category(mut self, c: impl Into<String>) -> Self {
        self.category = Some(c.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: StoredRecord,
    pub score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
}

/// Scale scores into 0..=1 by the best hit.
fn normalize(hits: Vec<(i64, f64)>) -> HashMap<i64, f64> {
    let max = hits.iter().map(|h| h.1).fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return HashMap::new();
    }
    hits.into_iter().map(|(id, s)| (id, (s / max).clamp(0.0, 1.0))).collect()
}

fn merge_max(into: &mut HashMap<i64, f64>, from: HashMap<i64, f64>) {
    for (id, s) in from {
        let e = into.entry(id).or_insert(0.0);
        if s > *e {
            *e = s;
        }
    }
}

/// Top-k records for a query.
///
/// Keyword relevance is the best normalised FTS or containment score over the
/// query and its keywords. With `query_emb` the result blends in cosine
/// similarity for every record that has a vector; records without one, and all
/// records when there is no `query_emb`, score on keyword relevance alone.
/// The category filter applies inside each source, before candidates are cut.
pub fn retrieve(
    db: &KnowledgeDB,
    req: &RetrieveRequest,
    query_emb: Option<&[f32]>,
) -> Result<Vec<ScoredRecord>, AssistantError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(AssistantError::EmptyQuery);
    }
    let top_k = req.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K);

    let mut phrases: Vec<String> = vec![query.to_string()];
    for k in &req.keywords {
        let k = k.trim();
        if !k.is_empty() && !phrases.iter().any(|p| p == k) {
            phrases.push(k.to_string());
        }
    }

    let category = req.category.as_deref();
    let mut keyword: HashMap<i64, f64> = HashMap::new();
    merge_max(&mut keyword, normalize(db.search_fts(&phrases.join(" "), category, CANDIDATES)?));
    let mut terms = crate::db::query_terms(query);
    terms.extend(req.keywords.iter().cloned());
    merge_max(&mut keyword, normalize(db.search_substring(&terms, category, CANDIDATES)));

    let semantic: HashMap<i64, f64> = query_emb
        .map(|emb| db.search_semantic(emb, category, CANDIDATES).into_iter().collect())
        .unwrap_or_default();
    let hybrid = !semantic.is_empty();

    let mut ids: Vec<i64> = keyword.keys().chain(semantic.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut scored: Vec<ScoredRecord> = ids
        .into_iter()
        .filter_map(|id| {
            let record = db.get(id)?;
            let kw = keyword.get(&id).copied().unwrap_or(0.0);
            let sem = semantic.get(&id).copied().unwrap_or(0.0);
            // records still waiting for a vector are ranked on keywords alone
            let score = if hybrid && db.has_embedding(id) {
                WEIGHT_SEMANTIC * sem + WEIGHT_KEYWORD * kw
            } else {
                kw
            };
            Some(ScoredRecord { record, score, keyword_score: kw, semantic_score: sem })
        })
        .filter(|s| s.score > 0.0)
        .collect();

    // equal scores: newer announcement first
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.record.date.cmp(&a.record.record.date))
    });
    scored.truncate(top_k);

    debug!(query, hybrid, hits = scored.len(), "retrieved");
    Ok(scored)
}
