//! Keyword search: FTS5 with jieba segmentation, plus a plain containment scan.

use rusqlite::params;

use super::*;

/// Weights for the containment scan. A title hit says far more than a body hit.
const TITLE_HIT: f64 = 3.0;
const META_HIT: f64 = 2.0;
const BODY_HIT: f64 = 1.0;

impl KnowledgeDB {
    /// Full-text search using FTS5. Returns `(id, score)` pairs, higher is better.
    /// With `category` only that category's records compete for the `limit` slots.
    pub fn search_fts(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>, AssistantError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(vec![]);
        }
        let fts_query = terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, bm25(records_fts, 0.0, 3.0, 1.0) AS s FROM records_fts \
             WHERE records_fts MATCH ?1 \
             AND (?3 IS NULL OR id IN (SELECT id FROM records WHERE category = ?3)) \
             ORDER BY s LIMIT ?2",
        )?;
        let hits = stmt
            .query_map(params![fts_query, limit as i64, category], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .filter_map(|r| r.map_err(|e| tracing::warn!("row parse: {e}")).ok())
            .map(|(id, rank)| (id, -rank))
            .collect();
        Ok(hits)
    }

    /// Linear containment scan over the snapshot. Each term scores once per field it appears in.
    pub fn search_substring(&self, terms: &[String], category: Option<&str>, limit: usize) -> Vec<(i64, f64)> {
        let terms: Vec<String> = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty() && !is_stopword(t))
            .collect();
        if terms.is_empty() {
            return vec![];
        }
        let snap = read_lock(&self.snapshot, "snapshot");

        let mut scored: Vec<(i64, f64)> = snap
            .iter()
            .filter(|sr| category.is_none_or(|c| sr.record.category == c))
            .filter_map(|sr| {
                let r = &sr.record;
                let title = r.title.to_lowercase();
                let meta = format!(
                    "{} {} {}",
                    r.unit,
                    r.category,
                    r.tags.as_ref().map(|t| t.join(" ")).unwrap_or_default()
                )
                .to_lowercase();
                let body = r.search_text().to_lowercase();
                let score: f64 = terms
                    .iter()
                    .map(|t| {
                        let mut s = 0.0;
                        if title.contains(t.as_str()) {
                            s += TITLE_HIT;
                        }
                        if meta.contains(t.as_str()) {
                            s += META_HIT;
                        }
                        if body.contains(t.as_str()) {
                            s += BODY_HIT;
                        }
                        s
                    })
                    .sum();
                (score > 0.0).then_some((sr.id, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

/// Sanitize, segment and drop stopwords. Lowercased so FTS operators can't sneak in.
pub fn query_terms(query: &str) -> Vec<String> {
    let spaced = space_boundaries(query);
    if spaced.is_empty() {
        return vec![];
    }
    let mut terms: Vec<String> = Vec::new();
    let mut push = |t: String| {
        if !is_stopword(&t) && !terms.contains(&t) {
            terms.push(t);
        }
    };
    for w in spaced.split_whitespace() {
        push(w.to_lowercase());
    }
    for w in segment(&spaced) {
        push(w.to_lowercase());
    }
    terms
}

/// Function words and question fillers that match nearly every record.
pub fn is_stopword(word: &str) -> bool {
    matches!(word,
        "的" | "了" | "是" | "在" | "有" | "和" | "就" | "都" | "而" | "及" |
        "與" | "这" | "這" | "那" | "你" | "我" | "他" | "她" | "它" | "們" |
        "着" | "著" | "過" | "到" | "對" | "也" | "不" | "會" | "被" | "把" |
        "讓" | "給" | "用" | "從" | "很" | "但" | "還" | "又" | "或" | "已" |
        "要" | "該" | "為" | "其" | "所" | "只" | "之" | "中" | "上" | "下" |
        "個" | "麼" | "嗎" | "呢" | "吧" | "啊" | "喔" | "請" | "請問" |
        "什麼" | "怎麼" | "如何" | "哪裡" | "哪" | "誰" | "有沒有" | "可以" |
        "想" | "想問" | "知道" | "學校" | "一下" |
        "the" | "a" | "an" | "is" | "are" | "was" | "were" | "be" | "been" |
        "and" | "or" | "but" | "in" | "on" | "at" | "to" | "for" | "of" |
        "it" | "as" | "if" | "no" | "not" | "so" | "this" | "that"
    )
}

#[cfg(test)]
#[path = "fts_tests.rs"]
mod tests;
