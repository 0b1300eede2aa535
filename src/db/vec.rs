//! Vector index and semantic search.
//!
//! Embeddings are keyed by the fingerprint of the embedded text and the model
//! name, so a file-backed store survives restarts without re-embedding.

use rusqlite::params;
use std::collections::HashSet;

use super::*;

impl KnowledgeDB {
    /// Load cached embeddings for the current record set into the index.
    pub fn load_vec_index(&self, model: &str) -> Result<usize, AssistantError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, e.vector FROM records r \
             JOIN embeddings e ON e.fingerprint = r.fingerprint AND e.model = ?1",
        )?;
        let pairs: Vec<(i64, Vec<f32>)> = stmt
            .query_map(params![model], |row| {
                let blob: Vec<u8> = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, crate::ai::bytes_to_embedding(&blob)))
            })?
            .filter_map(|r| r.map_err(|e| tracing::warn!("row parse: {e}")).ok())
            .collect();

        let count = pairs.len();
        let mut idx = write_lock(&self.vec_index, "vec_index");
        idx.clear();
        idx.extend(pairs);
        drop(idx);
        tracing::debug!(count, model, "loaded vector index");
        Ok(count)
    }

    /// Store an embedding for a record and index it.
    pub fn set_embedding(&self, id: i64, model: &str, embedding: &[f32]) -> Result<(), AssistantError> {
        let conn = self.conn()?;
        let fp: String = conn
            .query_row("SELECT fingerprint FROM records WHERE id = ?1", params![id], |r| r.get(0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AssistantError::NotFound,
                other => other.into(),
            })?;
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (fingerprint, model, vector) VALUES (?1, ?2, ?3)",
            params![fp, model, crate::ai::embedding_to_bytes(embedding)],
        )?;
        write_lock(&self.vec_index, "vec_index").insert(id, embedding.to_vec());
        Ok(())
    }

    /// Records not yet in the index, as `(id, semantic_text)`.
    pub fn missing_embeddings(&self) -> Vec<(i64, String)> {
        let idx = read_lock(&self.vec_index, "vec_index");
        self.all()
            .into_iter()
            .filter(|r| !idx.contains_key(&r.id))
            .map(|r| (r.id, r.record.semantic_text()))
            .collect()
    }

    pub fn has_embedding(&self, id: i64) -> bool {
        read_lock(&self.vec_index, "vec_index").contains_key(&id)
    }

    /// Brute-force cosine similarity. Fine for the few thousand records a school site has.
    pub fn search_semantic(&self, query_emb: &[f32], category: Option<&str>, limit: usize) -> Vec<(i64, f64)> {
        let allowed: Option<HashSet<i64>> = category.map(|c| {
            self.all()
                .into_iter()
                .filter(|r| r.record.category == c)
                .map(|r| r.id)
                .collect()
        });
        let idx = read_lock(&self.vec_index, "vec_index");
        let mut scored: Vec<(i64, f64)> = idx
            .iter()
            .filter(|(id, _)| allowed.as_ref().is_none_or(|a| a.contains(*id)))
            .map(|(id, emb)| (*id, crate::ai::cosine_similarity(query_emb, emb)))
            .filter(|(_, sim)| *sim > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
#[path = "vec_tests.rs"]
mod tests;
