//! One question in, one answer out: rules, retrieval, prompt, LLM.

use chrono::NaiveDate;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::ai::{self, AiConfig};
use crate::calendar::is_date_question;
use crate::error::AssistantError;
use crate::faq::check_rules;
use crate::prompt;
use crate::retrieve::{retrieve, RetrieveRequest};
use crate::{db_call, AppState};

/// What a parent sees when anything behind the answer fails.
pub const APOLOGY: &str = "小幫手忙碌中，請稍後再試。";

/// Records handed to the model per question.
pub const CONTEXT_RECORDS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub date: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    #[serde(rename = "answer")]
    pub text: String,
    pub sources: Vec<Source>,
    /// Answered by the FAQ rules without the model.
    pub direct: bool,
}

pub async fn ask(state: &AppState, query: &str) -> Result<Answer, AssistantError> {
    ask_on(state, query, chrono::Local::now().date_naive()).await
}

/// [`ask`] with a fixed "today", which the prompt and month detection use.
pub async fn ask_on(state: &AppState, query: &str, today: NaiveDate) -> Result<Answer, AssistantError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AssistantError::EmptyQuery);
    }
    let start = Instant::now();

    if let Some(text) = check_rules(&state.faq, query) {
        info!(direct = true, "answered by rules");
        return Ok(Answer { text, sources: vec![], direct: true });
    }

    let cfg = state
        .ai
        .as_ref()
        .filter(|c| c.has_llm())
        .ok_or(AssistantError::AiNotConfigured)?;

    let keywords = search_keywords(cfg, query).await;
    debug!(?keywords, "search keywords");
    let query_emb = query_embedding(state, cfg, query).await;

    let req = RetrieveRequest::new(query).keywords(keywords).top_k(CONTEXT_RECORDS);
    let hits = db_call(&state.db, move |db| retrieve(db, &req, query_emb.as_deref())).await??;
    let records: Vec<_> = hits.iter().map(|h| h.record.clone()).collect();

    let mut context = String::new();
    if is_date_question(query) {
        if let Some((block, month)) = state.calendar.month_block(query, today) {
            debug!(month, "calendar context");
            let url = if state.calendar.source_url.is_empty() {
                prompt::SCHOOL_HOME
            } else {
                state.calendar.source_url.as_str()
            };
            context.push_str(&prompt::calendar_section(&block, url));
        }
    }
    context.push_str(&prompt::context_text(&records));

    let answer = ai::llm_chat_as(
        cfg,
        "answer",
        "",
        &prompt::answer_prompt(query, &context, today),
        ai::ANSWER_TEMPERATURE,
    )
    .await?;

    let sources = hits
        .iter()
        .map(|h| Source {
            id: h.record.id,
            title: h.record.record.title.clone(),
            url: h.record.record.url.clone(),
            date: h.record.record.date.clone(),
            score: h.score,
        })
        .collect::<Vec<_>>();
    info!(
        direct = false,
        sources = sources.len(),
        model = %answer.model,
        ms = start.elapsed().as_millis() as u64,
        "answered"
    );
    Ok(Answer { text: answer.content.trim().to_string(), sources, direct: false })
}

/// Model-generated search phrases, or the query's own segments when the model fails.
async fn search_keywords(cfg: &AiConfig, query: &str) -> Vec<String> {
    match ai::generate_keywords(cfg, query).await {
        Ok(k) if !k.is_empty() => k,
        Ok(_) => crate::db::query_terms(query),
        Err(e) => {
            warn!(error = %e, "keyword generation failed, using segmentation");
            crate::db::query_terms(query)
        }
    }
}

/// Cached query embedding. `None` (keyword-only retrieval) when embeddings are
/// off or the call fails.
async fn query_embedding(state: &AppState, cfg: &AiConfig, query: &str) -> Option<Vec<f32>> {
    if !cfg.has_embed() {
        return None;
    }
    let key = format!("{}{}", cfg.query_prefix, query);
    if let Some(v) = state.embed_cache.get(&key) {
        return Some(v);
    }
    match ai::get_embeddings(cfg, std::slice::from_ref(&key)).await {
        Ok(mut v) if !v.is_empty() => {
            let emb = v.swap_remove(0);
            state.embed_cache.insert(key, emb.clone());
            Some(emb)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "query embedding failed, keyword-only retrieval");
            None
        }
    }
}
