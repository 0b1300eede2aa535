//! Talks to OpenAI-compatible APIs for embeddings and LLM calls.
//! Gemini, OpenAI and local servers all speak this dialect.
//! All optional, see AiConfig::from_env().

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AssistantError;
use crate::prompt;

fn ai_err(msg: impl Into<String>) -> AssistantError {
    AssistantError::AiBackend(msg.into())
}

const AI_TIMEOUT: Duration = Duration::from_secs(30);

/// Temperature for user-facing answers: low so dates and URLs are copied, not invented.
pub const ANSWER_TEMPERATURE: f64 = 0.1;

#[derive(Clone)]
pub struct AiConfig {
    pub llm_url: String,
    pub llm_key: String,
    pub llm_model: String,
    pub embed_url: String,
    pub embed_key: String,
    pub embed_model: String,
    /// Prepended to queries before embedding (e5-style models expect "query: ").
    pub query_prefix: String,
    /// Prepended to record text before embedding.
    pub passage_prefix: String,
    pub client: reqwest::Client,
    // Per-component model overrides (fall back to llm_model if None)
    pub keyword_model: Option<String>,
    pub enrich_model: Option<String>,
    pub faq_model: Option<String>,
}

impl AiConfig {
    pub fn model_for(&self, component: &str) -> &str {
        let m = match component {
            "keyword" => self.keyword_model.as_deref(),
            "enrich" => self.enrich_model.as_deref(),
            "faq" => self.faq_model.as_deref(),
            _ => None,
        };
        m.unwrap_or(&self.llm_model)
    }

    /// Returns `None` if `CAMPUSBOT_LLM_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let llm_url = std::env::var("CAMPUSBOT_LLM_URL").ok()?;
        let llm_key = std::env::var("CAMPUSBOT_LLM_KEY").unwrap_or_default();
        let llm_model =
            std::env::var("CAMPUSBOT_LLM_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into());
        let embed_url = std::env::var("CAMPUSBOT_EMBED_URL").unwrap_or_default();
        let embed_key = std::env::var("CAMPUSBOT_EMBED_KEY").unwrap_or_else(|_| llm_key.clone());
        let embed_model = std::env::var("CAMPUSBOT_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-004".into());

        let client = match reqwest::Client::builder().timeout(AI_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client, AI disabled");
                return None;
            }
        };

        Some(Self {
            llm_url,
            llm_key,
            llm_model,
            embed_url,
            embed_key,
            embed_model,
            query_prefix: std::env::var("CAMPUSBOT_EMBED_QUERY_PREFIX")
                .unwrap_or_else(|_| "query: ".into()),
            passage_prefix: std::env::var("CAMPUSBOT_EMBED_PASSAGE_PREFIX")
                .unwrap_or_else(|_| "passage: ".into()),
            client,
            keyword_model: std::env::var("CAMPUSBOT_KEYWORD_MODEL").ok(),
            enrich_model: std::env::var("CAMPUSBOT_ENRICH_MODEL").ok(),
            faq_model: std::env::var("CAMPUSBOT_FAQ_MODEL").ok(),
        })
    }

    /// Config pointing both endpoints at `base` (an OpenAI-style root). Used by tests and tools.
    pub fn for_base_url(base: &str, model: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            llm_url: format!("{base}/chat/completions"),
            llm_key: String::new(),
            llm_model: model.to_string(),
            embed_url: format!("{base}/embeddings"),
            embed_key: String::new(),
            embed_model: "embed-test".into(),
            query_prefix: "query: ".into(),
            passage_prefix: "passage: ".into(),
            client: reqwest::Client::new(),
            keyword_model: None,
            enrich_model: None,
            faq_model: None,
        }
    }

    pub fn has_llm(&self) -> bool {
        !self.llm_url.is_empty()
    }

    pub fn has_embed(&self) -> bool {
        !self.embed_url.is_empty()
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    tool_type: String,
    function: FunctionDef,
}

#[derive(Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug)]
pub struct LlmResult {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
    pub duration_ms: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Deserialize)]
struct ToolCallFunction {
    arguments: String,
}

async fn post_chat(cfg: &AiConfig, req: &ChatRequest) -> Result<(ChatResponse, u64), AssistantError> {
    let mut builder = cfg.client.post(&cfg.llm_url).json(req);
    if !cfg.llm_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.llm_key));
    }

    let start = std::time::Instant::now();
    let resp = builder
        .send()
        .await
        .map_err(|e| ai_err(format!("LLM request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ai_err(format!("LLM returned {status}: {body}")));
    }

    let chat: ChatResponse = resp
        .json()
        .await
        .map_err(|e| ai_err(format!("LLM response parse failed: {e}")))?;
    Ok((chat, start.elapsed().as_millis() as u64))
}

/// Send a chat completion request using a component-specific model if configured.
/// An empty system prompt sends only the user message.
pub async fn llm_chat_as(
    cfg: &AiConfig,
    component: &str,
    system: &str,
    user: &str,
    temperature: f64,
) -> Result<LlmResult, AssistantError> {
    let model = cfg.model_for(component).to_string();
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(ChatMessage { role: "system".into(), content: system.into() });
    }
    messages.push(ChatMessage { role: "user".into(), content: user.into() });
    let req = ChatRequest { model: model.clone(), messages, temperature, tools: None, tool_choice: None };

    let (chat, duration_ms) = post_chat(cfg, &req).await?;
    let content = chat
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ai_err("LLM returned an empty answer"));
    }
    debug!(component, model = %model, duration_ms, "llm call");
    Ok(LlmResult { content, usage: chat.usage, model, duration_ms })
}

/// Call LLM with a function/tool definition, get back structured JSON.
/// Some OpenAI-compatible backends answer in plain content instead of a tool call;
/// that content is accepted when it parses.
pub async fn llm_tool_call<T: serde::de::DeserializeOwned>(
    cfg: &AiConfig,
    component: &str,
    system: &str,
    user: &str,
    fn_name: &str,
    fn_desc: &str,
    parameters: serde_json::Value,
) -> Result<T, AssistantError> {
    let model = cfg.model_for(component).to_string();
    let req = ChatRequest {
        model: model.clone(),
        messages: vec![
            ChatMessage { role: "system".into(), content: system.into() },
            ChatMessage { role: "user".into(), content: user.into() },
        ],
        temperature: ANSWER_TEMPERATURE,
        tools: Some(vec![ToolDef {
            tool_type: "function".into(),
            function: FunctionDef {
                name: fn_name.into(),
                description: fn_desc.into(),
                parameters,
            },
        }]),
        tool_choice: Some(serde_json::json!({"type": "function", "function": {"name": fn_name}})),
    };

    let (chat, duration_ms) = post_chat(cfg, &req).await?;
    let choice = chat.choices.first().ok_or_else(|| ai_err("no choices in response"))?;
    let args = choice
        .message
        .tool_calls
        .as_ref()
        .and_then(|tc| tc.first())
        .map(|tc| tc.function.arguments.clone())
        .or_else(|| choice.message.content.as_deref().map(strip_code_fence))
        .ok_or_else(|| ai_err("no tool call in response"))?;

    debug!(component, model = %model, duration_ms, "llm tool call");
    serde_json::from_str(&args)
        .map_err(|e| ai_err(format!("tool call arguments parse failed: {e}: {args}")))
}

/// Strip a markdown code fence (```json ... ```) the model may wrap JSON in.
pub fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // drop the info string ("json") up to the first newline
    let body = rest.split_once('\n').map_or(rest, |(_, b)| b);
    body.trim_end().trim_end_matches("```").trim().to_string()
}

/// Alternative search phrases for a parent's question, in the same language.
pub async fn generate_keywords(cfg: &AiConfig, query: &str) -> Result<Vec<String>, AssistantError> {
    #[derive(Deserialize)]
    struct KeywordResult {
        keywords: Vec<String>,
    }

    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "keywords": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Search keywords (3-6)"
            }
        },
        "required": ["keywords"]
    });

    let result: KeywordResult = llm_tool_call(
        cfg, "keyword", prompt::KEYWORD_SYSTEM_PROMPT, query,
        "search_keywords", "Keywords to search the school knowledge base with",
        schema,
    ).await?;

    Ok(result
        .keywords
        .into_iter()
        .map(|k| k.trim().trim_start_matches('#').to_string())
        .filter(|k| !k.is_empty())
        .take(6)
        .collect())
}

/// Tags and a one-line summary for one announcement.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Enrichment {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

pub async fn enrich_record(cfg: &AiConfig, title: &str, content: &str) -> Result<Enrichment, AssistantError> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "tags": {
                "type": "array",
                "items": { "type": "string" },
                "description": "3-5 keyword tags such as #高三 #升學"
            },
            "summary": {
                "type": "string",
                "description": "One sentence: audience and deadline"
            }
        },
        "required": ["tags", "summary"]
    });
    llm_tool_call(
        cfg, "enrich", prompt::ENRICH_SYSTEM_PROMPT, &prompt::enrich_user_prompt(title, content),
        "annotate_announcement", "Tag and summarize a school announcement",
        schema,
    )
    .await
}

/// Pull traffic and contact data out of scraped text.
pub async fn extract_faq(
    cfg: &AiConfig,
    traffic_text: &str,
    contact_text: &str,
) -> Result<crate::faq::Faq, AssistantError> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "traffic": {
                "type": "object",
                "properties": {
                    "address": {"type": "string"},
                    "mrt": {"type": "string"},
                    "bus": {"type": "string"}
                }
            },
            "contacts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "category": {"type": "string"},
                        "title": {"type": "string"},
                        "name": {"type": "string"},
                        "phone": {"type": "string"}
                    },
                    "required": ["title", "phone"]
                }
            }
        },
        "required": ["traffic", "contacts"]
    });
    llm_tool_call(
        cfg, "faq", prompt::FAQ_SYSTEM_PROMPT, &prompt::faq_user_prompt(traffic_text, contact_text),
        "school_faq", "Structured school traffic and contact information",
        schema,
    )
    .await
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// Generate embeddings for one or more texts.
pub async fn get_embeddings(cfg: &AiConfig, texts: &[String]) -> Result<Vec<Vec<f32>>, AssistantError> {
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let req = EmbedRequest {
        model: cfg.embed_model.clone(),
        input: texts.to_vec(),
    };

    let mut builder = cfg.client.post(&cfg.embed_url).json(&req);
    if !cfg.embed_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.embed_key));
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| ai_err(format!("embedding request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ai_err(format!("embedding API returned {status}: {body}")));
    }

    let embed_resp: EmbedResponse = resp
        .json()
        .await
        .map_err(|e| ai_err(format!("embedding response parse failed: {e}")))?;

    let embeddings: Vec<Vec<f32>> = embed_resp.data.into_iter().map(|d| d.embedding).collect();
    if embeddings.len() != texts.len() {
        return Err(ai_err(format!(
            "embedding count mismatch: sent {} texts, got {} embeddings",
            texts.len(),
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Serialize an f32 vector to bytes (little-endian) for SQLite BLOB storage.
pub fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for &f in v {
        buf.extend_from_slice(&f.to_le_bytes());
    }
    buf
}

pub fn bytes_to_embedding(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
