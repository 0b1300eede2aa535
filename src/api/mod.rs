use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::AssistantError;
use crate::AppState;

mod ask;
mod webhook;

use ask::*;
use webhook::*;

/// Run a blocking closure on the spawn_blocking pool and map JoinError.
async fn blocking<T, F>(f: F) -> Result<T, AssistantError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AssistantError::Internal(e.to_string()))
}

/// Auth middleware: checks Bearer token if CAMPUSBOT_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AssistantError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AssistantError::Unauthorized)?;

    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(AssistantError::Unauthorized)
    }
}

pub fn router(state: AppState) -> Router {
    // the webhook authenticates by signature, not by API key
    let public = Router::new()
        .route("/", get(index))
        .route("/health", get(health_only))
        .route("/callback", post(callback));

    let protected = Router::new()
        .route("/ask", post(do_ask))
        .route("/search", get(quick_search))
        .route("/calendar", get(month_calendar))
        .route("/stats", get(stats))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

/// Shared health data (without endpoints) used by both `/` and `/health`.
async fn health_data(state: &AppState) -> serde_json::Value {
    let db = state.db.clone();
    let s = blocking(move || db.stats()).await.unwrap_or_default();

    serde_json::json!({
        "name": "campusbot",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "records": s.total,
        "embedded": s.embedded,
        "ai_enabled": state.ai.as_ref().is_some_and(|c| c.has_llm()),
        "embed_enabled": state.ai.as_ref().is_some_and(|c| c.has_embed()),
        "line_enabled": state.line.is_some(),
        "calendar_events": state.calendar.events.len(),
        "faq_contacts": state.faq.contacts.len(),
        "embed_cache": state.embed_cache.stats(),
    })
}

/// GET /: health data + endpoint list.
async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut data = health_data(&state).await;
    if let Some(obj) = data.as_object_mut() {
        obj.insert("endpoints".to_string(), serde_json::json!({
            "GET /": "index with health data + endpoint list",
            "GET /health": "health only",
            "POST /callback": "LINE webhook (X-Line-Signature required)",
            "POST /ask": "answer a question ({query})",
            "GET /search?q=term&limit=N": "scored records without the LLM",
            "GET /calendar?month=N": "calendar events of a month",
            "GET /stats": "record counts per category",
        }));
    }
    Json(data)
}

/// GET /health: health data only (no endpoint list).
async fn health_only(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(health_data(&state).await)
}

async fn stats(State(state): State<AppState>) -> Result<Json<crate::db::Stats>, AssistantError> {
    let db = state.db.clone();
    Ok(Json(blocking(move || db.stats()).await?))
}
