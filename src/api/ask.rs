use axum::extract::{Query, State};
use axum::Json;
use chrono::Datelike;
use serde::Deserialize;

use crate::assistant::{self, Answer};
use crate::calendar::events_for_month;
use crate::error::AssistantError;
use crate::retrieve::{retrieve, RetrieveRequest, DEFAULT_TOP_K};
use crate::AppState;

use super::blocking;

#[derive(Deserialize)]
pub(super) struct AskRequest {
    #[serde(default)]
    query: String,
}

/// POST /ask: the full pipeline, for testing without LINE.
pub(super) async fn do_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AssistantError> {
    Ok(Json(assistant::ask(&state, &req.query).await?))
}

#[derive(Deserialize)]
pub(super) struct SearchQuery {
    q: Option<String>,
    limit: Option<usize>,
    category: Option<String>,
}

/// GET /search: keyword retrieval only, no model calls.
pub(super) async fn quick_search(
    State(state): State<AppState>,
    Query(sq): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, AssistantError> {
    let q = sq.q.unwrap_or_default();
    let mut req = RetrieveRequest::new(q.clone()).top_k(sq.limit.unwrap_or(DEFAULT_TOP_K));
    if let Some(c) = sq.category.filter(|c| !c.is_empty()) {
        req = req.category(c);
    }
    let db = state.db.clone();
    let results = blocking(move || retrieve(&db, &req, None)).await??;
    Ok(Json(serde_json::json!({
        "query": q,
        "count": results.len(),
        "results": results,
    })))
}

#[derive(Deserialize)]
pub(super) struct CalendarQuery {
    month: Option<u32>,
    year: Option<i32>,
}

/// GET /calendar: events of one month (default: this month).
pub(super) async fn month_calendar(
    State(state): State<AppState>,
    Query(cq): Query<CalendarQuery>,
) -> Result<Json<serde_json::Value>, AssistantError> {
    let month = cq.month.unwrap_or_else(|| chrono::Local::now().month());
    if !(1..=12).contains(&month) {
        return Err(AssistantError::Validation(format!("month must be 1-12, got {month}")));
    }
    let events = events_for_month(&state.calendar.events, cq.year, month);
    Ok(Json(serde_json::json!({
        "month": month,
        "year": cq.year,
        "count": events.len(),
        "events": events,
        "source_url": state.calendar.source_url,
    })))
}
