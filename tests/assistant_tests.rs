use std::sync::Arc;

use campusbot::ai::AiConfig;
use campusbot::assistant::{ask, ask_on};
use campusbot::calendar::{CalendarEvent, SchoolCalendar};
use campusbot::db::KnowledgeDB;
use campusbot::error::AssistantError;
use campusbot::record::KnowledgeRecord;
use campusbot::AppState;
use chrono::NaiveDate;
use mockito::{Matcher, Server};
use serde_json::json;

fn rec(title: &str, content: &str, date: &str, url: &str) -> KnowledgeRecord {
    let mut r = KnowledgeRecord::new(title, content);
    r.date = date.into();
    r.url = url.into();
    r
}

fn seeded_state() -> AppState {
    let db = KnowledgeDB::open(":memory:").unwrap();
    db.replace_all(&[
        rec("合作社營業時間", "合作社販售泡麵、麵包與飲料。", "2025/09/01", "https://www.nihs.tp.edu.tw/coop"),
        rec("第一次段考日程", "第一次段考於十月舉行。", "2025/10/01", "https://www.nihs.tp.edu.tw/exam"),
    ])
    .unwrap();
    AppState::new(Arc::new(db))
}

/// Config pointing at the mock server, keyword-only retrieval.
fn llm_only(server: &Server) -> AiConfig {
    let mut cfg = AiConfig::for_base_url(&server.url(), "gemini-test");
    cfg.embed_url.clear();
    cfg
}

fn keyword_body(keywords: &[&str]) -> String {
    let args = json!({ "keywords": keywords }).to_string();
    json!({ "choices": [{ "message": { "tool_calls": [{ "function": { "arguments": args } }] } }] }).to_string()
}

fn answer_body(text: &str) -> String {
    json!({ "choices": [{ "message": { "content": text } }] }).to_string()
}

#[tokio::test]
async fn rules_answer_without_ai() {
    let state = seeded_state();
    let a = ask(&state, "學校地址在哪").await.unwrap();
    assert!(a.direct);
    assert!(a.text.contains("內湖路一段520號"));
    assert!(a.sources.is_empty());
}

#[tokio::test]
async fn blank_question_is_rejected() {
    let state = seeded_state();
    assert!(matches!(ask(&state, "  ").await, Err(AssistantError::EmptyQuery)));
}

#[tokio::test]
async fn open_question_without_ai_is_not_configured() {
    let state = seeded_state();
    assert!(matches!(
        ask(&state, "合作社有賣泡麵嗎").await,
        Err(AssistantError::AiNotConfigured)
    ));
}

#[tokio::test]
async fn full_pipeline_answers_with_sources() {
    let mut server = Server::new_async().await;
    let kw = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("search_keywords".into()))
        .with_status(200)
        .with_body(keyword_body(&["合作社", "泡麵"]))
        .create_async()
        .await;
    let answer = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("今天是 2025/9/15".into()),
            Matcher::Regex("標題：合作社營業時間".into()),
            Matcher::Regex("https://www.nihs.tp.edu.tw/coop".into()),
        ]))
        .with_status(200)
        .with_body(answer_body("合作社有賣泡麵喔！\n詳情：https://www.nihs.tp.edu.tw/coop"))
        .create_async()
        .await;

    let mut state = seeded_state();
    state.ai = Some(llm_only(&server));
    let a = ask_on(&state, "合作社有賣泡麵嗎", NaiveDate::from_ymd_opt(2025, 9, 15).unwrap())
        .await
        .unwrap();

    assert!(!a.direct);
    assert!(a.text.starts_with("合作社有賣泡麵喔"));
    assert_eq!(a.sources[0].title, "合作社營業時間");
    assert_eq!(a.sources[0].url, "https://www.nihs.tp.edu.tw/coop");
    kw.assert_async().await;
    answer.assert_async().await;
}

#[tokio::test]
async fn keyword_failure_falls_back_to_segmentation() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("search_keywords".into()))
        .with_status(500)
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("校園小幫手".into()))
        .with_status(200)
        .with_body(answer_body("段考在十月。"))
        .create_async()
        .await;

    let mut state = seeded_state();
    state.ai = Some(llm_only(&server));
    let a = ask(&state, "段考").await.unwrap();
    assert_eq!(a.text, "段考在十月。");
    assert_eq!(a.sources[0].title, "第一次段考日程");
}

#[tokio::test]
async fn answer_failure_propagates() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("search_keywords".into()))
        .with_status(200)
        .with_body(keyword_body(&["段考"]))
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("校園小幫手".into()))
        .with_status(503)
        .create_async()
        .await;

    let mut state = seeded_state();
    state.ai = Some(llm_only(&server));
    assert!(matches!(ask(&state, "段考").await, Err(AssistantError::AiBackend(_))));
}

#[tokio::test]
async fn date_question_gets_calendar_context() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("search_keywords".into()))
        .with_status(200)
        .with_body(keyword_body(&["開學"]))
        .create_async()
        .await;
    let answer = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("重點行事曆背景資料".into()),
            Matcher::Regex("2026/02/11：開學日".into()),
            Matcher::Regex("https://www.nihs.tp.edu.tw/114-2.pdf".into()),
        ]))
        .with_status(200)
        .with_body(answer_body("2/11 開學。"))
        .create_async()
        .await;

    let mut state = seeded_state();
    state.ai = Some(llm_only(&server));
    state.calendar = Arc::new(SchoolCalendar {
        events: vec![
            CalendarEvent { date: "2026/02/11".into(), event: "開學日".into(), category: String::new() },
            CalendarEvent { date: "2026/03/02".into(), event: "段考".into(), category: String::new() },
        ],
        source_url: "https://www.nihs.tp.edu.tw/114-2.pdf".into(),
    });
    let a = ask_on(&state, "2月開學是哪天", NaiveDate::from_ymd_opt(2025, 11, 15).unwrap())
        .await
        .unwrap();
    assert_eq!(a.text, "2/11 開學。");
    answer.assert_async().await;
}

#[tokio::test]
async fn query_embeddings_are_cached() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("search_keywords".into()))
        .with_status(200)
        .with_body(keyword_body(&["段考"]))
        .expect_at_least(1)
        .create_async()
        .await;
    server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::Regex("校園小幫手".into()))
        .with_status(200)
        .with_body(answer_body("十月。"))
        .expect_at_least(1)
        .create_async()
        .await;
    let embed = server
        .mock("POST", "/embeddings")
        .match_body(Matcher::PartialJson(json!({ "model": "embed-test" })))
        .with_status(200)
        .with_body(json!({ "data": [{ "embedding": [0.3, 0.7] }] }).to_string())
        .expect(1)
        .create_async()
        .await;

    let mut state = seeded_state();
    state.ai = Some(AiConfig::for_base_url(&server.url(), "gemini-test"));
    ask(&state, "段考什麼時候").await.unwrap();
    ask(&state, "段考什麼時候").await.unwrap();

    embed.assert_async().await;
    let stats = state.embed_cache.stats();
    assert_eq!((stats.size, stats.hits, stats.misses), (1, 1, 1));
}
