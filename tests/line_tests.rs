use campusbot::error::AssistantError;
use campusbot::line::{reply_text, sign, verify_signature, LineConfig, MAX_TEXT_CHARS};
use mockito::Matcher;
use serde_json::json;

#[test]
fn signature_is_base64_of_a_sha256_mac() {
    let body = br#"{"events":[]}"#;
    let sig = sign("secret", body).unwrap();
    assert_eq!(sig.len(), 44);
    assert!(verify_signature("secret", body, &sig));
    assert!(verify_signature("secret", body, &format!(" {sig} ")));
}

#[test]
fn tampered_body_or_garbage_signature_fails() {
    let sig = sign("secret", b"hello").unwrap();
    assert!(!verify_signature("secret", b"hello!", &sig));
    assert!(!verify_signature("secret", b"hello", "not-base64"));
    assert!(!verify_signature("secret", b"hello", ""));
}

#[tokio::test]
async fn reply_posts_text_message_with_token() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/v2/bot/message/reply")
        .match_header("authorization", "Bearer line-token")
        .match_body(Matcher::Json(json!({
            "replyToken": "r-123",
            "messages": [{ "type": "text", "text": "開學日是 2/11" }]
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let cfg = LineConfig::new("secret", "line-token", &format!("{}/", server.url()));
    reply_text(&cfg, "r-123", "開學日是 2/11").await.unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn long_replies_are_truncated() {
    let mut server = mockito::Server::new_async().await;
    let expected = format!("{}...", "長".repeat(MAX_TEXT_CHARS - 3));
    let m = server
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::Regex(format!("\"text\":\"{expected}\"")))
        .with_status(200)
        .create_async()
        .await;

    let cfg = LineConfig::new("secret", "t", &server.url());
    reply_text(&cfg, "r", &"長".repeat(MAX_TEXT_CHARS + 10)).await.unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn reply_failure_is_messaging_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v2/bot/message/reply")
        .with_status(400)
        .with_body(r#"{"message":"Invalid reply token"}"#)
        .create_async()
        .await;

    let cfg = LineConfig::new("secret", "t", &server.url());
    let err = reply_text(&cfg, "expired", "hi").await.unwrap_err();
    match err {
        AssistantError::Messaging(msg) => assert!(msg.contains("Invalid reply token")),
        other => panic!("unexpected error: {other:?}"),
    }
}
