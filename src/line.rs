//! LINE Messaging API: webhook signature check, payload types and the reply call.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AssistantError;
use crate::util::truncate_chars;

pub const DEFAULT_API_BASE: &str = "https://api.line.me";
pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// LINE rejects text messages longer than this.
pub const MAX_TEXT_CHARS: usize = 5000;

const LINE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct LineConfig {
    pub channel_secret: String,
    pub access_token: String,
    pub api_base: String,
    pub client: reqwest::Client,
}

impl LineConfig {
    pub fn new(channel_secret: impl Into<String>, access_token: impl Into<String>, api_base: &str) -> Self {
        Self {
            channel_secret: channel_secret.into(),
            access_token: access_token.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Returns `None` unless both `LINE_CHANNEL_SECRET` and `LINE_CHANNEL_ACCESS_TOKEN` are set.
    pub fn from_env() -> Option<Self> {
        let secret = std::env::var("LINE_CHANNEL_SECRET").ok().filter(|s| !s.is_empty())?;
        let token = std::env::var("LINE_CHANNEL_ACCESS_TOKEN").ok().filter(|s| !s.is_empty())?;
        let api_base = std::env::var("LINE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        let client = match reqwest::Client::builder().timeout(LINE_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client, LINE disabled");
                return None;
            }
        };
        Some(Self { client, ..Self::new(secret, token, &api_base) })
    }
}

/// base64(HMAC-SHA256(channel secret, raw body)).
pub fn sign(secret: &str, body: &[u8]) -> Result<String, AssistantError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| AssistantError::Internal(format!("hmac key: {e}")))?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    sign(secret, body)
        .is_ok_and(|expected| expected.as_bytes().ct_eq(signature.trim().as_bytes()).into())
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl WebhookEvent {
    /// (reply token, text) for text-message events; everything else is ignored.
    pub fn text_message(&self) -> Option<(&str, &str)> {
        if self.kind != "message" {
            return None;
        }
        let msg = self.message.as_ref().filter(|m| m.kind == "text")?;
        Some((self.reply_token.as_deref()?, msg.text.as_deref()?))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage>,
}

#[derive(Serialize)]
struct TextMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

pub async fn reply_text(cfg: &LineConfig, reply_token: &str, text: &str) -> Result<(), AssistantError> {
    let text = if text.chars().count() > MAX_TEXT_CHARS {
        truncate_chars(text, MAX_TEXT_CHARS - 3)
    } else {
        text.to_string()
    };
    let req = ReplyRequest {
        reply_token,
        messages: vec![TextMessage { kind: "text", text }],
    };

    let resp = cfg
        .client
        .post(format!("{}/v2/bot/message/reply", cfg.api_base))
        .bearer_auth(&cfg.access_token)
        .json(&req)
        .send()
        .await
        .map_err(|e| AssistantError::Messaging(format!("reply request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(AssistantError::Messaging(format!("reply API returned {status}: {body}")));
    }
    debug!("reply sent");
    Ok(())
}
