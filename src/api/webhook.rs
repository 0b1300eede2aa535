use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use tracing::{info, warn};

use crate::assistant::{self, APOLOGY};
use crate::error::AssistantError;
use crate::line::{self, WebhookBody, SIGNATURE_HEADER};
use crate::AppState;

/// POST /callback: LINE webhook.
///
/// Every text message gets exactly one reply. Whatever goes wrong while
/// answering, the parent sees the apology and the failure goes to the log.
pub(super) async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, AssistantError> {
    let cfg = state.line.as_ref().ok_or(AssistantError::MessagingNotConfigured)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AssistantError::InvalidSignature)?;
    if !line::verify_signature(&cfg.channel_secret, &body, signature) {
        warn!("webhook signature mismatch");
        return Err(AssistantError::InvalidSignature);
    }

    let payload: WebhookBody = serde_json::from_slice(&body)
        .map_err(|e| AssistantError::Validation(format!("webhook body: {e}")))?;

    for event in &payload.events {
        let Some((reply_token, text)) = event.text_message() else { continue };
        info!(chars = text.chars().count(), "message received");
        let reply = match assistant::ask(&state, text).await {
            Ok(answer) => answer.text,
            Err(e) => {
                warn!(error = %e, "answer failed, replying with apology");
                APOLOGY.to_string()
            }
        };
        if let Err(e) = line::reply_text(cfg, reply_token, &reply).await {
            warn!(error = %e, "reply failed");
        }
    }
    Ok("OK")
}
