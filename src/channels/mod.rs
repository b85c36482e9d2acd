//! Webhook gateway: axum server receiving LINE callbacks and dispatching
//! them to the agent.
//!
//! The webhook handler always answers 200 once the signature checks out;
//! per-event failures are logged and answered with a canned reply where a
//! reply token is still usable, because a non-2xx response makes the
//! platform redeliver the whole batch.

pub mod line;

pub use line::{LineClient, WebhookEvent, WebhookPayload};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;

const EVENT_ERROR_REPLY: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
    pub line: Arc<LineClient>,
    pub channel_secret: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/callback", post(handle_callback))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Bind and serve until the cancellation token fires.
pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "webhook gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn handle_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !line::verify_signature(&state.channel_secret, &body, signature) {
        warn!("webhook rejected: invalid signature");
        return (StatusCode::BAD_REQUEST, "invalid signature").into_response();
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "webhook rejected: malformed payload");
            return (StatusCode::BAD_REQUEST, "malformed payload").into_response();
        }
    };

    for event in payload.events {
        process_event(&state, event).await;
    }
    (StatusCode::OK, "OK").into_response()
}

/// Handle a single webhook event. Never propagates an error: the worst
/// outcome for the chat user is a canned apology.
async fn process_event(state: &AppState, event: WebhookEvent) {
    if event.kind != "message" {
        debug!(kind = %event.kind, "ignoring non-message event");
        return;
    }
    let Some(user_id) = event.source.and_then(|source| source.user_id) else {
        debug!("ignoring message event without a user id");
        return;
    };
    let (Some(reply_token), Some(message)) = (event.reply_token, event.message) else {
        return;
    };

    let reply = match message.kind.as_str() {
        "text" => {
            let text = message.text.unwrap_or_default();
            state.agent.handle_text(&user_id, &text).await
        }
        "image" => match state.line.message_content(&message.id).await {
            Ok((media_type, bytes)) => {
                let data = BASE64.encode(&bytes);
                state.agent.handle_image(&user_id, &media_type, &data).await
            }
            Err(err) => {
                warn!(%user_id, error = %err, "failed to download image content");
                EVENT_ERROR_REPLY.to_string()
            }
        },
        other => {
            debug!(%user_id, kind = other, "ignoring unsupported message type");
            return;
        }
    };

    if let Err(err) = state.line.reply_text(&reply_token, &reply).await {
        warn!(%user_id, error = %err, "failed to send reply");
    }
}
