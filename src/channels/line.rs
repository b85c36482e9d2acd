//! LINE Messaging API plumbing: webhook signature verification, event
//! payload types, and the reply/content REST client.

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

const REPLY_URL: &str = "https://api.line.me/v2/bot/message/reply";
const CONTENT_URL: &str = "https://api-data.line.me/v2/bot/message";

/// Verify the `X-Line-Signature` header: base64(HMAC-SHA256(secret, body)).
/// Comparison happens inside `verify_slice`, which is constant-time.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(decoded) = BASE64.decode(signature) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&decoded).is_ok()
}

// ── Webhook payload types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub reply_token: Option<String>,
    pub source: Option<EventSource>,
    pub message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub text: Option<String>,
}

// ── REST client ──────────────────────────────────────────────────

/// Thin client for the LINE reply and content-download endpoints.
pub struct LineClient {
    access_token: String,
    http: Client,
}

impl LineClient {
    pub fn new(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Send one text reply for the given reply token.
    pub async fn reply_text(&self, reply_token: &str, text: &str) -> Result<()> {
        let response = self
            .http
            .post(REPLY_URL)
            .bearer_auth(&self.access_token)
            .json(&json!({
                "replyToken": reply_token,
                "messages": [{"type": "text", "text": text}],
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE reply failed ({status}): {body}");
        }
        Ok(())
    }

    /// Download a message attachment (image bytes) and report its media
    /// type.
    pub async fn message_content(&self, message_id: &str) -> Result<(String, Vec<u8>)> {
        let response = self
            .http
            .get(format!("{CONTENT_URL}/{message_id}/content"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("LINE content download failed ({})", response.status());
        }
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        Ok((media_type, bytes))
    }
}
