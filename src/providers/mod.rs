//! Completion provider subsystem.
//!
//! The [`CompletionProvider`] trait is the boundary the rest of the bot
//! sees; [`GeminiProvider`] is the shipped implementation. Provider error
//! strings pass through [`sanitize_api_error`] so credentials never leak
//! into logs.

pub mod gemini;
pub mod traits;

pub use gemini::GeminiProvider;
pub use traits::{CompletionProvider, CompletionRequest, CompletionResponse, ToolCallRequest};

use std::sync::Arc;

use crate::config::Config;

const MAX_API_ERROR_CHARS: usize = 200;

/// Create the completion provider from config.
pub fn create_provider(config: &Config) -> Arc<dyn CompletionProvider> {
    Arc::new(GeminiProvider::new(
        &config.gemini.api_base,
        config.gemini.api_key.as_deref().unwrap_or(""),
        config.gemini.max_output_tokens,
    ))
}

/// Scrub key-like query fragments and truncate provider error text before
/// it reaches the logs.
pub fn sanitize_api_error(input: &str) -> String {
    let mut scrubbed = input.to_string();
    if let Some(start) = scrubbed.find("key=") {
        let value_start = start + "key=".len();
        let value_end = scrubbed[value_start..]
            .find(|c: char| c == '&' || c.is_whitespace())
            .map_or(scrubbed.len(), |rel| value_start + rel);
        scrubbed.replace_range(value_start..value_end, "[REDACTED]");
    }

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }
    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    anyhow::anyhow!("{provider} API error ({status}): {}", sanitize_api_error(&body))
}
