//! Completion service boundary.
//!
//! The history core treats the LLM as an opaque async call that accepts an
//! ordered message window and returns either final text or tool-call
//! requests.

use async_trait::async_trait;

use crate::history::Message;
use crate::tools::ToolSpec;

/// One model invocation: system prompt plus the user's full current window,
/// replayed in arrival order.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResponse {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> anyhow::Result<CompletionResponse>;
    fn name(&self) -> &str;
}
