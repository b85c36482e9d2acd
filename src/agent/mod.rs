//! Reply orchestration: sessions in, provider call (with a bounded
//! tool-call loop), reply out.
//!
//! Every fault on this path degrades to a canned reply; history and
//! activity bookkeeping never fail the handler, so the chat user at worst
//! loses context, never a response.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::history::{Message, Role};
use crate::prompt;
use crate::providers::{
    CompletionProvider, CompletionRequest, CompletionResponse, ToolCallRequest,
};
use crate::sessions::SessionRegistry;
use crate::tools::{Tool, ToolSpec};

const FALLBACK_REPLY: &str =
    "Sorry, I couldn't generate a response just now. Please try again in a moment.";
const IMAGE_PLACEHOLDER: &str = "[User sent an image]";

pub struct Agent {
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn CompletionProvider>,
    tools: Vec<Box<dyn Tool>>,
    text_model: String,
    vision_model: String,
    max_tool_iterations: usize,
}

impl Agent {
    pub fn new(
        registry: Arc<SessionRegistry>,
        provider: Arc<dyn CompletionProvider>,
        tools: Vec<Box<dyn Tool>>,
        text_model: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            provider,
            tools,
            text_model: text_model.into(),
            vision_model: vision_model.into(),
            max_tool_iterations: 10,
        }
    }

    /// Handle one inbound text message and return the reply to send.
    pub async fn handle_text(&self, user_id: &str, text: &str) -> String {
        self.registry.ensure_loaded(user_id).await;
        self.registry.record(user_id, Message::text(Role::User, text));

        let system_prompt = prompt::text_system_prompt();
        let reply = match self
            .run_completion(user_id, &self.text_model, &system_prompt, true)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(user_id, error = %err, "completion failed");
                FALLBACK_REPLY.to_string()
            }
        };

        self.registry
            .record(user_id, Message::text(Role::Assistant, &reply));
        format_line_reply(&reply)
    }

    /// Handle one inbound image. `data` is the base64-encoded bytes as
    /// downloaded from the platform.
    pub async fn handle_image(&self, user_id: &str, media_type: &str, data: &str) -> String {
        self.registry.ensure_loaded(user_id).await;
        self.registry
            .record(user_id, Message::image(IMAGE_PLACEHOLDER, media_type, data));

        let system_prompt = prompt::vision_system_prompt();
        let reply = match self
            .run_completion(user_id, &self.vision_model, &system_prompt, false)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(user_id, error = %err, "vision completion failed");
                FALLBACK_REPLY.to_string()
            }
        };

        self.registry
            .record(user_id, Message::text(Role::Assistant, &reply));
        format_line_reply(&reply)
    }

    async fn run_completion(
        &self,
        user_id: &str,
        model: &str,
        system_prompt: &str,
        with_tools: bool,
    ) -> Result<String> {
        let specs: Vec<ToolSpec> = if with_tools {
            self.tools.iter().map(|tool| tool.spec()).collect()
        } else {
            Vec::new()
        };

        for _ in 0..self.max_tool_iterations {
            let context = self.registry.context(user_id);
            let response = self
                .provider
                .complete(CompletionRequest {
                    model,
                    system_prompt,
                    messages: &context,
                    tools: &specs,
                })
                .await?;

            match response {
                CompletionResponse::Text(text) => return Ok(text),
                CompletionResponse::ToolCalls(calls) => {
                    for call in calls {
                        let output = self.execute_tool(&call).await;
                        debug!(user_id, tool = %call.name, "tool executed");
                        self.registry
                            .record(user_id, Message::tool_result(output, call.name.clone()));
                    }
                }
            }
        }
        bail!("tool loop exceeded {} iterations", self.max_tool_iterations)
    }

    async fn execute_tool(&self, call: &ToolCallRequest) -> String {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == call.name) else {
            return format!("Unknown tool: {}", call.name);
        };
        match tool.execute(call.arguments.clone()).await {
            Ok(output) => output,
            Err(err) => format!("Tool {} failed: {err}", call.name),
        }
    }
}

/// LINE renders no markdown; unescape literal newlines and drop bold
/// markers before replying.
fn format_line_reply(reply: &str) -> String {
    let cleaned = reply.replace("\\n", "\n").replace("**", "");
    if cleaned.trim().is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        cleaned
    }
}
