//! Gemini REST provider (`models/{model}:generateContent`).

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::traits::{CompletionProvider, CompletionRequest, CompletionResponse, ToolCallRequest};
use super::{api_error, sanitize_api_error};
use crate::history::{Message, MessageContent, Role};
use crate::tools::ToolSpec;

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    max_output_tokens: u32,
    client: Client,
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: &str, max_output_tokens: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_output_tokens,
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

// ── Mapping ──────────────────────────────────────────────────────

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        ..Part::default()
    }
}

fn to_content(message: &Message) -> Content {
    match (&message.role, &message.content) {
        (Role::Tool, MessageContent::ToolResult { content, tool_call_id }) => Content {
            // Function responses travel under the user role on the wire.
            role: Some("user".to_string()),
            parts: vec![Part {
                function_response: Some(FunctionResponse {
                    name: tool_call_id.clone(),
                    response: json!({ "content": content }),
                }),
                ..Part::default()
            }],
        },
        (role, MessageContent::Image { text, media_type, data }) => Content {
            role: Some(wire_role(*role).to_string()),
            parts: vec![
                text_part(text),
                Part {
                    inline_data: Some(InlineData {
                        mime_type: media_type.clone(),
                        data: data.clone(),
                    }),
                    ..Part::default()
                },
            ],
        },
        (role, MessageContent::Text { text }) => Content {
            role: Some(wire_role(*role).to_string()),
            parts: vec![text_part(text)],
        },
        // A tool-result payload under a non-tool role shouldn't happen;
        // degrade to its text form rather than dropping the turn.
        (role, MessageContent::ToolResult { content, .. }) => Content {
            role: Some(wire_role(*role).to_string()),
            parts: vec![text_part(content)],
        },
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "model",
    }
}

fn to_declarations(tools: &[ToolSpec]) -> Option<Vec<ToolDeclarations>> {
    if tools.is_empty() {
        return None;
    }
    Some(vec![ToolDeclarations {
        function_declarations: tools
            .iter()
            .map(|spec| FunctionDeclaration {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            })
            .collect(),
    }])
}

fn extract_response(response: GenerateResponse) -> Result<CompletionResponse> {
    let Some(content) = response.candidates.into_iter().next().and_then(|c| c.content) else {
        bail!("gemini returned no candidates");
    };

    let mut calls = Vec::new();
    let mut text = String::new();
    for part in content.parts {
        if let Some(call) = part.function_call {
            calls.push(ToolCallRequest {
                name: call.name,
                arguments: call.args,
            });
        } else if let Some(fragment) = part.text {
            text.push_str(&fragment);
        }
    }

    if !calls.is_empty() {
        return Ok(CompletionResponse::ToolCalls(calls));
    }
    if text.trim().is_empty() {
        bail!("gemini returned an empty completion");
    }
    Ok(CompletionResponse::Text(text))
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![text_part(request.system_prompt)],
            },
            contents: request.messages.iter().map(to_content).collect(),
            tools: to_declarations(request.tools),
            generation_config: GenerationConfig {
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.generate_url(request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| anyhow::anyhow!("gemini request failed: {}", sanitize_api_error(&err.to_string())))?;

        if !response.status().is_success() {
            return Err(api_error("gemini", response).await);
        }

        let parsed: GenerateResponse = response.json().await?;
        extract_response(parsed)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
