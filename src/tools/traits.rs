use async_trait::async_trait;
use serde_json::Value;

/// Declaration handed to the completion provider so the model can request a
/// call.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: Value,
}

/// An agent-callable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Failures are reported as `Err` and rendered into the
    /// tool result message by the agent; they never abort the turn.
    async fn execute(&self, args: Value) -> anyhow::Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
