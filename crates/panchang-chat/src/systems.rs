use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AgentResult;
use crate::models::tool::{Tool, ToolCall};

/// Core trait that defines a system of tools that can be operated by an AI agent
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get system instructions, rendered into the system prompt
    fn instructions(&self) -> &str;

    /// Get the tools this system declares to the model
    fn tools(&self) -> &[Tool];

    /// Call a tool with the given arguments, returning a JSON result for the model
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Value>;
}
