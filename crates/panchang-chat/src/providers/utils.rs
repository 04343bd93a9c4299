use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Stands in for the name of a tool call the model got wrong
const INVALID_TOOL_NAME: &str = "invalid_tool_call";

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut output = Vec::new();
        let mut text = String::new();

        for content in &message.content {
            match content {
                MessageContent::Text(part) => {
                    text.push_str(&part.text);
                }
                MessageContent::ToolRequest(request) => {
                    // A request that failed to parse still answers to its id, the paired
                    // response carries the error
                    let (name, arguments) = match &request.tool_call {
                        Ok(tool_call) => (
                            sanitize_function_name(&tool_call.name),
                            tool_call.arguments.to_string(),
                        ),
                        Err(_) => (INVALID_TOOL_NAME.to_string(), "{}".to_string()),
                    };
                    if let Some(object) = converted.as_object_mut() {
                        let tool_calls = object.entry("tool_calls").or_insert(json!([]));
                        if let Some(tool_calls) = tool_calls.as_array_mut() {
                            tool_calls.push(json!({
                                "id": request.id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": arguments,
                                }
                            }));
                        }
                    }
                }
                MessageContent::ToolResponse(response) => match &response.tool_result {
                    Ok(result) => {
                        output.push(json!({
                            "role": "tool",
                            "content": result.to_string(),
                            "tool_call_id": response.id
                        }));
                    }
                    Err(e) => {
                        // A tool result error is shown as output so the model can interpret the error message
                        output.push(json!({
                            "role": "tool",
                            "content": format!("The tool call returned the following error:\n{}", e),
                            "tool_call_id": response.id
                        }));
                    }
                },
            }
        }

        if !text.is_empty() {
            converted["content"] = json!(text);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    if original.is_null() {
        return Err(anyhow!("No message in response: {}", response));
    }
    let mut message = Message::new(Role::Assistant);

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
                continue;
            }

            // Tools without parameters are sometimes called with an empty string
            let arguments = if arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                arguments
            };
            match serde_json::from_str::<Value>(&arguments) {
                Ok(params) => {
                    message =
                        message.with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                }
                Err(e) => {
                    let error = AgentError::InvalidParameters(format!(
                        "Could not interpret tool use parameters for id {}: {}",
                        id, e
                    ));
                    message = message.with_tool_request(id, Err(error));
                }
            }
        }
    }

    Ok(message)
}

/// Folds the chunks of a streamed chat completion back into one response
#[derive(Debug, Default)]
pub struct CompletionAccumulator {
    text: String,
    tool_calls: Vec<PartialToolCall>,
    usage: Option<Value>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl CompletionAccumulator {
    /// Add one `chat.completion.chunk`, returning the text it carried
    pub fn push(&mut self, chunk: &Value) -> Option<String> {
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(usage.clone());
        }

        let delta = &chunk["choices"][0]["delta"];
        if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or_default() as usize;
                if self.tool_calls.len() <= index {
                    self.tool_calls.resize_with(index + 1, PartialToolCall::default);
                }
                let partial = &mut self.tool_calls[index];
                if let Some(id) = call["id"].as_str() {
                    partial.id = id.to_string();
                }
                if let Some(name) = call["function"]["name"].as_str() {
                    partial.name.push_str(name);
                }
                if let Some(arguments) = call["function"]["arguments"].as_str() {
                    partial.arguments.push_str(arguments);
                }
            }
        }

        let text = delta.get("content").and_then(|c| c.as_str())?;
        if text.is_empty() {
            return None;
        }
        self.text.push_str(text);
        Some(text.to_string())
    }

    /// The equivalent non-streamed completion body
    pub fn into_response(self) -> Value {
        let mut message = json!({"role": "assistant"});
        if !self.text.is_empty() {
            message["content"] = json!(self.text);
        }
        if !self.tool_calls.is_empty() {
            let tool_calls: Vec<Value> = self
                .tool_calls
                .into_iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments}
                    })
                })
                .collect();
            message["tool_calls"] = json!(tool_calls);
        }

        json!({
            "choices": [{"message": message}],
            "usage": self.usage.unwrap_or(Value::Null),
        })
    }
}

fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
