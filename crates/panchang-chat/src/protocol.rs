//! The wire formats spoken between a chat client and the endpoint.
//!
//! Requests carry the transcript as useChat style messages. Replies are a data
//! stream: one part per line, `<code>:<json>\n`, where the code says what the
//! JSON payload is.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::providers::base::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Error,
    #[serde(other)]
    Unknown,
}

/// Token counts as the stream reports them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

impl From<Usage> for StreamUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallPayload {
    tool_call_id: String,
    tool_name: String,
    args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultPayload {
    tool_call_id: String,
    result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStepPayload {
    message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: FinishReason,
    #[serde(default)]
    usage: StreamUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_continued: Option<bool>,
}

/// One line of the data stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    /// `0:` a text increment to append to the running assistant message
    Text(String),
    /// `9:` the model asked for a tool
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    /// `a:` the result paired with an earlier tool call
    ToolResult { tool_call_id: String, result: Value },
    /// `3:` the reply failed
    Error(String),
    /// `f:` a completion step begins
    StartStep { message_id: String },
    /// `e:` a completion step ended
    FinishStep {
        finish_reason: FinishReason,
        usage: StreamUsage,
        is_continued: bool,
    },
    /// `d:` the whole reply ended, always the last part
    FinishMessage {
        finish_reason: FinishReason,
        usage: StreamUsage,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed stream line: {0}")]
    InvalidLine(String),

    #[error("Unknown stream part code: {0}")]
    UnknownCode(String),

    #[error("Invalid stream payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream ended in the middle of a line")]
    Truncated,
}

impl StreamPart {
    pub fn code(&self) -> char {
        match self {
            StreamPart::Text(_) => '0',
            StreamPart::ToolCall { .. } => '9',
            StreamPart::ToolResult { .. } => 'a',
            StreamPart::Error(_) => '3',
            StreamPart::StartStep { .. } => 'f',
            StreamPart::FinishStep { .. } => 'e',
            StreamPart::FinishMessage { .. } => 'd',
        }
    }

    /// Render as a protocol line, trailing newline included
    pub fn encode(&self) -> String {
        let payload = match self {
            StreamPart::Text(text) | StreamPart::Error(text) => serde_json::to_string(text),
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => serde_json::to_string(&ToolCallPayload {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args: args.clone(),
            }),
            StreamPart::ToolResult {
                tool_call_id,
                result,
            } => serde_json::to_string(&ToolResultPayload {
                tool_call_id: tool_call_id.clone(),
                result: result.clone(),
            }),
            StreamPart::StartStep { message_id } => serde_json::to_string(&StartStepPayload {
                message_id: message_id.clone(),
            }),
            StreamPart::FinishStep {
                finish_reason,
                usage,
                is_continued,
            } => serde_json::to_string(&FinishPayload {
                finish_reason: *finish_reason,
                usage: *usage,
                is_continued: Some(*is_continued),
            }),
            StreamPart::FinishMessage {
                finish_reason,
                usage,
            } => serde_json::to_string(&FinishPayload {
                finish_reason: *finish_reason,
                usage: *usage,
                is_continued: None,
            }),
        };
        // Every payload is plain data, serialization cannot fail
        format!("{}:{}\n", self.code(), payload.unwrap_or_default())
    }

    /// Parse a single line, with or without its trailing newline
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (code, payload) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidLine(line.to_string()))?;

        let part = match code {
            "0" => StreamPart::Text(serde_json::from_str(payload)?),
            "3" => StreamPart::Error(serde_json::from_str(payload)?),
            "9" => {
                let call: ToolCallPayload = serde_json::from_str(payload)?;
                StreamPart::ToolCall {
                    tool_call_id: call.tool_call_id,
                    tool_name: call.tool_name,
                    args: call.args,
                }
            }
            "a" => {
                let result: ToolResultPayload = serde_json::from_str(payload)?;
                StreamPart::ToolResult {
                    tool_call_id: result.tool_call_id,
                    result: result.result,
                }
            }
            "f" => {
                let step: StartStepPayload = serde_json::from_str(payload)?;
                StreamPart::StartStep {
                    message_id: step.message_id,
                }
            }
            "e" => {
                let finish: FinishPayload = serde_json::from_str(payload)?;
                StreamPart::FinishStep {
                    finish_reason: finish.finish_reason,
                    usage: finish.usage,
                    is_continued: finish.is_continued.unwrap_or(false),
                }
            }
            "d" => {
                let finish: FinishPayload = serde_json::from_str(payload)?;
                StreamPart::FinishMessage {
                    finish_reason: finish.finish_reason,
                    usage: finish.usage,
                }
            }
            other => return Err(ProtocolError::UnknownCode(other.to_string())),
        };
        Ok(part)
    }
}

/// Reassembles stream parts from arbitrarily split body chunks
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every part completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamPart, ProtocolError>> {
        self.buffer.extend_from_slice(chunk);

        let mut parts = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            if line.trim().is_empty() {
                continue;
            }
            parts.push(StreamPart::parse(&line));
        }
        parts
    }

    /// Signal end of input; leftover bytes mean the stream was cut off mid-line
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
            Ok(())
        } else {
            Err(ProtocolError::Truncated)
        }
    }
}

/// A tool call as a chat client remembers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// `call` until a result arrives, then `result`
    pub state: String,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    pub fn is_complete(&self) -> bool {
        self.state == "result" && self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text {
        text: String,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    #[serde(other)]
    Other,
}

/// A transcript entry as posted by a chat client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl UiMessage {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            role: "user".to_string(),
            content: content.into(),
            parts: Vec::new(),
            tool_invocations: Vec::new(),
        }
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<UiMessage>,
}
