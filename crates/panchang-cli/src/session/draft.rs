use panchang_chat::protocol::{FinishReason, StreamPart, ToolInvocation, UiMessage, UiPart};

/// The assistant message being assembled from a streamed reply
#[derive(Debug, Default)]
pub struct AssistantDraft {
    id: Option<String>,
    text: String,
    parts: Vec<UiPart>,
    error: Option<String>,
    finish_reason: Option<FinishReason>,
}

impl AssistantDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, part: &StreamPart) {
        match part {
            StreamPart::Text(text) => {
                self.text.push_str(text);
                match self.parts.last_mut() {
                    Some(UiPart::Text { text: last }) => last.push_str(text),
                    _ => self.parts.push(UiPart::Text { text: text.clone() }),
                }
            }
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => self.parts.push(UiPart::ToolInvocation {
                tool_invocation: ToolInvocation {
                    state: "call".to_string(),
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    args: args.clone(),
                    result: None,
                },
            }),
            StreamPart::ToolResult {
                tool_call_id,
                result,
            } => {
                let invocation = self.parts.iter_mut().find_map(|part| match part {
                    UiPart::ToolInvocation { tool_invocation }
                        if tool_invocation.tool_call_id == *tool_call_id =>
                    {
                        Some(tool_invocation)
                    }
                    _ => None,
                });
                if let Some(invocation) = invocation {
                    invocation.state = "result".to_string();
                    invocation.result = Some(result.clone());
                }
            }
            StreamPart::Error(error) => self.error = Some(error.clone()),
            StreamPart::StartStep { message_id } => {
                // One client message spans every step of the reply
                if self.id.is_none() {
                    self.id = Some(message_id.clone());
                }
            }
            StreamPart::FinishStep { .. } => {}
            StreamPart::FinishMessage { finish_reason, .. } => {
                self.finish_reason = Some(*finish_reason)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The server reported a failure, or the reply never finished
    pub fn failed(&self) -> bool {
        self.error.is_some() || self.finish_reason != Some(FinishReason::Stop)
    }

    /// The message to keep in the transcript, `None` when nothing arrived
    pub fn into_message(self) -> Option<UiMessage> {
        if self.parts.is_empty() {
            return None;
        }

        let tool_invocations = self
            .parts
            .iter()
            .filter_map(|part| match part {
                UiPart::ToolInvocation { tool_invocation } => Some(tool_invocation.clone()),
                _ => None,
            })
            .collect();

        Some(UiMessage {
            id: self.id,
            role: "assistant".to_string(),
            content: self.text,
            parts: self.parts,
            tool_invocations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panchang_chat::protocol::StreamUsage;
    use serde_json::json;

    fn finish(reason: FinishReason) -> StreamPart {
        StreamPart::FinishMessage {
            finish_reason: reason,
            usage: StreamUsage::default(),
        }
    }

    #[test]
    fn test_accumulates_text_and_pairs_tool_results() {
        let mut draft = AssistantDraft::new();
        for part in [
            StreamPart::StartStep {
                message_id: "m1".to_string(),
            },
            StreamPart::ToolCall {
                tool_call_id: "call_1".to_string(),
                tool_name: "today".to_string(),
                args: json!({}),
            },
            StreamPart::ToolResult {
                tool_call_id: "call_1".to_string(),
                result: json!({"date": "2024-01-15"}),
            },
            StreamPart::StartStep {
                message_id: "m2".to_string(),
            },
            StreamPart::Text("Sunrise is ".to_string()),
            StreamPart::Text("at 06:41.".to_string()),
            finish(FinishReason::Stop),
        ] {
            draft.apply(&part);
        }

        assert!(!draft.failed());

        let message = draft.into_message().unwrap();
        assert_eq!(message.content, "Sunrise is at 06:41.");
        assert_eq!(message.id.as_deref(), Some("m1"));
        assert_eq!(message.role, "assistant");
        assert_eq!(message.parts.len(), 2);
        assert_eq!(
            message.parts[1],
            UiPart::Text {
                text: "Sunrise is at 06:41.".to_string()
            }
        );
        assert_eq!(message.tool_invocations.len(), 1);
        assert!(message.tool_invocations[0].is_complete());
    }

    #[test]
    fn test_unanswered_call_stays_pending() {
        let mut draft = AssistantDraft::new();
        draft.apply(&StreamPart::ToolCall {
            tool_call_id: "call_1".to_string(),
            tool_name: "sunrise".to_string(),
            args: json!({"date": "2024-01-15"}),
        });
        draft.apply(&StreamPart::ToolResult {
            tool_call_id: "call_other".to_string(),
            result: json!({}),
        });

        assert!(draft.failed());
        let message = draft.into_message().unwrap();
        assert_eq!(message.tool_invocations[0].state, "call");
        assert!(message.tool_invocations[0].result.is_none());
    }

    #[test]
    fn test_error_only_reply_is_empty() {
        let mut draft = AssistantDraft::new();
        draft.apply(&StreamPart::Error("Server error: 503".to_string()));
        draft.apply(&finish(FinishReason::Error));

        assert!(draft.failed());
        assert!(draft.is_empty());
        assert!(draft.into_message().is_none());
    }
}
