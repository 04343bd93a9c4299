use anyhow::{anyhow, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::{Tool, ToolCall};
use crate::prompt_template::{load_prompt, SYSTEM_PROMPT};
use crate::protocol::FinishReason;
use crate::providers::base::{Provider, ProviderEvent, Usage};
use crate::systems::System;

/// Completions allowed per user turn before the reply is cut off
pub const DEFAULT_MAX_STEPS: usize = 10;

#[derive(Clone, Debug, Serialize)]
struct SystemInfo {
    name: String,
    description: String,
    instructions: String,
}

impl SystemInfo {
    fn new(name: &str, description: &str, instructions: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            instructions: instructions.to_string(),
        }
    }
}

/// What the agent produces while replying, in order
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A completion has been requested, its message will carry this id
    StepStarted { message_id: String },
    /// Text of the current completion as the model produces it
    TextDelta(String),
    /// An assistant completion, or the user-role message carrying tool responses
    Message(Message),
    /// A completion and its tool round are done
    StepFinished {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Arc<dyn System>>,
    provider: Box<dyn Provider>,
    max_steps: usize,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Bound the number of completions per reply, at least one is always made
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Add a system to the agent
    pub fn add_system(&mut self, system: Arc<dyn System>) {
        self.systems.push(system);
    }

    fn get_tools(&self) -> Vec<Tool> {
        self.systems
            .iter()
            .flat_map(|system| system.tools().iter().cloned())
            .collect()
    }

    fn get_system_for_tool(&self, tool_name: &str) -> Option<Arc<dyn System>> {
        self.systems
            .iter()
            .find(|system| system.tools().iter().any(|tool| tool.name == tool_name))
            .cloned()
    }

    /// Dispatch a single tool call to the system that declares it.
    ///
    /// The call runs on its own task: if the reply stream is dropped the call still
    /// completes and its result is discarded.
    async fn dispatch_tool_call(&self, tool_call: AgentResult<ToolCall>) -> AgentResult<Value> {
        let call = tool_call?;
        let system = self
            .get_system_for_tool(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        let name = call.name.clone();
        tracing::debug!(tool = %name, arguments = %call.arguments, "dispatching tool call");
        tokio::spawn(async move { system.call(call).await })
            .await
            .map_err(|e| AgentError::Internal(format!("Tool {} did not complete: {}", name, e)))?
    }

    fn get_system_prompt(&self) -> AgentResult<String> {
        let mut context = HashMap::new();
        let systems_info: Vec<SystemInfo> = self
            .systems
            .iter()
            .map(|system| {
                SystemInfo::new(system.name(), system.description(), system.instructions())
            })
            .collect();

        context.insert("systems", systems_info);
        load_prompt(SYSTEM_PROMPT, &context).map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Create a stream that yields each message as it's generated by the agent.
    /// Every step opens with `StepStarted`, streams the completion's text, then
    /// yields the assistant's message and any tool responses before `StepFinished`.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<AgentEvent>>> {
        let mut messages = messages.to_vec();
        let tools = self.get_tools();
        let system_prompt = self.get_system_prompt()?;

        Ok(Box::pin(async_stream::try_stream! {
            for step in 1..=self.max_steps {
                let message_id = uuid::Uuid::new_v4().to_string();
                yield AgentEvent::StepStarted { message_id: message_id.clone() };

                let mut completion = self.provider.stream(
                    &system_prompt,
                    &messages,
                    &tools,
                ).await?;

                let mut finished = None;
                while let Some(event) = completion.next().await {
                    match event? {
                        ProviderEvent::TextDelta(text) => {
                            yield AgentEvent::TextDelta(text);
                        }
                        ProviderEvent::Complete { message, usage } => {
                            finished = Some((message, usage));
                        }
                    }
                }
                let (response, usage) = finished
                    .ok_or_else(|| anyhow!("Completion ended without a message"))?;
                let response = response.with_id(message_id);

                yield AgentEvent::Message(response.clone());

                // Make sure the message above reaches the consumer before tools start
                tokio::task::yield_now().await;

                let tool_requests: Vec<ToolRequest> = response
                    .tool_requests()
                    .into_iter()
                    .cloned()
                    .collect();
                messages.push(response);

                if tool_requests.is_empty() {
                    yield AgentEvent::StepFinished {
                        finish_reason: FinishReason::Stop,
                        usage,
                    };
                    break;
                }

                // Dispatch all in parallel but wait until every one has answered
                let futures: Vec<_> = tool_requests
                    .iter()
                    .map(|request| self.dispatch_tool_call(request.tool_call.clone()))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                // Exactly one response per request, under the original id
                let mut message_tool_response = Message::user();
                for (request, output) in tool_requests.iter().zip(outputs.into_iter()) {
                    if let Err(e) = &output {
                        tracing::warn!(id = %request.id, error = %e, "tool call failed");
                    }
                    message_tool_response =
                        message_tool_response.with_tool_response(request.id.clone(), output);
                }

                yield AgentEvent::Message(message_tool_response.clone());
                messages.push(message_tool_response);

                yield AgentEvent::StepFinished {
                    finish_reason: FinishReason::ToolCalls,
                    usage,
                };

                if step == self.max_steps {
                    tracing::info!(max_steps = self.max_steps, "step limit reached, ending reply");
                }
            }
        }))
    }
}
