use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Sum two usages, a count stays known if either side reported it
    pub fn combine(&self, other: &Usage) -> Usage {
        fn add(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        Usage::new(
            add(self.input_tokens, other.input_tokens),
            add(self.output_tokens, other.output_tokens),
            add(self.total_tokens, other.total_tokens),
        )
    }
}

/// What a streamed completion produces: text as it is generated, then the whole message
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    TextDelta(String),
    Complete { message: Message, usage: Usage },
}

/// Base trait for AI providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message given the system prompt, the conversation so far
    /// and the tools the model may call
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Like `complete`, but text is handed out before the message is finished.
    /// Providers without incremental output send their text as a single delta.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let (message, usage) = self.complete(system, messages, tools).await?;

        let mut events = Vec::new();
        let text = message.text();
        if !text.is_empty() {
            events.push(Ok(ProviderEvent::TextDelta(text)));
        }
        events.push(Ok(ProviderEvent::Complete { message, usage }));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
