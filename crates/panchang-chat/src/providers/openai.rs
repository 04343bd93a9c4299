use anyhow::{anyhow, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, ProviderEvent, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_openai_context_length_error, messages_to_openai_spec, openai_response_to_message,
    tools_to_openai_spec, CompletionAccumulator,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, config })
    }

    fn payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<Value> {
        let system_message = json!({
            "role": "system",
            "content": system
        });

        let messages_spec = messages_to_openai_spec(messages);
        let tools_spec = if !tools.is_empty() {
            tools_to_openai_spec(tools)?
        } else {
            vec![]
        };

        // create messages array with system message first
        let mut messages_array = vec![system_message];
        messages_array.extend(messages_spec);

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array
        });

        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }

        Ok(payload)
    }

    async fn post(&self, payload: Value) -> Result<Response> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                // OpenAI explains client errors in the body
                let body: Value = response.json().await.unwrap_or(Value::Null);
                match body.get("error") {
                    Some(error) => Err(api_error(error)),
                    None => Err(anyhow!("Request failed: {}", status)),
                }
            }
        }
    }
}

fn get_usage(data: &Value) -> Usage {
    let Some(usage) = data.get("usage") else {
        return Usage::default();
    };

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

/// Raise the specific error if context length is exceeded
fn api_error(error: &Value) -> anyhow::Error {
    match check_openai_context_length_error(error) {
        Some(err) => err.into(),
        None => anyhow!("OpenAI API error: {}", error),
    }
}

/// The JSON payload of one server-sent event line, if the line carries one
fn sse_data(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = self.payload(system, messages, tools)?;
        let response: Value = self.post(payload).await?.json().await?;

        if let Some(error) = response.get("error") {
            return Err(api_error(error));
        }

        let usage = get_usage(&response);
        let message = openai_response_to_message(response)?;

        Ok((message, usage))
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<BoxStream<'static, Result<ProviderEvent>>> {
        let mut payload = self.payload(system, messages, tools)?;
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});

        let mut body = self.post(payload).await?.bytes_stream();

        Ok(Box::pin(try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut accumulator = CompletionAccumulator::default();
            let mut done = false;

            while let Some(chunk) = body.next().await {
                buffer.extend_from_slice(&chunk?);

                // Events are separated by newlines, a chunk may end mid line
                while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&line);
                    let data = match sse_data(&line) {
                        Some(data) if !data.is_empty() => data,
                        _ => continue,
                    };
                    if data == "[DONE]" {
                        done = true;
                        break;
                    }

                    let chunk: Value = serde_json::from_str(data)?;
                    if let Some(error) = chunk.get("error") {
                        Err::<(), _>(api_error(error))?;
                    }
                    if let Some(text) = accumulator.push(&chunk) {
                        yield ProviderEvent::TextDelta(text);
                    }
                }

                if done {
                    break;
                }
            }

            if !done {
                // The last event may lack its newline
                let rest = String::from_utf8_lossy(&buffer).to_string();
                if let Some(data) = sse_data(&rest).filter(|d| !d.is_empty() && *d != "[DONE]") {
                    let chunk: Value = serde_json::from_str(data)?;
                    if let Some(text) = accumulator.push(&chunk) {
                        yield ProviderEvent::TextDelta(text);
                    }
                }
            }

            let response = accumulator.into_response();
            let usage = get_usage(&response);
            let message = openai_response_to_message(response)?;
            yield ProviderEvent::Complete { message, usage };
        }))
    }
}
