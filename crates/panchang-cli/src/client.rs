use anyhow::{bail, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use panchang_chat::protocol::{ChatRequest, StreamDecoder, StreamPart, UiMessage};
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://127.0.0.1:3000/api/chat";

/// Posts transcripts to the chat endpoint and decodes the streamed reply
pub struct ChatClient {
    http: Client,
    url: String,
}

impl ChatClient {
    pub fn new<S: Into<String>>(url: S) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the whole transcript, yielding reply parts as they arrive.
    ///
    /// A body that stops in the middle of a line ends the stream with an error
    /// after every complete part has been yielded.
    pub async fn send(
        &self,
        messages: &[UiMessage],
    ) -> Result<BoxStream<'static, Result<StreamPart>>> {
        let response = self
            .http
            .post(&self.url)
            .header("x-protocol", "data")
            .json(&ChatRequest {
                messages: messages.to_vec(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("Chat endpoint answered {}", status);
        }

        let mut body = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut decoder = StreamDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                for part in decoder.push(&chunk) {
                    yield part?;
                }
            }
            decoder.finish()?;
        }))
    }
}
