mod draft;

use anyhow::Result;
use futures::StreamExt;
use panchang_chat::protocol::UiMessage;

use crate::client::ChatClient;
use crate::prompt::{InputType, Prompt};
pub use draft::AssistantDraft;

enum Outcome {
    Finished,
    Interrupted,
}

/// A conversation with the chat endpoint, the transcript lives here
pub struct Session {
    client: ChatClient,
    prompt: Box<dyn Prompt>,
    messages: Vec<UiMessage>,
}

impl Session {
    pub fn new(client: ChatClient, prompt: Box<dyn Prompt>) -> Self {
        Session {
            client,
            prompt,
            messages: Vec::new(),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.prompt.ready(self.client.url());

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = input.content.filter(|c| !c.trim().is_empty()) {
                        self.submit(content).await;
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }
        }

        self.prompt.close();
        Ok(())
    }

    /// Send one user turn and render the reply; the next turn waits for this one
    pub async fn submit(&mut self, content: String) {
        self.messages.push(UiMessage::user(content));

        let mut draft = AssistantDraft::new();
        self.prompt.show_busy();
        let outcome = self.stream_reply(&mut draft).await;
        self.prompt.hide_busy();

        match outcome {
            Ok(Outcome::Finished) => {
                if draft.failed() && draft.is_empty() {
                    self.rewind();
                } else if let Some(message) = draft.into_message() {
                    self.messages.push(message);
                }
            }
            Ok(Outcome::Interrupted) => {
                self.rewind();
                self.prompt.render_notice(
                    " Interrupt: Resetting conversation to before the last sent message...",
                );
            }
            Err(e) => {
                self.prompt.render_error(&e.to_string());
                // Partial text is kept, a reply that never started leaves no trace
                match draft.into_message() {
                    Some(message) => self.messages.push(message),
                    None => self.rewind(),
                }
            }
        }
    }

    pub fn messages(&self) -> &[UiMessage] {
        &self.messages
    }

    async fn stream_reply(&mut self, draft: &mut AssistantDraft) -> Result<Outcome> {
        let mut stream = self.client.send(&self.messages).await?;
        loop {
            tokio::select! {
                part = stream.next() => {
                    match part {
                        Some(Ok(part)) => {
                            self.prompt.hide_busy();
                            draft.apply(&part);
                            self.prompt.render(&part);
                        }
                        Some(Err(e)) => return Err(e),
                        None => return Ok(Outcome::Finished),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    drop(stream);
                    return Ok(Outcome::Interrupted);
                }
            }
        }
    }

    // Drop everything after, and including, the most recent user message
    fn rewind(&mut self) {
        while let Some(message) = self.messages.pop() {
            if message.role == "user" {
                break;
            }
        }
    }
}
