use anyhow::Result;
use panchang_chat::protocol::StreamPart;

pub mod rustyline;

pub trait Prompt {
    fn get_input(&mut self) -> Result<Input>;
    /// Show one part of a reply as it arrives
    fn render(&mut self, part: &StreamPart);
    fn render_error(&mut self, error: &str);
    fn render_notice(&mut self, notice: &str) {
        println!("{}", notice);
    }
    fn show_busy(&mut self);
    fn hide_busy(&mut self);
    fn ready(&self, url: &str) {
        println!("\n");
        println!(
            "Ask about sunrise or tithi, for today or any date. Replies come from {}",
            url
        );
        println!("\n");
    }
    fn close(&self);
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Optional content as sometimes the user may be issuing a command eg. (Exit)
}

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Exit,     // User wants to exit the session
}
