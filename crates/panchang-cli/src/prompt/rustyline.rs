use std::io::{self, Write};

use anyhow::Result;
use cliclack::spinner;
use console::style;
use panchang_chat::protocol::{FinishReason, StreamPart};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;

use super::{Input, InputType, Prompt};

const PROMPT: &str = "\x1b[1m\x1b[38;5;172m(☀)> \x1b[0m";
const MAX_STRING_LENGTH: usize = 40;
const INDENT: &str = "    ";

pub struct RustylinePrompt {
    editor: DefaultEditor,
    spinner: Option<cliclack::ProgressBar>,
    // Whether the cursor sits at the start of a line, so tool output never lands mid-sentence
    line_start: bool,
}

impl RustylinePrompt {
    pub fn new() -> Result<Self> {
        Ok(RustylinePrompt {
            editor: DefaultEditor::new()?,
            spinner: None,
            line_start: true,
        })
    }

    fn break_line(&mut self) {
        if !self.line_start {
            print_newline();
            self.line_start = true;
        }
    }
}

fn print_tool_header(name: &str) {
    println!(
        "{}",
        style(format!("─── {} ──────────────────────────", name)).dim()
    );
}

/// Format and print tool arguments and results with indentation, dimmed
fn print_params(value: &Value, depth: usize) {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{}{}:", indent, style(key).dim());
                        print_params(val, depth + 1);
                    }
                    Value::String(s) if s.len() > MAX_STRING_LENGTH => {
                        println!("{}{}: {}", indent, style(key).dim(), style("...").dim());
                    }
                    Value::String(s) => {
                        println!("{}{}: {}", indent, style(key).dim(), style(s).dim());
                    }
                    other => {
                        println!("{}{}: {}", indent, style(key).dim(), style(other).dim());
                    }
                }
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("{}{}.", indent, i + 1);
                print_params(item, depth + 1);
            }
        }
        Value::String(s) => println!("{}{}", indent, style(s).dim()),
        other => println!("{}{}", indent, style(other).dim()),
    }
}

fn print_newline() {
    println!();
}

impl Prompt for RustylinePrompt {
    fn render(&mut self, part: &StreamPart) {
        match part {
            StreamPart::Text(text) => {
                print!("{}", text);
                self.line_start = text.ends_with('\n');
            }
            StreamPart::ToolCall {
                tool_name, args, ..
            } => {
                self.break_line();
                print_tool_header(tool_name);
                print_params(args, 0);
            }
            StreamPart::ToolResult { result, .. } => {
                self.break_line();
                print_params(result, 1);
            }
            StreamPart::Error(error) => {
                self.break_line();
                println!("{}", style(error).red());
            }
            StreamPart::FinishMessage { finish_reason, .. } => {
                self.break_line();
                if *finish_reason != FinishReason::Stop && *finish_reason != FinishReason::Error {
                    println!("{}", style(format!("(reply ended: {:?})", finish_reason)).dim());
                }
                print_newline();
            }
            StreamPart::StartStep { .. } | StreamPart::FinishStep { .. } => {}
        }
        let _ = io::stdout().flush();
    }

    fn render_error(&mut self, error: &str) {
        self.break_line();
        eprintln!("{} {}", style("Error:").red().bold(), error);
        println!(
            "{}",
            style("Submit again to retry, the conversation so far is kept.").dim()
        );
    }

    fn show_busy(&mut self) {
        let spinner = spinner();
        spinner.start("consulting the almanac...");
        self.spinner = Some(spinner);
    }

    fn hide_busy(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop("");
        }
    }

    fn get_input(&mut self) -> Result<Input> {
        let input = self.editor.readline(PROMPT);
        let message_text = match input {
            Ok(text) => text,
            Err(e) => {
                match e {
                    ReadlineError::Interrupted | ReadlineError::Eof => (),
                    _ => eprintln!("Input error: {}", e),
                }
                return Ok(Input {
                    input_type: InputType::Exit,
                    content: None,
                });
            }
        };
        let message_text = message_text.trim().to_string();
        if !message_text.is_empty() {
            let _ = self.editor.add_history_entry(message_text.as_str());
        }

        if message_text.eq_ignore_ascii_case("/exit") || message_text.eq_ignore_ascii_case("/quit")
        {
            Ok(Input {
                input_type: InputType::Exit,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/?")
            || message_text.eq_ignore_ascii_case("/help")
        {
            println!("Commands:");
            println!("/exit - Exit the session");
            println!("/? | /help - Display this help message");
            println!("Ctrl+C - Interrupt a reply (resets the conversation to before the interrupted message)");
            Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            })
        } else {
            Ok(Input {
                input_type: InputType::Message,
                content: Some(message_text),
            })
        }
    }

    fn close(&self) {
        // No cleanup required
    }
}
