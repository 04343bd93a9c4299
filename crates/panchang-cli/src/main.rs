mod client;
mod prompt;
mod session;

use anyhow::Result;
use clap::Parser;

use crate::client::{ChatClient, DEFAULT_URL};
use crate::prompt::rustyline::RustylinePrompt;
use crate::session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Chat endpoint to send the conversation to
    #[arg(long, env = "PANCHANG_URL", default_value = DEFAULT_URL)]
    url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = ChatClient::new(cli.url)?;
    let mut session = Session::new(client, Box::new(RustylinePrompt::new()?));
    session.start().await
}
