//! `ragchat ask`: Answer one question from the terminal.
//!
//! Runs the same pipeline as the HTTP server: the system message is built
//! with retrieved context, then the answer streams to stdout token by token.

use std::io::Write;
use std::path::Path;

use ragchat_core::message::{Conversation, Turn};
use ragchat_engine::StreamEvent;

pub async fn run(
    config_path: Option<&Path>,
    question: &str,
    no_context: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set RAGCHAT_API_KEY or OPENAI_API_KEY, or add api_key to:");
        eprintln!("    {}", super::config_file(config_path).display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let chat = ragchat_gateway::build_chat_service(&config).await?;

    let system = if no_context {
        config.system_instruction.clone()
    } else {
        chat.system_message(question).await?
    };
    let conversation = Conversation::new(vec![Turn::system(system), Turn::user(question)])?;

    let mut events = chat.chat_stream(conversation).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Token { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            StreamEvent::Done => {
                writeln!(stdout)?;
            }
            StreamEvent::Error { message } => {
                writeln!(stdout)?;
                return Err(format!("Answer failed: {message}").into());
            }
        }
    }

    Ok(())
}
