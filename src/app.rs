//! Terminal front end.
//!
//! Wires the HTTP backend and the terminal speech engines into a
//! [`Conversation`] and drives it from stdin. While the conversation is
//! listening, typed lines count as recognized speech; otherwise they are sent
//! as typed messages.

use crate::backend::{Backend, HttpBackend, SessionId};
use crate::config::Config;
use crate::conversation::{Conversation, ConversationHandle};
use crate::error::Result;
use crate::output;
use crate::speech::{SpeechCapabilities, SpeechProvider};
use crate::speech::terminal::{TerminalProvider, TerminalRecognizer, TerminalSynthesizer};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// One line of chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Start listening (`/mic`)
    Mic,
    /// Toggle conversation mode, or set it explicitly (`/latch [on|off]`)
    Latch(Option<bool>),
    /// Stop listening and speaking (`/stop`)
    Stop,
    /// End the session but keep the chat open (`/end`)
    End,
    /// End the session and exit (`/quit`)
    Quit,
    Help,
    Text(String),
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ChatInput::Text(line.to_string());
    };
    let mut parts = command.split_whitespace();
    match (parts.next().unwrap_or(""), parts.next()) {
        ("mic" | "listen", None) => ChatInput::Mic,
        ("latch", None) => ChatInput::Latch(None),
        ("latch", Some("on")) => ChatInput::Latch(Some(true)),
        ("latch", Some("off")) => ChatInput::Latch(Some(false)),
        ("stop", None) => ChatInput::Stop,
        ("end", None) => ChatInput::End,
        ("quit" | "exit" | "q", None) => ChatInput::Quit,
        ("help" | "?", None) => ChatInput::Help,
        _ => ChatInput::Unknown(line.to_string()),
    }
}

const HELP: &str = "\
Commands:
  /mic          start listening; typed lines then count as speech
  /latch [on|off]  keep listening after every reply
  /stop         stop listening and speaking
  /end          end the session (a new one starts with your next message)
  /quit         end the session and exit
Anything else is sent as a message.";

/// Options for [`run_chat`] that come from the command line.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub latched: bool,
    pub greet: bool,
    pub text_only: bool,
    pub silent_engine: bool,
    pub quiet: bool,
    pub verbose: u8,
}

fn connect(config: &Config) -> Result<Arc<HttpBackend>> {
    let backend = HttpBackend::new(
        &config.backend.api_base,
        &config.backend.auth_token,
        config.request_timeout(),
    )?;
    Ok(Arc::new(backend))
}

fn spawn_renderer(handle: &ConversationHandle, color: bool, verbose: u8) -> JoinHandle<()> {
    let mut events = handle.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => output::render_event(&event, color, verbose),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "renderer lagged behind events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Run an interactive conversation until `/quit`, end of input or Ctrl-C.
pub async fn run_chat(config: Config, options: ChatOptions) -> Result<()> {
    config.validate()?;
    let backend = connect(&config)?;

    let recognizer = Arc::new(TerminalRecognizer::new());
    let speech = if options.text_only {
        SpeechCapabilities::unavailable()
    } else {
        let synthesizer = Arc::new(if options.silent_engine {
            TerminalSynthesizer::silent()
        } else {
            TerminalSynthesizer::new()
        });
        let providers: Vec<Box<dyn SpeechProvider>> =
            vec![Box::new(TerminalProvider::new(recognizer.clone(), synthesizer))];
        SpeechCapabilities::select(providers)
    };

    let mut settings = config.conversation_settings();
    settings.latched |= options.latched;
    let handle = Conversation::spawn(backend.clone(), speech, settings);

    let color = std::io::stdout().is_terminal();
    let renderer = spawn_renderer(&handle, color, options.verbose);

    if !options.quiet {
        eprintln!("Connected to {} ({} speech).", backend.base_url(), handle.platform());
        eprintln!("Type /help for commands.");
    }

    // Failure here is not fatal: the next message retries lazily.
    match handle.start_session(options.greet).await {
        Ok(session) => tracing::info!(%session, "session ready"),
        Err(e) => tracing::warn!(error = %e, "could not start session"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_open = true;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Help => eprintln!("{HELP}"),
            ChatInput::Unknown(command) => eprintln!("Unknown command: {command} (try /help)"),
            ChatInput::Mic => {
                handle.start_listening()?;
                session_open = true;
            }
            ChatInput::Latch(value) => {
                let latched = value.unwrap_or(!handle.state().latched);
                handle.set_latched(latched)?;
                if !options.quiet {
                    eprintln!("Conversation mode {}.", if latched { "on" } else { "off" });
                }
            }
            ChatInput::Stop => handle.stop()?,
            ChatInput::End => {
                handle.end_session().await?;
                session_open = false;
            }
            ChatInput::Quit => break,
            ChatInput::Text(text) => {
                if !recognizer.feed(&text) {
                    handle.submit_text(text)?;
                }
                session_open = true;
            }
        }
    }

    if session_open {
        handle.end_session().await?;
    }
    handle.shutdown();
    // Let the renderer drain the closing events.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    renderer.abort();
    Ok(())
}

/// List past sessions, or print one session's transcript.
pub async fn run_history(config: Config, session: Option<String>) -> Result<()> {
    let backend = connect(&config)?;
    match session {
        Some(session) => {
            let transcript = backend.session_history(&SessionId::new(session)).await?;
            print!("{}", output::format_session_transcript(&transcript));
        }
        None => {
            let entries = backend.history().await?;
            print!("{}", output::format_history(&entries));
        }
    }
    Ok(())
}

/// Print statistics, mood trends and goal count.
pub async fn run_stats(config: Config) -> Result<()> {
    let backend = connect(&config)?;
    let (stats, moods, goals) =
        tokio::try_join!(backend.statistics(), backend.mood_trends(), backend.goals())?;
    print!("{}", output::format_statistics(&stats, &moods, goals.len()));
    Ok(())
}

pub async fn run_health(config: Config) -> Result<()> {
    let backend = connect(&config)?;
    let health = backend.health().await?;
    println!("{}", output::format_health(&health));
    Ok(())
}
