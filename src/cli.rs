//! Command-line interface for wellvoice
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Talk with your wellness companion
#[derive(Parser, Debug)]
#[command(name = "wellvoice", version, about = "Talk with your wellness companion")]
pub struct Cli {
    /// Subcommand to execute (default: chat)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: state changes, -vv: debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Backend base URL (overrides config and environment)
    #[arg(long, global = true, value_name = "URL")]
    pub api_base: Option<String>,

    /// Backend request timeout. Examples: 15s, 1500ms, 1m
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_duration_ms)]
    pub timeout: Option<u64>,
}

/// Parse a duration string into milliseconds.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`15s`, `1500ms`, `1m30s`).
fn parse_duration_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a conversation in the terminal
    Chat {
        /// Keep listening after every reply (conversation mode)
        #[arg(long)]
        latched: bool,

        /// Don't start the session with a spoken greeting
        #[arg(long)]
        no_greeting: bool,

        /// Disable the terminal speech engines; type messages only
        #[arg(long)]
        text_only: bool,

        /// Terminal playback never reports completion (relies on the fallback timer)
        #[arg(long)]
        silent_engine: bool,

        /// Base playback fallback delay. Examples: 8s, 2500ms
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_ms)]
        fallback: Option<u64>,

        /// Recognition locale (e.g., en-US, de-DE)
        #[arg(long, value_name = "LOCALE")]
        locale: Option<String>,

        /// Preferred synthesis voice (name or id)
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,
    },

    /// List past sessions, or show one session's messages
    History {
        /// Session id to show
        session: Option<String>,
    },

    /// Show usage statistics, mood trends and goals
    Stats,

    /// Check that the backend is reachable
    Health,

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, environment and defaults)
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
