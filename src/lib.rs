//! wellvoice - Voice conversation orchestrator for a wellness companion
//!
//! Turn-taking between the user's speech and the companion's spoken replies,
//! on top of pluggable speech engines and a remote companion backend.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod output;
pub mod speech;

// Composition root for the terminal front end
#[cfg(all(feature = "cli", feature = "http"))]
pub mod app;

// Seams (backend, speech engines)
pub use backend::{Backend, MockBackend};
#[cfg(feature = "http")]
pub use backend::HttpBackend;
pub use speech::{RecognitionCapability, SpeechCapabilities, SpeechProvider, SynthesisCapability};

// Conversation
pub use conversation::{
    Conversation, ConversationEvent, ConversationHandle, ConversationSettings, ConversationState,
};

// Error handling
pub use error::{Result, WellvoiceError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
