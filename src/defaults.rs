//! Default configuration constants for wellvoice.
//!
//! Shared by the config sections and the components that fall back to them
//! when built without a config file.

/// Default backend base URL (local development server).
pub const API_BASE: &str = "http://localhost:8000";

/// Placeholder bearer token sent until a real auth provider exists.
pub const AUTH_TOKEN: &str = "demo-token";

/// Timeout for a single backend request in milliseconds.
pub const REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Default recognition locale.
pub const LOCALE: &str = "en-US";

/// Greeting spoken when a session is started explicitly.
pub const GREETING: &str = "Hello! I'm Alex, your AI therapy companion. I'm here to listen and support you. How are you feeling today?";

/// Apology appended when the backend could not produce a reply.
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again in a moment.";

/// Interval between polls while another task is creating the session.
pub const SESSION_POLL_INTERVAL_MS: u64 = 200;

/// Upper bound on waiting for an in-flight session creation.
pub const SESSION_WAIT_MS: u64 = 4_000;

/// First auto-restart delay for recognition.
pub const INITIAL_BACKOFF_MS: u64 = 200;

/// Cap on the auto-restart delay.
pub const MAX_BACKOFF_MS: u64 = 3_000;

/// Minimum spacing between two recognition restarts.
pub const RESTART_COOLDOWN_MS: u64 = 1_000;

/// Consecutive failed starts before the forced start.
pub const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Base fallback delay after which playback counts as finished.
pub const PLAYBACK_FALLBACK_MS: u64 = 8_000;

/// Extra fallback allowance per character of spoken text.
pub const PLAYBACK_FALLBACK_PER_CHAR_MS: u64 = 60;

/// Hard cap on the playback fallback delay.
pub const PLAYBACK_FALLBACK_MAX_MS: u64 = 30_000;

/// How long to wait for the microphone to be released before speaking.
pub const INPUT_RELEASE_TIMEOUT_MS: u64 = 1_500;
