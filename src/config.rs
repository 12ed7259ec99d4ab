use crate::conversation::orchestrator::ConversationSettings;
use crate::conversation::restart::RestartPolicy;
use crate::conversation::session::SessionTiming;
use crate::defaults;
use crate::error::WellvoiceError;
use crate::speech::output::FallbackPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub speech: SpeechConfig,
    pub turn: TurnConfig,
    pub session: SessionConfig,
}

/// Companion backend connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base: String,
    pub auth_token: String,
    pub request_timeout_ms: u64,
}

/// Recognition and playback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechConfig {
    pub locale: String,
    /// Preferred synthesis voice (name or id); platform default when unset.
    pub voice: Option<String>,
    pub fallback_ms: u64,
    pub fallback_per_char_ms: u64,
    pub fallback_max_ms: u64,
    pub release_timeout_ms: u64,
}

/// Turn-taking and recognition restarts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnConfig {
    /// Start in continuous conversation mode.
    pub latched: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub restart_cooldown_ms: u64,
    pub max_restart_attempts: u32,
}

/// Session lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub greeting: String,
    pub apology: String,
    pub poll_interval_ms: u64,
    pub wait_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::API_BASE.to_string(),
            auth_token: defaults::AUTH_TOKEN.to_string(),
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            locale: defaults::LOCALE.to_string(),
            voice: None,
            fallback_ms: defaults::PLAYBACK_FALLBACK_MS,
            fallback_per_char_ms: defaults::PLAYBACK_FALLBACK_PER_CHAR_MS,
            fallback_max_ms: defaults::PLAYBACK_FALLBACK_MAX_MS,
            release_timeout_ms: defaults::INPUT_RELEASE_TIMEOUT_MS,
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            latched: false,
            initial_backoff_ms: defaults::INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::MAX_BACKOFF_MS,
            restart_cooldown_ms: defaults::RESTART_COOLDOWN_MS,
            max_restart_attempts: defaults::MAX_RESTART_ATTEMPTS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: defaults::GREETING.to_string(),
            apology: defaults::APOLOGY.to_string(),
            poll_interval_ms: defaults::SESSION_POLL_INTERVAL_MS,
            wait_ms: defaults::SESSION_WAIT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to load config from {}", path.display())),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - WELLVOICE_API_BASE (or API_BASE) → backend.api_base
    /// - WELLVOICE_AUTH_TOKEN → backend.auth_token
    /// - WELLVOICE_LOCALE → speech.locale
    pub fn with_env_overrides(mut self) -> Self {
        let api_base = ["WELLVOICE_API_BASE", "API_BASE"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|value| !value.is_empty());
        if let Some(api_base) = api_base {
            self.backend.api_base = api_base;
        }

        if let Ok(token) = std::env::var("WELLVOICE_AUTH_TOKEN")
            && !token.is_empty()
        {
            self.backend.auth_token = token;
        }

        if let Ok(locale) = std::env::var("WELLVOICE_LOCALE")
            && !locale.is_empty()
        {
            self.speech.locale = locale;
        }

        self
    }

    /// Reject values the conversation cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        fn invalid(key: &str, message: &str) -> crate::error::Result<()> {
            Err(WellvoiceError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        }

        let base = &self.backend.api_base;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return invalid("backend.api_base", "must start with http:// or https://");
        }
        if self.backend.request_timeout_ms == 0 {
            return invalid("backend.request_timeout_ms", "must be greater than 0");
        }
        if self.speech.locale.trim().is_empty() {
            return invalid("speech.locale", "must not be empty");
        }
        if self.speech.fallback_ms == 0 {
            return invalid("speech.fallback_ms", "must be greater than 0");
        }
        if self.speech.fallback_max_ms < self.speech.fallback_ms {
            return invalid("speech.fallback_max_ms", "must be at least speech.fallback_ms");
        }
        if self.turn.max_restart_attempts == 0 {
            return invalid("turn.max_restart_attempts", "must be at least 1");
        }
        if self.turn.initial_backoff_ms == 0 {
            return invalid("turn.initial_backoff_ms", "must be greater than 0");
        }
        if self.turn.max_backoff_ms < self.turn.initial_backoff_ms {
            return invalid("turn.max_backoff_ms", "must be at least turn.initial_backoff_ms");
        }
        if self.session.poll_interval_ms == 0 {
            return invalid("session.poll_interval_ms", "must be greater than 0");
        }
        if self.session.wait_ms < self.session.poll_interval_ms {
            return invalid("session.wait_ms", "must be at least session.poll_interval_ms");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms)
    }

    /// Conversation tunables derived from this configuration.
    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            locale: self.speech.locale.clone(),
            voice: self.speech.voice.clone(),
            greeting: self.session.greeting.clone(),
            apology: self.session.apology.clone(),
            latched: self.turn.latched,
            restart: RestartPolicy {
                initial_backoff: Duration::from_millis(self.turn.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.turn.max_backoff_ms),
                cooldown: Duration::from_millis(self.turn.restart_cooldown_ms),
                max_attempts: self.turn.max_restart_attempts,
            },
            fallback: FallbackPolicy {
                base: Duration::from_millis(self.speech.fallback_ms),
                per_char: Duration::from_millis(self.speech.fallback_per_char_ms),
                max: Duration::from_millis(self.speech.fallback_max_ms),
            },
            session: SessionTiming {
                poll_interval: Duration::from_millis(self.session.poll_interval_ms),
                wait_limit: Duration::from_millis(self.session.wait_ms),
            },
            release_timeout: Duration::from_millis(self.speech.release_timeout_ms),
        }
    }

    /// Serialize to TOML (for `config show` / `config init`).
    pub fn to_toml(&self) -> crate::error::Result<String> {
        toml::to_string_pretty(self).map_err(|e| WellvoiceError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/wellvoice/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wellvoice")
            .join("config.toml")
    }
}
