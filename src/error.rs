//! Error types for wellvoice.

use crate::speech::capability::RecognitionErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WellvoiceError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Backend errors
    #[error("Connection error: {message}")]
    Connection { message: String },

    // Session errors
    #[error("Session initialization failed: {message}")]
    Initialization { message: String },

    // Speech errors
    #[error("Speech {capability} is not supported on this platform")]
    Unsupported { capability: String },

    #[error("Speech recognition error: {kind}")]
    Recognition { kind: RecognitionErrorKind },

    #[error("Speech playback failed: {message}")]
    Playback { message: String },

    // Message pipeline errors
    #[error("Message is empty")]
    EmptyInput,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl WellvoiceError {
    /// Shorthand for a [`WellvoiceError::Connection`].
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, WellvoiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = WellvoiceError::ConfigInvalidValue {
            key: "turn.max_restart_attempts".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for turn.max_restart_attempts: must be at least 1"
        );
    }

    #[test]
    fn test_connection_display() {
        let error = WellvoiceError::connection("status 503");
        assert_eq!(error.to_string(), "Connection error: status 503");
    }

    #[test]
    fn test_initialization_display() {
        let error = WellvoiceError::Initialization {
            message: "no session after 4s".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Session initialization failed: no session after 4s"
        );
    }

    #[test]
    fn test_unsupported_display() {
        let error = WellvoiceError::Unsupported {
            capability: "recognition".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Speech recognition is not supported on this platform"
        );
    }

    #[test]
    fn test_recognition_display_includes_kind() {
        let error = WellvoiceError::Recognition {
            kind: RecognitionErrorKind::LanguageNotSupported,
        };
        assert_eq!(
            error.to_string(),
            "Speech recognition error: language not supported"
        );
    }

    #[test]
    fn test_empty_input_display() {
        assert_eq!(WellvoiceError::EmptyInput.to_string(), "Message is empty");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: WellvoiceError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: WellvoiceError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<WellvoiceError>();
        assert_sync::<WellvoiceError>();
    }
}
