//! Platform speech capabilities behind one interface.
//!
//! A host registers its speech engines as [`SpeechProvider`]s; the first
//! available one is selected once at startup by [`SpeechCapabilities::select`].
//! Engines report what happens through event sinks rather than callbacks, so
//! the conversation driver has a single place where engine events arrive.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one `speak()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Runtime environment the speech engines come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechPlatform {
    /// Browser Web Speech API (continuous recognition with interim results).
    WebSpeech,
    /// Native mobile speech modules (single-shot recognition).
    NativeSpeech,
    /// Line-based terminal stand-in used by the CLI.
    Terminal,
    /// No speech engines: text input only.
    Unavailable,
}

impl fmt::Display for SpeechPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpeechPlatform::WebSpeech => "web speech",
            SpeechPlatform::NativeSpeech => "native speech",
            SpeechPlatform::Terminal => "terminal",
            SpeechPlatform::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// What a recognition engine can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionFeatures {
    /// Keeps listening after a final result instead of ending.
    pub continuous: bool,
    /// Emits partial results while the user is still speaking.
    pub interim_results: bool,
}

/// Why recognition failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionErrorKind {
    LanguageNotSupported,
    ServiceNotAllowed,
    PermissionDenied,
    NoSpeech,
    AudioCapture,
    Network,
    Aborted,
    Other(String),
}

impl RecognitionErrorKind {
    /// Errors that will never go away by retrying on this platform.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            RecognitionErrorKind::LanguageNotSupported | RecognitionErrorKind::ServiceNotAllowed
        )
    }

    /// Errors after which continuous listening must be switched off.
    pub fn is_fatal(&self) -> bool {
        self.is_unsupported() || matches!(self, RecognitionErrorKind::PermissionDenied)
    }

    /// Map a platform error code (Web Speech or native) to a kind.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "language-not-supported" | "language_not_supported" | "unsupported-language" => {
                RecognitionErrorKind::LanguageNotSupported
            }
            "service-not-allowed" | "service_not_allowed" => RecognitionErrorKind::ServiceNotAllowed,
            "not-allowed" | "permission-denied" | "permissions" => {
                RecognitionErrorKind::PermissionDenied
            }
            "no-speech" | "no_match" | "no-match" | "speech_timeout" => {
                RecognitionErrorKind::NoSpeech
            }
            "audio-capture" | "audio" => RecognitionErrorKind::AudioCapture,
            "network" | "network_timeout" => RecognitionErrorKind::Network,
            "aborted" => RecognitionErrorKind::Aborted,
            other => RecognitionErrorKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionErrorKind::LanguageNotSupported => f.write_str("language not supported"),
            RecognitionErrorKind::ServiceNotAllowed => f.write_str("service not allowed"),
            RecognitionErrorKind::PermissionDenied => f.write_str("microphone permission denied"),
            RecognitionErrorKind::NoSpeech => f.write_str("no speech detected"),
            RecognitionErrorKind::AudioCapture => f.write_str("audio capture failed"),
            RecognitionErrorKind::Network => f.write_str("network error"),
            RecognitionErrorKind::Aborted => f.write_str("aborted"),
            RecognitionErrorKind::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Raw events emitted by a recognition engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Started,
    Partial(String),
    Final(String),
    Ended,
    Error(RecognitionErrorKind),
}

/// Raw events emitted by a synthesis engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Started(UtteranceId),
    Finished(UtteranceId),
    Cancelled(UtteranceId),
    Error(UtteranceId, String),
}

pub type RecognitionSink = mpsc::UnboundedSender<RecognitionEvent>;
pub type SynthesisSink = mpsc::UnboundedSender<SynthesisEvent>;

/// Quality tier reported by the platform for a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceQuality {
    Default,
    Enhanced,
}

/// A synthesis voice offered by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub language: String,
    pub quality: VoiceQuality,
}

/// Speech-to-text engine.
#[async_trait]
pub trait RecognitionCapability: Send + Sync {
    fn features(&self) -> RecognitionFeatures;

    /// Register the sink receiving this engine's events. Called once.
    fn attach(&self, sink: RecognitionSink);

    /// Begin capturing. `Started` arrives through the sink once the mic is live.
    async fn start(&self, locale: &str) -> Result<()>;

    /// Stop capturing. `Ended` arrives through the sink once the mic is released.
    async fn stop(&self) -> Result<()>;
}

/// Text-to-speech engine.
#[async_trait]
pub trait SynthesisCapability: Send + Sync {
    /// Register the sink receiving this engine's events. Called once.
    fn attach(&self, sink: SynthesisSink);

    /// Voices the platform can enumerate (may be empty).
    fn voices(&self) -> Vec<Voice>;

    /// Begin playback; returns once playback was accepted, not when it ends.
    async fn speak(&self, utterance: UtteranceId, text: &str, voice: Option<&Voice>) -> Result<()>;

    /// Cancel current playback.
    async fn stop(&self) -> Result<()>;
}

/// A source of speech engines for one runtime environment.
pub trait SpeechProvider: Send {
    fn platform(&self) -> SpeechPlatform;

    /// Probe the runtime for this provider's engines.
    fn is_available(&self) -> bool;

    fn recognition(&self) -> Option<Arc<dyn RecognitionCapability>>;

    fn synthesis(&self) -> Option<Arc<dyn SynthesisCapability>>;
}

/// The engines selected for this process.
#[derive(Clone)]
pub struct SpeechCapabilities {
    pub platform: SpeechPlatform,
    pub recognition: Option<Arc<dyn RecognitionCapability>>,
    pub synthesis: Option<Arc<dyn SynthesisCapability>>,
}

impl SpeechCapabilities {
    /// Text-only: no engines at all.
    pub fn unavailable() -> Self {
        Self {
            platform: SpeechPlatform::Unavailable,
            recognition: None,
            synthesis: None,
        }
    }

    /// Pick the first available provider, in order of preference.
    pub fn select(providers: Vec<Box<dyn SpeechProvider>>) -> Self {
        for provider in providers {
            if !provider.is_available() {
                tracing::debug!(platform = %provider.platform(), "speech provider unavailable");
                continue;
            }
            let recognition = provider.recognition();
            let synthesis = provider.synthesis();
            if recognition.is_none() && synthesis.is_none() {
                continue;
            }
            tracing::info!(
                platform = %provider.platform(),
                recognition = recognition.is_some(),
                synthesis = synthesis.is_some(),
                "speech capabilities selected"
            );
            return Self {
                platform: provider.platform(),
                recognition,
                synthesis,
            };
        }
        tracing::info!("no speech provider available, text input only");
        Self::unavailable()
    }

    pub fn has_recognition(&self) -> bool {
        self.recognition.is_some()
    }

    pub fn has_synthesis(&self) -> bool {
        self.synthesis.is_some()
    }
}

impl fmt::Debug for SpeechCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechCapabilities")
            .field("platform", &self.platform)
            .field("recognition", &self.recognition.is_some())
            .field("synthesis", &self.synthesis.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::mock::{MockRecognizer, MockSpeechProvider, MockSynthesizer};

    #[test]
    fn test_unsupported_kinds() {
        assert!(RecognitionErrorKind::LanguageNotSupported.is_unsupported());
        assert!(RecognitionErrorKind::ServiceNotAllowed.is_unsupported());
        assert!(!RecognitionErrorKind::NoSpeech.is_unsupported());
        assert!(!RecognitionErrorKind::Network.is_unsupported());
        assert!(RecognitionErrorKind::PermissionDenied.is_fatal());
        assert!(!RecognitionErrorKind::PermissionDenied.is_unsupported());
        assert!(!RecognitionErrorKind::NoSpeech.is_fatal());
    }

    #[test]
    fn test_from_code_maps_web_and_native_codes() {
        assert_eq!(
            RecognitionErrorKind::from_code("language-not-supported"),
            RecognitionErrorKind::LanguageNotSupported
        );
        assert_eq!(
            RecognitionErrorKind::from_code("not-allowed"),
            RecognitionErrorKind::PermissionDenied
        );
        assert_eq!(
            RecognitionErrorKind::from_code("no_match"),
            RecognitionErrorKind::NoSpeech
        );
        assert_eq!(
            RecognitionErrorKind::from_code("weird"),
            RecognitionErrorKind::Other("weird".to_string())
        );
    }

    #[test]
    fn test_select_skips_unavailable_providers() {
        let providers: Vec<Box<dyn SpeechProvider>> = vec![
            Box::new(MockSpeechProvider::unavailable(SpeechPlatform::WebSpeech)),
            Box::new(MockSpeechProvider::new(
                SpeechPlatform::NativeSpeech,
                Some(Arc::new(MockRecognizer::new())),
                Some(Arc::new(MockSynthesizer::new())),
            )),
        ];

        let caps = SpeechCapabilities::select(providers);

        assert_eq!(caps.platform, SpeechPlatform::NativeSpeech);
        assert!(caps.has_recognition());
        assert!(caps.has_synthesis());
    }

    #[test]
    fn test_select_without_providers_is_unavailable() {
        let caps = SpeechCapabilities::select(Vec::new());
        assert_eq!(caps.platform, SpeechPlatform::Unavailable);
        assert!(!caps.has_recognition());
        assert!(!caps.has_synthesis());
    }

    #[test]
    fn test_select_keeps_synthesis_only_provider() {
        let providers: Vec<Box<dyn SpeechProvider>> = vec![Box::new(MockSpeechProvider::new(
            SpeechPlatform::WebSpeech,
            None,
            Some(Arc::new(MockSynthesizer::new())),
        ))];

        let caps = SpeechCapabilities::select(providers);

        assert_eq!(caps.platform, SpeechPlatform::WebSpeech);
        assert!(!caps.has_recognition());
        assert!(caps.has_synthesis());
    }
}
