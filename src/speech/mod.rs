pub mod capability;
pub mod input;
pub mod mock;
pub mod output;
pub mod terminal;

pub use capability::{
    RecognitionCapability, RecognitionErrorKind, RecognitionEvent, RecognitionFeatures,
    SpeechCapabilities, SpeechPlatform, SpeechProvider, SynthesisCapability, SynthesisEvent,
    UtteranceId, Voice, VoiceQuality,
};
pub use input::{InputEvent, SpeechInputController};
pub use output::{Completion, FallbackPolicy, SpeechOutcome, SpeechOutputController};
