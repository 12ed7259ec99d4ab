//! Scriptable speech engines for tests and demos.

use crate::error::{Result, WellvoiceError};
use crate::speech::capability::{
    RecognitionCapability, RecognitionErrorKind, RecognitionEvent, RecognitionFeatures,
    RecognitionSink, SpeechPlatform, SpeechProvider, SynthesisCapability, SynthesisEvent,
    SynthesisSink, UtteranceId, Voice,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Recognition engine driven by the test: it records calls and emits
/// whatever events the test asks for.
pub struct MockRecognizer {
    features: RecognitionFeatures,
    sink: Mutex<Option<RecognitionSink>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    listening: AtomicBool,
    failing_starts: AtomicUsize,
    unsupported: bool,
    announce_start: bool,
    report_end: bool,
    locales: Mutex<Vec<String>>,
}

impl MockRecognizer {
    /// Continuous engine with interim results that confirms every start and stop.
    pub fn new() -> Self {
        Self {
            features: RecognitionFeatures {
                continuous: true,
                interim_results: true,
            },
            sink: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            listening: AtomicBool::new(false),
            failing_starts: AtomicUsize::new(0),
            unsupported: false,
            announce_start: true,
            report_end: true,
            locales: Mutex::new(Vec::new()),
        }
    }

    pub fn with_features(mut self, features: RecognitionFeatures) -> Self {
        self.features = features;
        self
    }

    /// The next `count` calls to `start()` return an error.
    pub fn with_failing_starts(self, count: usize) -> Self {
        self.failing_starts.store(count, Ordering::SeqCst);
        self
    }

    /// Every `start()` fails as unsupported.
    pub fn unsupported(mut self) -> Self {
        self.unsupported = true;
        self
    }

    /// `stop()` never reports `Ended` (engines that drop the event).
    pub fn without_end_events(mut self) -> Self {
        self.report_end = false;
        self
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn locales(&self) -> Vec<String> {
        lock(&self.locales).clone()
    }

    /// Push a raw event as if the platform produced it.
    pub fn emit(&self, event: RecognitionEvent) {
        if matches!(event, RecognitionEvent::Ended | RecognitionEvent::Error(_)) {
            self.listening.store(false, Ordering::SeqCst);
        }
        if let Some(sink) = lock(&self.sink).as_ref() {
            // Receiver gone means the conversation shut down.
            sink.send(event).ok();
        }
    }

    /// Simulate the user saying `text`: one partial (when supported) then the final.
    pub fn say(&self, text: &str) {
        if self.features.interim_results {
            self.emit(RecognitionEvent::Partial(text.to_string()));
        }
        self.emit(RecognitionEvent::Final(text.to_string()));
        if !self.features.continuous {
            self.emit(RecognitionEvent::Ended);
        }
    }

    /// Simulate a platform-side timeout ending the recognition.
    pub fn time_out(&self) {
        self.emit(RecognitionEvent::Ended);
    }

    pub fn fail(&self, kind: RecognitionErrorKind) {
        self.emit(RecognitionEvent::Error(kind));
    }
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecognitionCapability for MockRecognizer {
    fn features(&self) -> RecognitionFeatures {
        self.features
    }

    fn attach(&self, sink: RecognitionSink) {
        *lock(&self.sink) = Some(sink);
    }

    async fn start(&self, locale: &str) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        lock(&self.locales).push(locale.to_string());

        if self.unsupported {
            return Err(WellvoiceError::Unsupported {
                capability: "recognition".to_string(),
            });
        }

        let remaining = self.failing_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_starts.store(remaining - 1, Ordering::SeqCst);
            return Err(WellvoiceError::Other("microphone busy".to_string()));
        }

        self.listening.store(true, Ordering::SeqCst);
        if self.announce_start {
            self.emit(RecognitionEvent::Started);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.listening.swap(false, Ordering::SeqCst) && self.report_end {
            self.emit(RecognitionEvent::Ended);
        }
        Ok(())
    }
}

/// Synthesis engine that records what it was asked to say.
pub struct MockSynthesizer {
    sink: Mutex<Option<SynthesisSink>>,
    spoken: Mutex<Vec<(UtteranceId, String)>>,
    voices: Vec<Voice>,
    auto_finish: bool,
    failing: bool,
    stops: AtomicUsize,
    last_voice: Mutex<Option<Voice>>,
}

impl MockSynthesizer {
    /// Engine that reports `Finished` as soon as playback starts.
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            spoken: Mutex::new(Vec::new()),
            voices: Vec::new(),
            auto_finish: true,
            failing: false,
            stops: AtomicUsize::new(0),
            last_voice: Mutex::new(None),
        }
    }

    /// Engine that never reports completion on its own.
    pub fn silent() -> Self {
        Self {
            auto_finish: false,
            ..Self::new()
        }
    }

    /// Engine whose `speak()` always fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    pub fn with_voices(mut self, voices: Vec<Voice>) -> Self {
        self.voices = voices;
        self
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.spoken).iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn speak_count(&self) -> usize {
        lock(&self.spoken).len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn last_voice(&self) -> Option<Voice> {
        lock(&self.last_voice).clone()
    }

    pub fn last_utterance(&self) -> Option<UtteranceId> {
        lock(&self.spoken).last().map(|(u, _)| *u)
    }

    /// Push a raw event as if the platform produced it.
    pub fn emit(&self, event: SynthesisEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.send(event).ok();
        }
    }

    /// Report the native "finished" event for `utterance`.
    pub fn finish(&self, utterance: UtteranceId) {
        self.emit(SynthesisEvent::Finished(utterance));
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisCapability for MockSynthesizer {
    fn attach(&self, sink: SynthesisSink) {
        *lock(&self.sink) = Some(sink);
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    async fn speak(&self, utterance: UtteranceId, text: &str, voice: Option<&Voice>) -> Result<()> {
        if self.failing {
            return Err(WellvoiceError::Playback {
                message: "synthesis engine crashed".to_string(),
            });
        }
        lock(&self.spoken).push((utterance, text.to_string()));
        *lock(&self.last_voice) = voice.cloned();
        self.emit(SynthesisEvent::Started(utterance));
        if self.auto_finish {
            self.emit(SynthesisEvent::Finished(utterance));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider wrapping mock engines.
pub struct MockSpeechProvider {
    platform: SpeechPlatform,
    available: bool,
    recognition: Option<Arc<dyn RecognitionCapability>>,
    synthesis: Option<Arc<dyn SynthesisCapability>>,
}

impl MockSpeechProvider {
    pub fn new(
        platform: SpeechPlatform,
        recognition: Option<Arc<dyn RecognitionCapability>>,
        synthesis: Option<Arc<dyn SynthesisCapability>>,
    ) -> Self {
        Self {
            platform,
            available: true,
            recognition,
            synthesis,
        }
    }

    pub fn unavailable(platform: SpeechPlatform) -> Self {
        Self {
            platform,
            available: false,
            recognition: None,
            synthesis: None,
        }
    }
}

impl SpeechProvider for MockSpeechProvider {
    fn platform(&self) -> SpeechPlatform {
        self.platform
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn recognition(&self) -> Option<Arc<dyn RecognitionCapability>> {
        self.recognition.clone()
    }

    fn synthesis(&self) -> Option<Arc<dyn SynthesisCapability>> {
        self.synthesis.clone()
    }
}
