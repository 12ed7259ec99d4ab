//! Terminal speech engines: typed lines stand in for recognized speech and
//! playback is simulated with a reading-time estimate.

use crate::error::Result;
use crate::speech::capability::{
    RecognitionCapability, RecognitionEvent, RecognitionFeatures, RecognitionSink,
    SpeechPlatform, SpeechProvider, SynthesisCapability, SynthesisEvent, SynthesisSink,
    UtteranceId, Voice,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

const PER_WORD: Duration = Duration::from_millis(250);
const MIN_READING_TIME: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Continuous recognizer fed with lines of text.
#[derive(Default)]
pub struct TerminalRecognizer {
    sink: Mutex<Option<RecognitionSink>>,
    listening: AtomicBool,
}

impl TerminalRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Deliver a typed line as a final result. Returns `false` when the
    /// recognizer is not listening and the line was not consumed.
    pub fn feed(&self, line: &str) -> bool {
        if !self.is_listening() || line.trim().is_empty() {
            return false;
        }
        self.emit(RecognitionEvent::Final(line.trim().to_string()));
        true
    }

    fn emit(&self, event: RecognitionEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.send(event).ok();
        }
    }
}

#[async_trait]
impl RecognitionCapability for TerminalRecognizer {
    fn features(&self) -> RecognitionFeatures {
        RecognitionFeatures {
            continuous: true,
            interim_results: false,
        }
    }

    fn attach(&self, sink: RecognitionSink) {
        *lock(&self.sink) = Some(sink);
    }

    async fn start(&self, locale: &str) -> Result<()> {
        tracing::debug!(locale, "terminal recognizer listening");
        if !self.listening.swap(true, Ordering::SeqCst) {
            self.emit(RecognitionEvent::Started);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.emit(RecognitionEvent::Ended);
        }
        Ok(())
    }
}

/// Estimated time to read `text` aloud.
pub fn reading_time(text: &str) -> Duration {
    let words = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
    PER_WORD.saturating_mul(words).max(MIN_READING_TIME)
}

struct Playback {
    utterance: UtteranceId,
    task: Option<JoinHandle<()>>,
}

/// Synthesizer that "plays" for as long as reading the text would take.
pub struct TerminalSynthesizer {
    sink: Arc<Mutex<Option<SynthesisSink>>>,
    playback: Mutex<Option<Playback>>,
    silent: bool,
}

impl TerminalSynthesizer {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
            playback: Mutex::new(None),
            silent: false,
        }
    }

    /// Never reports completion, leaving it to the playback fallback timer.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new()
        }
    }

    fn emit(sink: &Mutex<Option<SynthesisSink>>, event: SynthesisEvent) {
        if let Some(sink) = lock(sink).as_ref() {
            sink.send(event).ok();
        }
    }
}

impl Default for TerminalSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisCapability for TerminalSynthesizer {
    fn attach(&self, sink: SynthesisSink) {
        *lock(&self.sink) = Some(sink);
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    async fn speak(&self, utterance: UtteranceId, text: &str, _voice: Option<&Voice>) -> Result<()> {
        let previous = lock(&self.playback).take();
        if let Some(task) = previous.and_then(|p| p.task) {
            task.abort();
        }

        Self::emit(&self.sink, SynthesisEvent::Started(utterance));
        let task = (!self.silent).then(|| {
            let sink = Arc::clone(&self.sink);
            let duration = reading_time(text);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                Self::emit(&sink, SynthesisEvent::Finished(utterance));
            })
        });
        *lock(&self.playback) = Some(Playback { utterance, task });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(playback) = lock(&self.playback).take() else {
            return Ok(());
        };
        let was_running = playback.task.as_ref().is_some_and(|t| !t.is_finished());
        if let Some(task) = playback.task {
            task.abort();
        }
        if was_running || self.silent {
            Self::emit(&self.sink, SynthesisEvent::Cancelled(playback.utterance));
        }
        Ok(())
    }
}

/// Provider wrapping the terminal engines. Always available.
pub struct TerminalProvider {
    recognizer: Arc<TerminalRecognizer>,
    synthesizer: Arc<TerminalSynthesizer>,
}

impl TerminalProvider {
    pub fn new(recognizer: Arc<TerminalRecognizer>, synthesizer: Arc<TerminalSynthesizer>) -> Self {
        Self {
            recognizer,
            synthesizer,
        }
    }
}

impl SpeechProvider for TerminalProvider {
    fn platform(&self) -> SpeechPlatform {
        SpeechPlatform::Terminal
    }

    fn is_available(&self) -> bool {
        true
    }

    fn recognition(&self) -> Option<Arc<dyn RecognitionCapability>> {
        Some(self.recognizer.clone())
    }

    fn synthesis(&self) -> Option<Arc<dyn SynthesisCapability>> {
        Some(self.synthesizer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_reading_time_scales_with_words() {
        assert_eq!(reading_time(""), MIN_READING_TIME);
        assert_eq!(reading_time("one two three four"), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_feed_only_while_listening() {
        let recognizer = TerminalRecognizer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        recognizer.attach(tx);

        assert!(!recognizer.feed("ignored"));

        recognizer.start("en-US").await.unwrap();
        assert_eq!(rx.recv().await, Some(RecognitionEvent::Started));
        assert!(recognizer.feed("  I had a long day  "));
        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Final("I had a long day".to_string()))
        );

        recognizer.stop().await.unwrap();
        assert_eq!(rx.recv().await, Some(RecognitionEvent::Ended));
        assert!(!recognizer.feed("after stop"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesizer_finishes_after_reading_time() {
        let synth = TerminalSynthesizer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        synth.attach(tx);

        synth.speak(UtteranceId(4), "take a deep breath", None).await.unwrap();

        assert_eq!(rx.recv().await, Some(SynthesisEvent::Started(UtteranceId(4))));
        assert_eq!(rx.recv().await, Some(SynthesisEvent::Finished(UtteranceId(4))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_playback() {
        let synth = TerminalSynthesizer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        synth.attach(tx);

        synth.speak(UtteranceId(1), "a b c d e f", None).await.unwrap();
        synth.stop().await.unwrap();

        assert_eq!(rx.recv().await, Some(SynthesisEvent::Started(UtteranceId(1))));
        assert_eq!(rx.recv().await, Some(SynthesisEvent::Cancelled(UtteranceId(1))));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
