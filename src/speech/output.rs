//! Speech output controller: playback with a completion that always arrives.
//!
//! Platform "finished" events are not reliable, so every utterance also arms a
//! fallback timer. Whichever fires first resolves the utterance's completion;
//! the other becomes a no-op.

use crate::defaults;
use crate::error::Result;
use crate::speech::capability::{SynthesisCapability, SynthesisEvent, UtteranceId, Voice, VoiceQuality};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How an utterance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// The engine reported the end of playback.
    Finished,
    /// No engine event arrived before the fallback timer.
    FallbackTimeout,
    /// Stopped before it finished.
    Cancelled,
    /// The engine failed; the text is still readable on screen.
    Failed(String),
    /// No synthesis engine on this platform.
    Skipped,
}

impl SpeechOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SpeechOutcome::Failed(_))
    }
}

struct LatchSlot {
    tx: Option<oneshot::Sender<SpeechOutcome>>,
    outcome: Option<SpeechOutcome>,
}

/// Single-resolution slot: the first `resolve` wins.
#[derive(Clone)]
struct CompletionLatch(Arc<Mutex<LatchSlot>>);

impl CompletionLatch {
    fn new() -> (Self, oneshot::Receiver<SpeechOutcome>) {
        let (tx, rx) = oneshot::channel();
        let slot = LatchSlot {
            tx: Some(tx),
            outcome: None,
        };
        (Self(Arc::new(Mutex::new(slot))), rx)
    }

    fn resolve(&self, outcome: SpeechOutcome) -> bool {
        let mut slot = self.lock();
        let Some(tx) = slot.tx.take() else {
            return false;
        };
        slot.outcome = Some(outcome.clone());
        // A dropped receiver means nobody waits; the slot is still spent.
        tx.send(outcome).ok();
        true
    }

    fn is_resolved(&self) -> bool {
        self.lock().tx.is_none()
    }

    /// The winning outcome, once resolved.
    fn outcome(&self) -> Option<SpeechOutcome> {
        self.lock().outcome.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LatchSlot> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Completion of one utterance.
pub struct Completion {
    utterance: UtteranceId,
    rx: oneshot::Receiver<SpeechOutcome>,
}

impl Completion {
    pub fn utterance(&self) -> UtteranceId {
        self.utterance
    }

    pub async fn wait(self) -> SpeechOutcome {
        self.rx.await.unwrap_or(SpeechOutcome::Cancelled)
    }
}

/// Fallback delay for an utterance: grows with the text, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub base: Duration,
    pub per_char: Duration,
    pub max: Duration,
}

impl FallbackPolicy {
    pub fn delay_for(&self, text: &str) -> Duration {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.per_char.saturating_mul(chars))
            .min(self.max)
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(defaults::PLAYBACK_FALLBACK_MS),
            per_char: Duration::from_millis(defaults::PLAYBACK_FALLBACK_PER_CHAR_MS),
            max: Duration::from_millis(defaults::PLAYBACK_FALLBACK_MAX_MS),
        }
    }
}

/// Pick a voice: the configured one by name or id, then an enhanced voice in
/// the locale's language, then any enhanced voice. `None` means engine default.
pub fn choose_voice(voices: &[Voice], preferred: Option<&str>, locale: &str) -> Option<Voice> {
    if let Some(wanted) = preferred
        && let Some(voice) = voices
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(wanted) || v.id == wanted)
    {
        return Some(voice.clone());
    }

    let language = locale.split(['-', '_']).next().unwrap_or(locale);
    let enhanced = voices.iter().filter(|v| v.quality == VoiceQuality::Enhanced);
    enhanced
        .clone()
        .find(|v| v.language.to_ascii_lowercase().starts_with(&language.to_ascii_lowercase()))
        .or_else(|| enhanced.clone().next())
        .cloned()
}

struct InFlight {
    utterance: UtteranceId,
    latch: CompletionLatch,
    timer: Option<JoinHandle<()>>,
}

impl InFlight {
    fn finish(mut self, outcome: SpeechOutcome) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.latch.resolve(outcome)
    }
}

pub struct SpeechOutputController {
    capability: Option<Arc<dyn SynthesisCapability>>,
    fallback: FallbackPolicy,
    voice: Option<Voice>,
    current: Mutex<Option<InFlight>>,
}

impl SpeechOutputController {
    /// Create the controller and the stream of raw engine events it expects
    /// to be fed through [`handle_event`](Self::handle_event).
    pub fn new(
        capability: Option<Arc<dyn SynthesisCapability>>,
        fallback: FallbackPolicy,
        preferred_voice: Option<&str>,
        locale: &str,
    ) -> (Self, mpsc::UnboundedReceiver<SynthesisEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let voice = capability.as_ref().and_then(|c| {
            c.attach(tx);
            choose_voice(&c.voices(), preferred_voice, locale)
        });
        if let Some(ref voice) = voice {
            tracing::debug!(voice = %voice.name, "synthesis voice selected");
        }
        let controller = Self {
            capability,
            fallback,
            voice,
            current: Mutex::new(None),
        };
        (controller, rx)
    }

    pub fn is_supported(&self) -> bool {
        self.capability.is_some()
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    /// True while an utterance is registered and not yet resolved.
    pub fn is_speaking(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|inflight| !inflight.latch.is_resolved())
    }

    /// Register `utterance` as the current one and return its completion.
    /// A previous unfinished utterance resolves as cancelled.
    pub fn prepare(&self, utterance: UtteranceId) -> Completion {
        let (latch, rx) = CompletionLatch::new();
        let previous = self.lock().replace(InFlight {
            utterance,
            latch,
            timer: None,
        });
        if let Some(previous) = previous {
            previous.finish(SpeechOutcome::Cancelled);
        }
        Completion { utterance, rx }
    }

    /// Start playback of a prepared utterance and arm its fallback timer.
    ///
    /// The caller must have released the microphone first. Does nothing if
    /// the utterance was stopped in the meantime.
    pub async fn play(&self, utterance: UtteranceId, text: &str) -> Result<()> {
        let Some(capability) = self.capability.as_ref() else {
            self.resolve(utterance, SpeechOutcome::Skipped);
            return Ok(());
        };
        let Some(latch) = self.latch_of(utterance) else {
            return Ok(());
        };

        if let Err(e) = capability.speak(utterance, text, self.voice.as_ref()).await {
            tracing::warn!(%utterance, error = %e, "speech playback failed");
            self.resolve(utterance, SpeechOutcome::Failed(e.to_string()));
            return Err(e);
        }

        let delay = self.fallback.delay_for(text);
        let stale = {
            let mut current = self.lock();
            match current.as_mut() {
                Some(inflight) if inflight.utterance == utterance => {
                    if !inflight.latch.is_resolved() {
                        let latch = inflight.latch.clone();
                        inflight.timer = Some(tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if latch.resolve(SpeechOutcome::FallbackTimeout) {
                                tracing::warn!(%utterance, ?delay, "no playback completion event, using fallback");
                            }
                        }));
                    }
                    false
                }
                _ => true,
            }
        };

        // Stopped while the engine was starting: silence it again. An
        // utterance the engine already finished needs no stop.
        let cancelled = matches!(latch.outcome(), Some(SpeechOutcome::Cancelled));
        if stale && cancelled && let Err(e) = capability.stop().await {
            tracing::warn!(error = %e, "failed to stop stale playback");
        }
        Ok(())
    }

    /// Prepare and play in one step.
    pub async fn speak(&self, utterance: UtteranceId, text: &str) -> Completion {
        let completion = self.prepare(utterance);
        if let Err(e) = self.play(utterance, text).await {
            tracing::debug!(%utterance, error = %e, "speak resolved as failed");
        }
        completion
    }

    /// Route a raw engine event to the utterance it belongs to.
    /// Returns `true` if it resolved that utterance.
    pub fn handle_event(&self, event: SynthesisEvent) -> bool {
        match event {
            SynthesisEvent::Started(utterance) => {
                tracing::debug!(%utterance, "playback started");
                false
            }
            SynthesisEvent::Finished(utterance) => self.resolve(utterance, SpeechOutcome::Finished),
            SynthesisEvent::Cancelled(utterance) => {
                self.resolve(utterance, SpeechOutcome::Cancelled)
            }
            SynthesisEvent::Error(utterance, reason) => {
                self.resolve(utterance, SpeechOutcome::Failed(reason))
            }
        }
    }

    /// Cancel playback; the in-flight completion resolves as cancelled at once.
    pub async fn stop(&self) {
        let inflight = self.lock().take();
        let Some(inflight) = inflight else {
            return;
        };
        inflight.finish(SpeechOutcome::Cancelled);
        if let Some(capability) = self.capability.as_ref()
            && let Err(e) = capability.stop().await
        {
            tracing::warn!(error = %e, "failed to stop playback");
        }
    }

    fn resolve(&self, utterance: UtteranceId, outcome: SpeechOutcome) -> bool {
        let inflight = {
            let mut current = self.lock();
            match current.as_ref() {
                Some(inflight) if inflight.utterance == utterance => current.take(),
                _ => None,
            }
        };
        inflight.is_some_and(|inflight| inflight.finish(outcome))
    }

    fn latch_of(&self, utterance: UtteranceId) -> Option<CompletionLatch> {
        self.lock()
            .as_ref()
            .filter(|inflight| inflight.utterance == utterance)
            .map(|inflight| inflight.latch.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
