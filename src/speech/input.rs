//! Speech input controller: one interface over whichever recognition engine
//! the platform offers.
//!
//! The controller never restarts recognition by itself. It turns raw engine
//! events into [`InputEvent`]s and leaves every start/stop decision to the
//! turn coordinator.

use crate::error::{Result, WellvoiceError};
use crate::speech::capability::{
    RecognitionCapability, RecognitionErrorKind, RecognitionEvent, RecognitionFeatures,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Normalized recognition events.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Started,
    Interim(String),
    Final(String),
    /// Capture ended; `explicit` when it was requested through [`SpeechInputController::stop`].
    Ended {
        explicit: bool,
    },
    Error(RecognitionErrorKind),
}

#[derive(Debug, Default)]
struct Utterance {
    /// Latest interim text (never concatenated).
    buffer: String,
    /// Final already delivered for the current utterance.
    delivered: Option<String>,
}

pub struct SpeechInputController {
    capability: Option<Arc<dyn RecognitionCapability>>,
    locale: String,
    utterance: Mutex<Utterance>,
    stop_requested: AtomicBool,
    active_tx: watch::Sender<bool>,
}

impl SpeechInputController {
    /// Create the controller and the stream of raw engine events it expects
    /// to be fed through [`handle_event`](Self::handle_event).
    pub fn new(
        capability: Option<Arc<dyn RecognitionCapability>>,
        locale: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<RecognitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(ref capability) = capability {
            capability.attach(tx);
        }
        let (active_tx, _) = watch::channel(false);
        let controller = Self {
            capability,
            locale: locale.into(),
            utterance: Mutex::new(Utterance::default()),
            stop_requested: AtomicBool::new(false),
            active_tx,
        };
        (controller, rx)
    }

    pub fn is_supported(&self) -> bool {
        self.capability.is_some()
    }

    pub fn features(&self) -> Option<RecognitionFeatures> {
        self.capability.as_ref().map(|c| c.features())
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// True from a successful `start()` until the engine reports it let go of the mic.
    pub fn is_active(&self) -> bool {
        *self.active_tx.borrow()
    }

    /// Current interim transcript.
    pub fn interim(&self) -> String {
        self.lock().buffer.clone()
    }

    pub fn clear_interim(&self) {
        self.lock().buffer.clear();
    }

    /// Begin capture.
    ///
    /// # Errors
    /// `WellvoiceError::Unsupported` when the platform has no recognition engine;
    /// whatever the engine reports otherwise.
    pub async fn start(&self) -> Result<()> {
        let capability = self
            .capability
            .as_ref()
            .ok_or_else(|| WellvoiceError::Unsupported {
                capability: "recognition".to_string(),
            })?;

        self.stop_requested.store(false, Ordering::SeqCst);
        {
            let mut utterance = self.lock();
            utterance.buffer.clear();
            utterance.delivered = None;
        }

        capability.start(&self.locale).await?;
        self.active_tx.send_replace(true);
        Ok(())
    }

    /// Stop capture. Idempotent: does nothing when the mic is not held.
    pub async fn stop(&self) -> Result<()> {
        let Some(capability) = self.capability.as_ref() else {
            return Ok(());
        };
        if !self.is_active() {
            return Ok(());
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        capability.stop().await
    }

    /// Wait until the engine has released the microphone, at most `timeout`.
    ///
    /// Returns `false` if the engine never confirmed; callers proceed anyway
    /// since some engines drop their end event.
    pub async fn wait_released(&self, timeout: Duration) -> bool {
        let mut rx = self.active_tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|active| !*active)).await {
            // A closed channel also means nobody holds the mic.
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(?timeout, "recognition did not confirm release, continuing");
                self.active_tx.send_replace(false);
                false
            }
        }
    }

    /// Normalize one raw engine event. Returns `None` for events that carry
    /// nothing new (duplicate finals, interim text on engines without it).
    pub fn handle_event(&self, event: RecognitionEvent) -> Option<InputEvent> {
        match event {
            RecognitionEvent::Started => {
                self.lock().delivered = None;
                Some(InputEvent::Started)
            }
            RecognitionEvent::Partial(text) => {
                let interim_supported = self.features().is_some_and(|f| f.interim_results);
                if !interim_supported {
                    return None;
                }
                let mut utterance = self.lock();
                utterance.delivered = None;
                utterance.buffer = text.clone();
                Some(InputEvent::Interim(text))
            }
            RecognitionEvent::Final(text) => {
                let text = text.trim().to_string();
                let mut utterance = self.lock();
                utterance.buffer.clear();
                if text.is_empty() {
                    return None;
                }
                if utterance.delivered.as_deref() == Some(text.as_str()) {
                    tracing::debug!(%text, "dropping duplicate final result");
                    return None;
                }
                utterance.delivered = Some(text.clone());
                Some(InputEvent::Final(text))
            }
            RecognitionEvent::Ended => {
                self.active_tx.send_replace(false);
                let explicit = self.stop_requested.swap(false, Ordering::SeqCst);
                Some(InputEvent::Ended { explicit })
            }
            RecognitionEvent::Error(kind) => {
                self.active_tx.send_replace(false);
                self.lock().buffer.clear();
                Some(InputEvent::Error(kind))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Utterance> {
        self.utterance.lock().unwrap_or_else(|e| e.into_inner())
    }
}
