//! Conversation driver.
//!
//! One tokio task owns the [`TurnCoordinator`] and is the only place where
//! events arrive: handle commands, recognition and synthesis engine events,
//! and the results of the work it spawned (backend round-trips, playback
//! completions, restart timers). Each event is fed to the coordinator and the
//! returned actions are executed in order before the next event is taken.
//!
//! Recognition start/stop are awaited inline so they cannot reorder. Anything
//! that may take long (backend calls, playback) runs in a spawned task that
//! reports back through the internal channel.
//!
//! Session-bound results carry the session generation they were started
//! under; ending the session bumps it, so late results are dropped.

use crate::backend::{Backend, CloseSummary, SessionId};
use crate::conversation::coordinator::{Action, ConversationState, StartFailure, TurnCoordinator};
use crate::conversation::events::ConversationEvent;
use crate::conversation::notice::Notice;
use crate::conversation::pipeline::{MessagePipeline, PipelineOutcome};
use crate::conversation::restart::RestartPolicy;
use crate::conversation::session::{SessionManager, SessionStart, SessionTiming};
use crate::conversation::transcript::{Message, Transcript};
use crate::defaults;
use crate::error::{Result, WellvoiceError};
use crate::speech::capability::{
    RecognitionEvent, SpeechCapabilities, SpeechPlatform, SynthesisEvent, UtteranceId,
};
use crate::speech::input::{InputEvent, SpeechInputController};
use crate::speech::output::{FallbackPolicy, SpeechOutcome, SpeechOutputController};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 256;

/// Tunables of one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSettings {
    pub locale: String,
    /// Preferred synthesis voice name or id.
    pub voice: Option<String>,
    pub greeting: String,
    pub apology: String,
    /// Start in continuous mode.
    pub latched: bool,
    pub restart: RestartPolicy,
    pub fallback: FallbackPolicy,
    pub session: SessionTiming,
    /// Upper bound on waiting for the mic before speaking.
    pub release_timeout: Duration,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            locale: defaults::LOCALE.to_string(),
            voice: None,
            greeting: defaults::GREETING.to_string(),
            apology: defaults::APOLOGY.to_string(),
            latched: false,
            restart: RestartPolicy::default(),
            fallback: FallbackPolicy::default(),
            session: SessionTiming::default(),
            release_timeout: Duration::from_millis(defaults::INPUT_RELEASE_TIMEOUT_MS),
        }
    }
}

enum Command {
    StartSession {
        greet: bool,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    EndSession {
        reply: oneshot::Sender<Option<CloseSummary>>,
    },
    StartListening,
    Stop,
    SetLatched(bool),
    SubmitText(String),
    Shutdown,
}

enum Internal {
    SessionStarted {
        generation: u64,
        result: Result<SessionStart>,
        reply: oneshot::Sender<Result<SessionId>>,
    },
    PipelineDone {
        generation: u64,
        result: Result<PipelineOutcome>,
    },
    SpeechCompleted {
        utterance: UtteranceId,
        outcome: SpeechOutcome,
    },
    RestartDue(u64),
}

/// Client side of a running conversation. Cheap to clone.
#[derive(Clone)]
pub struct ConversationHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConversationState>,
    events: broadcast::Sender<ConversationEvent>,
    transcript: Arc<Transcript>,
    platform: SpeechPlatform,
}

impl ConversationHandle {
    /// Start a session explicitly; with `greet` the greeting is appended and spoken.
    pub async fn start_session(&self, greet: bool) -> Result<SessionId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartSession { greet, reply })?;
        rx.await.map_err(|_| closed())?
    }

    /// Stop all audio, then close the session best-effort.
    pub async fn end_session(&self) -> Result<Option<CloseSummary>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EndSession { reply })?;
        rx.await.map_err(|_| closed())
    }

    pub fn start_listening(&self) -> Result<()> {
        self.send(Command::StartListening)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn set_latched(&self, latched: bool) -> Result<()> {
        self.send(Command::SetLatched(latched))
    }

    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SubmitText(text.into()))
    }

    pub fn state(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.transcript.messages()
    }

    pub fn events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn platform(&self) -> SpeechPlatform {
        self.platform
    }

    /// Stop the driver. Audio is stopped; the session is left as is.
    pub fn shutdown(&self) {
        self.commands.send(Command::Shutdown).ok();
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| closed())
    }
}

fn closed() -> WellvoiceError {
    WellvoiceError::Other("conversation has shut down".to_string())
}

pub struct Conversation;

impl Conversation {
    /// Wire the components together and spawn the driver on the current runtime.
    pub fn spawn(
        backend: Arc<dyn Backend>,
        speech: SpeechCapabilities,
        settings: ConversationSettings,
    ) -> ConversationHandle {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let transcript = Arc::new(Transcript::with_events(events.clone()));
        let session = Arc::new(SessionManager::new(
            backend.clone(),
            transcript.clone(),
            settings.greeting.clone(),
            settings.session,
        ));
        let pipeline = Arc::new(MessagePipeline::new(
            backend,
            session.clone(),
            transcript.clone(),
            settings.apology.clone(),
        ));
        let (input, recognition_rx) =
            SpeechInputController::new(speech.recognition.clone(), settings.locale.clone());
        let (output, synthesis_rx) = SpeechOutputController::new(
            speech.synthesis.clone(),
            settings.fallback,
            settings.voice.as_deref(),
            &settings.locale,
        );

        let mut coordinator = TurnCoordinator::new(settings.restart);
        coordinator.set_latched(settings.latched, Instant::now());
        let (state_tx, state_rx) = watch::channel(coordinator.snapshot());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        tracing::info!(platform = %speech.platform, latched = settings.latched, "conversation started");

        let driver = Driver {
            coordinator,
            input: Arc::new(input),
            output: Arc::new(output),
            session,
            pipeline,
            events: events.clone(),
            state_tx,
            internal_tx,
            release_timeout: settings.release_timeout,
            session_generation: 0,
            speech_task: None,
            restart_task: None,
            pipeline_task: None,
        };
        tokio::spawn(driver.run(commands_rx, internal_rx, recognition_rx, synthesis_rx));

        ConversationHandle {
            commands: commands_tx,
            state: state_rx,
            events,
            transcript,
            platform: speech.platform,
        }
    }
}

struct Driver {
    coordinator: TurnCoordinator,
    input: Arc<SpeechInputController>,
    output: Arc<SpeechOutputController>,
    session: Arc<SessionManager>,
    pipeline: Arc<MessagePipeline>,
    events: broadcast::Sender<ConversationEvent>,
    state_tx: watch::Sender<ConversationState>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    release_timeout: Duration,
    session_generation: u64,
    speech_task: Option<JoinHandle<()>>,
    restart_task: Option<JoinHandle<()>>,
    pipeline_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut recognition: mpsc::UnboundedReceiver<RecognitionEvent>,
        mut synthesis: mpsc::UnboundedReceiver<SynthesisEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = internal.recv() => self.handle_internal(event).await,
                Some(raw) = recognition.recv() => self.handle_recognition(raw).await,
                Some(raw) = synthesis.recv() => {
                    self.output.handle_event(raw);
                }
            }
            self.publish_state();
        }

        let actions = self.coordinator.stop(Instant::now());
        self.execute(actions).await;
        self.publish_state();
        tracing::debug!("conversation driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        let actions = match command {
            Command::StartSession { greet, reply } => {
                let session = self.session.clone();
                let tx = self.internal_tx.clone();
                let generation = self.session_generation;
                tokio::spawn(async move {
                    let result = session.create_session(greet).await;
                    tx.send(Internal::SessionStarted {
                        generation,
                        result,
                        reply,
                    })
                    .ok();
                });
                Vec::new()
            }
            Command::EndSession { reply } => {
                self.session_generation += 1;
                if let Some(task) = self.pipeline_task.take() {
                    task.abort();
                }
                let actions = self.coordinator.session_ended(now);
                self.execute(actions).await;
                self.input.clear_interim();
                let session = self.session.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let summary = session.close_session().await;
                    events
                        .send(ConversationEvent::SessionEnded {
                            summary: summary.clone(),
                        })
                        .ok();
                    reply.send(summary).ok();
                });
                Vec::new()
            }
            Command::StartListening => self.coordinator.start_listening(now),
            Command::Stop => self.coordinator.stop(now),
            Command::SetLatched(latched) => self.coordinator.set_latched(latched, now),
            Command::SubmitText(text) => {
                self.input.clear_interim();
                self.coordinator.submit_text(&text, now)
            }
            // Handled by the loop.
            Command::Shutdown => Vec::new(),
        };
        self.execute(actions).await;
    }

    async fn handle_internal(&mut self, event: Internal) {
        let now = Instant::now();
        let actions = match event {
            Internal::SessionStarted { generation, result, reply }
                if generation != self.session_generation =>
            {
                tracing::debug!(generation, "session start finished after the session ended");
                let err = match result {
                    Ok(_) => WellvoiceError::Initialization {
                        message: "session was ended before it was ready".to_string(),
                    },
                    Err(e) => e,
                };
                reply.send(Err(err)).ok();
                Vec::new()
            }
            Internal::SessionStarted { result, reply, .. } => match result {
                Ok(start) => {
                    reply.send(Ok(start.session_id)).ok();
                    match start.greeting {
                        Some(greeting) => self.coordinator.announce(greeting.text, now),
                        None => Vec::new(),
                    }
                }
                Err(e) => {
                    let notice = Notice::from(&e);
                    reply.send(Err(e)).ok();
                    vec![Action::Notify(notice)]
                }
            },
            Internal::PipelineDone { generation, .. } if generation != self.session_generation => {
                tracing::debug!(generation, "dropping reply for an ended session");
                Vec::new()
            }
            Internal::PipelineDone { result, .. } => match result {
                Ok(PipelineOutcome::Reply(text)) => self.coordinator.reply_ready(text, now),
                Ok(PipelineOutcome::Apology { notice, .. }) => {
                    self.coordinator.processing_failed(notice, now)
                }
                Err(e) => self.coordinator.processing_failed(Notice::from(&e), now),
            },
            Internal::SpeechCompleted { utterance, outcome } => {
                tracing::debug!(%utterance, ?outcome, "utterance completed");
                self.speech_task = None;
                self.coordinator.speech_finished(utterance, &outcome, now)
            }
            Internal::RestartDue(generation) => {
                self.restart_task = None;
                self.coordinator.restart_due(generation, now)
            }
        };
        self.execute(actions).await;
    }

    async fn handle_recognition(&mut self, raw: RecognitionEvent) {
        let Some(event) = self.input.handle_event(raw) else {
            return;
        };
        let now = Instant::now();
        let actions = match event {
            InputEvent::Started => self.coordinator.recognition_started(now),
            InputEvent::Interim(text) => {
                self.events.send(ConversationEvent::Interim(text)).ok();
                Vec::new()
            }
            InputEvent::Final(text) => {
                self.events.send(ConversationEvent::Interim(String::new())).ok();
                self.coordinator.final_transcript(text, now)
            }
            InputEvent::Ended { explicit } => self.coordinator.recognition_ended(explicit, now),
            InputEvent::Error(kind) => {
                tracing::debug!(%kind, "recognition error");
                self.coordinator.recognition_error(&kind, now)
            }
        };
        self.execute(actions).await;
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            tracing::trace!(?action, "executing");
            match action {
                Action::StartRecognition { forced } => {
                    if let Err(e) = self.input.start().await {
                        tracing::debug!(forced, error = %e, "recognition start failed");
                        let failure = StartFailure::from(&e);
                        queue.extend(self.coordinator.start_failed(failure, Instant::now()));
                    }
                }
                Action::StopRecognition => {
                    if let Err(e) = self.input.stop().await {
                        tracing::warn!(error = %e, "failed to stop recognition");
                    }
                    self.input.clear_interim();
                }
                Action::Submit(text) => {
                    let pipeline = self.pipeline.clone();
                    let tx = self.internal_tx.clone();
                    let generation = self.session_generation;
                    let task = tokio::spawn(async move {
                        let result = pipeline.submit(&text).await;
                        tx.send(Internal::PipelineDone { generation, result }).ok();
                    });
                    self.pipeline_task = Some(task);
                }
                Action::Speak { utterance, text } => self.speak(utterance, text).await,
                Action::StopSpeaking => {
                    if let Some(task) = self.speech_task.take() {
                        task.abort();
                    }
                    self.output.stop().await;
                }
                Action::ScheduleRestart { generation, delay } => {
                    let tx = self.internal_tx.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        tx.send(Internal::RestartDue(generation)).ok();
                    });
                    if let Some(previous) = self.restart_task.replace(task) {
                        previous.abort();
                    }
                }
                Action::CancelRestart => {
                    if let Some(task) = self.restart_task.take() {
                        task.abort();
                    }
                }
                Action::Notify(notice) => {
                    tracing::info!(kind = ?notice.kind, "{notice}");
                    self.events.send(ConversationEvent::Notice(notice)).ok();
                }
            }
        }
    }

    /// Release the mic, then play in the background and report the completion.
    async fn speak(&mut self, utterance: UtteranceId, text: String) {
        if let Err(e) = self.input.stop().await {
            tracing::warn!(error = %e, "failed to stop recognition before speaking");
        }
        let completion = self.output.prepare(utterance);

        let input = self.input.clone();
        let output = self.output.clone();
        let tx = self.internal_tx.clone();
        let release_timeout = self.release_timeout;
        let task = tokio::spawn(async move {
            input.wait_released(release_timeout).await;
            if let Err(e) = output.play(utterance, &text).await {
                tracing::debug!(%utterance, error = %e, "playback did not start");
            }
            let outcome = completion.wait().await;
            tx.send(Internal::SpeechCompleted { utterance, outcome }).ok();
        });
        if let Some(previous) = self.speech_task.replace(task) {
            previous.abort();
        }
    }

    fn publish_state(&self) {
        let snapshot = self.coordinator.snapshot();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        if changed {
            tracing::debug!(
                listening = snapshot.listening,
                processing = snapshot.processing,
                speaking = snapshot.speaking,
                latched = snapshot.latched,
                "state changed"
            );
            self.events.send(ConversationEvent::StateChanged(snapshot)).ok();
        }
    }
}
