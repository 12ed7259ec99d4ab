//! Turn coordinator: the conversation state machine.
//!
//! The coordinator owns turn-taking and nothing else. It performs no I/O:
//! every method takes the current instant, updates the state and returns the
//! [`Action`]s the driver must execute. Keeping the mic and the speaker
//! exclusive is a property of [`TurnState`] itself, since only one state can
//! be current.
//!
//! Transitions:
//!
//! ```text
//! Idle ──start/restart──▶ Listening ──final──▶ Processing ──reply──▶ Speaking
//!  ▲                          │                    │                    │
//!  └──────── stop, error, end ┴───── failure ──────┴──── completion ────┘
//! ```
//!
//! When latched, returning to `Idle` from a turn schedules a restart through
//! the [`RestartPolicy`] ladder.

use crate::conversation::notice::{Notice, NoticeKind};
use crate::conversation::restart::RestartPolicy;
use crate::error::WellvoiceError;
use crate::speech::capability::{RecognitionErrorKind, UtteranceId};
use crate::speech::output::SpeechOutcome;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

/// Read-only view of the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub listening: bool,
    pub speaking: bool,
    pub processing: bool,
    pub latched: bool,
    pub restart_attempts: u32,
    pub last_restart: Option<Instant>,
}

/// Side effects requested by the coordinator, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartRecognition { forced: bool },
    StopRecognition,
    Submit(String),
    Speak { utterance: UtteranceId, text: String },
    StopSpeaking,
    ScheduleRestart { generation: u64, delay: Duration },
    CancelRestart,
    Notify(Notice),
}

/// Why recognition could not be (re)started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartFailure {
    /// Retrying cannot help; continuous mode is switched off.
    Fatal(Notice),
    Transient(Notice),
}

impl From<&WellvoiceError> for StartFailure {
    fn from(error: &WellvoiceError) -> Self {
        let notice = Notice::from(error);
        match error {
            WellvoiceError::Unsupported { .. } => StartFailure::Fatal(notice),
            WellvoiceError::Recognition { kind } if kind.is_fatal() => StartFailure::Fatal(notice),
            _ => StartFailure::Transient(notice),
        }
    }
}

impl From<&RecognitionErrorKind> for StartFailure {
    fn from(kind: &RecognitionErrorKind) -> Self {
        Self::from(&WellvoiceError::Recognition { kind: kind.clone() })
    }
}

pub struct TurnCoordinator {
    policy: RestartPolicy,
    state: TurnState,
    latched: bool,
    restart_attempts: u32,
    last_restart: Option<Instant>,
    generation: u64,
    pending_restart: Option<u64>,
    /// A start was issued and `Started` has not been seen yet.
    awaiting_start: bool,
    /// The outstanding start is the one outside the backoff ladder.
    forced_start: bool,
    current_utterance: Option<UtteranceId>,
    next_utterance: u64,
}

impl TurnCoordinator {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            state: TurnState::Idle,
            latched: false,
            restart_attempts: 0,
            last_restart: None,
            generation: 0,
            pending_restart: None,
            awaiting_start: false,
            forced_start: false,
            current_utterance: None,
            next_utterance: 1,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn current_utterance(&self) -> Option<UtteranceId> {
        self.current_utterance
    }

    pub fn has_pending_restart(&self) -> bool {
        self.pending_restart.is_some()
    }

    pub fn snapshot(&self) -> ConversationState {
        ConversationState {
            listening: self.state == TurnState::Listening,
            speaking: self.state == TurnState::Speaking,
            processing: self.state == TurnState::Processing,
            latched: self.latched,
            restart_attempts: self.restart_attempts,
            last_restart: self.last_restart,
        }
    }

    /// Explicit mic start. Interrupts playback (barge-in).
    pub fn start_listening(&mut self, _now: Instant) -> Vec<Action> {
        match self.state {
            TurnState::Idle => {
                self.restart_attempts = 0;
                let mut actions = self.cancel_restart();
                actions.push(self.begin_listening(false));
                actions
            }
            TurnState::Listening => Vec::new(),
            TurnState::Speaking => {
                let mut actions = self.interrupt_speech();
                self.restart_attempts = 0;
                actions.push(self.begin_listening(false));
                actions
            }
            TurnState::Processing => vec![Action::Notify(Notice::info(
                "Still working on a reply, please wait",
            ))],
        }
    }

    /// Explicit stop: everything goes quiet and continuous mode ends.
    pub fn stop(&mut self, _now: Instant) -> Vec<Action> {
        self.latched = false;
        self.restart_attempts = 0;
        self.awaiting_start = false;
        self.forced_start = false;
        let mut actions = self.cancel_restart();
        match self.state {
            TurnState::Listening => actions.push(Action::StopRecognition),
            TurnState::Speaking => actions.extend(self.interrupt_speech()),
            TurnState::Processing | TurnState::Idle => {}
        }
        self.state = TurnState::Idle;
        actions
    }

    pub fn set_latched(&mut self, latched: bool, _now: Instant) -> Vec<Action> {
        self.latched = latched;
        if latched {
            Vec::new()
        } else {
            self.cancel_restart()
        }
    }

    /// The engine confirmed capture started.
    pub fn recognition_started(&mut self, _now: Instant) -> Vec<Action> {
        self.awaiting_start = false;
        self.forced_start = false;
        self.restart_attempts = 0;
        if self.state == TurnState::Listening {
            Vec::new()
        } else {
            tracing::debug!(state = ?self.state, "recognition started outside listening, stopping it");
            vec![Action::StopRecognition]
        }
    }

    /// A start request failed, or the engine gave up before reporting `Started`.
    pub fn start_failed(&mut self, failure: StartFailure, now: Instant) -> Vec<Action> {
        self.awaiting_start = false;
        let forced = std::mem::take(&mut self.forced_start);
        if self.state != TurnState::Listening {
            return Vec::new();
        }

        let notice = match failure {
            StartFailure::Fatal(notice) => {
                tracing::warn!(%notice, "recognition unavailable, leaving continuous mode");
                self.latched = false;
                self.state = TurnState::Idle;
                let mut actions = self.cancel_restart();
                actions.push(Action::Notify(notice));
                return actions;
            }
            StartFailure::Transient(notice) => notice,
        };

        if forced {
            tracing::warn!(%notice, "forced recognition start failed");
            self.state = TurnState::Idle;
            return vec![Action::Notify(Notice::new(
                NoticeKind::Recognition,
                format!("Could not restart listening: {notice}"),
            ))];
        }

        if !self.latched {
            self.state = TurnState::Idle;
            return vec![Action::Notify(notice)];
        }

        let backoff_step = self.restart_attempts;
        self.restart_attempts += 1;
        if self.restart_attempts >= self.policy.max_attempts {
            tracing::debug!(attempts = self.restart_attempts, "restart ladder exhausted, forcing one start");
            self.restart_attempts = 0;
            self.last_restart = Some(now);
            return vec![self.begin_listening(true)];
        }

        tracing::debug!(attempts = self.restart_attempts, %notice, "recognition start failed, backing off");
        self.state = TurnState::Idle;
        vec![self.schedule_restart(backoff_step, now)]
    }

    pub fn recognition_error(&mut self, kind: &RecognitionErrorKind, now: Instant) -> Vec<Action> {
        if self.state != TurnState::Listening {
            return Vec::new();
        }
        if self.awaiting_start {
            return self.start_failed(StartFailure::from(kind), now);
        }

        let notice = Notice::from(&WellvoiceError::Recognition { kind: kind.clone() });
        self.state = TurnState::Idle;
        if kind.is_fatal() {
            self.latched = false;
            let mut actions = self.cancel_restart();
            actions.push(Action::Notify(notice));
            return actions;
        }
        let mut actions = vec![Action::Notify(notice)];
        if self.latched {
            tracing::debug!(%kind, "transient recognition error, re-arming");
            let step = self.restart_attempts;
            actions.push(self.schedule_restart(step, now));
        }
        actions
    }

    /// The engine released the mic.
    pub fn recognition_ended(&mut self, explicit: bool, now: Instant) -> Vec<Action> {
        if self.state != TurnState::Listening {
            return Vec::new();
        }
        if self.awaiting_start {
            let notice = Notice::new(NoticeKind::Recognition, "Recognition ended before it started");
            return self.start_failed(StartFailure::Transient(notice), now);
        }

        self.state = TurnState::Idle;
        if self.latched && !explicit {
            // Platform silence timeout: keep the conversation going.
            let step = self.restart_attempts;
            return vec![self.schedule_restart(step, now)];
        }
        Vec::new()
    }

    pub fn final_transcript(&mut self, text: String, _now: Instant) -> Vec<Action> {
        if self.state != TurnState::Listening {
            tracing::debug!(state = ?self.state, "ignoring final transcript");
            return Vec::new();
        }
        self.awaiting_start = false;
        self.state = TurnState::Processing;
        vec![Action::StopRecognition, Action::Submit(text)]
    }

    /// Typed input. Always available, including when speech is unsupported.
    pub fn submit_text(&mut self, text: &str, _now: Instant) -> Vec<Action> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let mut actions = match self.state {
            TurnState::Idle => self.cancel_restart(),
            TurnState::Listening => {
                self.awaiting_start = false;
                vec![Action::StopRecognition]
            }
            TurnState::Speaking => self.interrupt_speech(),
            TurnState::Processing => {
                return vec![Action::Notify(Notice::info(
                    "Still working on a reply, please wait",
                ))];
            }
        };
        self.state = TurnState::Processing;
        actions.push(Action::Submit(text.to_string()));
        actions
    }

    pub fn reply_ready(&mut self, text: String, _now: Instant) -> Vec<Action> {
        if self.state != TurnState::Processing {
            tracing::debug!(state = ?self.state, "dropping stale reply");
            return Vec::new();
        }
        vec![self.begin_speaking(text)]
    }

    /// Speak text outside a turn (the greeting).
    pub fn announce(&mut self, text: String, _now: Instant) -> Vec<Action> {
        match self.state {
            TurnState::Idle => {
                let mut actions = self.cancel_restart();
                actions.push(self.begin_speaking(text));
                actions
            }
            TurnState::Listening => {
                self.awaiting_start = false;
                vec![Action::StopRecognition, self.begin_speaking(text)]
            }
            TurnState::Processing | TurnState::Speaking => Vec::new(),
        }
    }

    pub fn processing_failed(&mut self, notice: Notice, now: Instant) -> Vec<Action> {
        if self.state != TurnState::Processing {
            return vec![Action::Notify(notice)];
        }
        self.state = TurnState::Idle;
        let mut actions = vec![Action::Notify(notice)];
        actions.extend(self.after_turn(now));
        actions
    }

    pub fn speech_finished(
        &mut self,
        utterance: UtteranceId,
        outcome: &SpeechOutcome,
        now: Instant,
    ) -> Vec<Action> {
        if self.state != TurnState::Speaking || self.current_utterance != Some(utterance) {
            tracing::debug!(%utterance, ?outcome, "ignoring stale completion");
            return Vec::new();
        }
        self.current_utterance = None;
        self.state = TurnState::Idle;

        let mut actions = Vec::new();
        if let SpeechOutcome::Failed(reason) = outcome {
            actions.push(Action::Notify(Notice::new(
                NoticeKind::Playback,
                format!("Could not play the reply: {reason}"),
            )));
        }
        actions.extend(self.after_turn(now));
        actions
    }

    /// A scheduled restart timer fired.
    pub fn restart_due(&mut self, generation: u64, now: Instant) -> Vec<Action> {
        if self.pending_restart != Some(generation) {
            return Vec::new();
        }
        self.pending_restart = None;
        if self.state != TurnState::Idle || !self.latched {
            return Vec::new();
        }
        self.last_restart = Some(now);
        vec![self.begin_listening(false)]
    }

    pub fn session_ended(&mut self, now: Instant) -> Vec<Action> {
        self.stop(now)
    }

    fn begin_listening(&mut self, forced: bool) -> Action {
        self.state = TurnState::Listening;
        self.awaiting_start = true;
        self.forced_start = forced;
        Action::StartRecognition { forced }
    }

    fn begin_speaking(&mut self, text: String) -> Action {
        let utterance = UtteranceId(self.next_utterance);
        self.next_utterance += 1;
        self.current_utterance = Some(utterance);
        self.state = TurnState::Speaking;
        Action::Speak { utterance, text }
    }

    fn interrupt_speech(&mut self) -> Vec<Action> {
        self.current_utterance = None;
        vec![Action::StopSpeaking]
    }

    fn after_turn(&mut self, now: Instant) -> Vec<Action> {
        if self.latched {
            let step = self.restart_attempts;
            vec![self.schedule_restart(step, now)]
        } else {
            Vec::new()
        }
    }

    fn schedule_restart(&mut self, backoff_step: u32, now: Instant) -> Action {
        self.generation += 1;
        self.pending_restart = Some(self.generation);
        let delay = self.policy.delay(backoff_step, self.last_restart, now);
        tracing::debug!(generation = self.generation, ?delay, "restart scheduled");
        Action::ScheduleRestart {
            generation: self.generation,
            delay,
        }
    }

    fn cancel_restart(&mut self) -> Vec<Action> {
        self.generation += 1;
        if self.pending_restart.take().is_some() {
            vec![Action::CancelRestart]
        } else {
            Vec::new()
        }
    }
}

impl Default for TurnCoordinator {
    fn default() -> Self {
        Self::new(RestartPolicy::default())
    }
}
