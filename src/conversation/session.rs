//! Session lifecycle: at most one backend session per conversation.
//!
//! Creation is serialized. Whoever finds no session and no creation in flight
//! performs the create; everyone else polls until it lands or the wait bound
//! runs out.
//!
//! Closing bumps an epoch. A create or wait that began under an older epoch
//! never installs its session; a session that lands after close is closed on
//! the backend right away.

use crate::backend::{Backend, CloseSummary, SessionId};
use crate::conversation::transcript::{Message, Speaker, Transcript};
use crate::defaults;
use crate::error::{Result, WellvoiceError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub session_id: SessionId,
    /// Greeting appended to the transcript, to be spoken by the caller.
    pub greeting: Option<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub poll_interval: Duration,
    pub wait_limit: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(defaults::SESSION_POLL_INTERVAL_MS),
            wait_limit: Duration::from_millis(defaults::SESSION_WAIT_MS),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<SessionId>,
    creating: bool,
    epoch: u64,
}

enum Claim {
    Existing(SessionId),
    Create(u64),
    Wait(u64),
}

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    transcript: Arc<Transcript>,
    state: Mutex<SessionState>,
    greeting: String,
    timing: SessionTiming,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn Backend>,
        transcript: Arc<Transcript>,
        greeting: impl Into<String>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            backend,
            transcript,
            state: Mutex::new(SessionState::default()),
            greeting: greeting.into(),
            timing,
        }
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.state.lock().await.session_id.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.session_id.is_some()
    }

    /// Explicitly start a session, optionally appending the greeting.
    ///
    /// An existing session is reused without a second greeting.
    ///
    /// # Errors
    /// `WellvoiceError::Connection` when the backend is unreachable; the
    /// session stays inactive and the call may simply be repeated.
    pub async fn create_session(&self, announce_greeting: bool) -> Result<SessionStart> {
        let session_id = match self.claim().await {
            Claim::Existing(session_id) => {
                return Ok(SessionStart {
                    session_id,
                    greeting: None,
                });
            }
            Claim::Create(epoch) => self.create_claimed(epoch).await?,
            Claim::Wait(epoch) => self.wait_for_session(epoch).await?,
        };

        // Held while appending so a concurrent close cannot slip in between.
        let state = self.state.lock().await;
        if state.session_id.as_ref() != Some(&session_id) {
            return Err(ended_while_starting());
        }
        let greeting = announce_greeting
            .then(|| self.transcript.append(Speaker::Assistant, self.greeting.clone()));
        drop(state);
        Ok(SessionStart {
            session_id,
            greeting,
        })
    }

    /// Return the current session, creating one lazily if needed.
    ///
    /// # Errors
    /// `WellvoiceError::Initialization` if no session could be obtained
    /// within the wait bound.
    pub async fn ensure_session(&self) -> Result<SessionId> {
        let result = match self.claim().await {
            Claim::Existing(session_id) => return Ok(session_id),
            Claim::Create(epoch) => self.create_claimed(epoch).await,
            Claim::Wait(epoch) => self.wait_for_session(epoch).await,
        };
        result.map_err(|e| match e {
            WellvoiceError::Initialization { .. } => e,
            other => WellvoiceError::Initialization {
                message: other.to_string(),
            },
        })
    }

    /// Forget the session locally, then tell the backend. Never fails.
    ///
    /// A create still in flight is abandoned: its session is closed as soon as
    /// it lands instead of becoming current.
    pub async fn close_session(&self) -> Option<CloseSummary> {
        let session_id = {
            let mut state = self.state.lock().await;
            state.epoch += 1;
            state.creating = false;
            state.session_id.take()?
        };
        match self.backend.close_session(&session_id).await {
            Ok(summary) => {
                tracing::info!(session = %session_id, status = ?summary.status, "session closed");
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "failed to close session on backend");
                None
            }
        }
    }

    async fn claim(&self) -> Claim {
        let mut state = self.state.lock().await;
        if let Some(session_id) = &state.session_id {
            return Claim::Existing(session_id.clone());
        }
        if state.creating {
            return Claim::Wait(state.epoch);
        }
        state.creating = true;
        Claim::Create(state.epoch)
    }

    /// Perform the create after `claim` returned `Create`.
    async fn create_claimed(&self, epoch: u64) -> Result<SessionId> {
        let result = self.backend.create_session().await;
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            drop(state);
            if let Ok(session_id) = result {
                tracing::info!(session = %session_id, "session ended while creating, closing it");
                if let Err(e) = self.backend.close_session(&session_id).await {
                    tracing::warn!(session = %session_id, error = %e, "failed to close abandoned session");
                }
            }
            return Err(ended_while_starting());
        }
        state.creating = false;
        match result {
            Ok(session_id) => {
                tracing::info!(session = %session_id, "session created");
                state.session_id = Some(session_id.clone());
                Ok(session_id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "session creation failed");
                Err(e)
            }
        }
    }

    /// Poll while another task creates the session. Takes over the creation
    /// if that task failed.
    async fn wait_for_session(&self, epoch: u64) -> Result<SessionId> {
        let deadline = Instant::now() + self.timing.wait_limit;
        loop {
            tokio::time::sleep(self.timing.poll_interval).await;
            match self.claim().await {
                Claim::Create(current) if current != epoch => {
                    self.release_claim(current).await;
                    return Err(ended_while_starting());
                }
                Claim::Wait(current) if current != epoch => return Err(ended_while_starting()),
                Claim::Existing(session_id) => return Ok(session_id),
                Claim::Create(_) => return self.create_claimed(epoch).await,
                Claim::Wait(_) if Instant::now() >= deadline => {
                    return Err(WellvoiceError::Initialization {
                        message: format!(
                            "no session after waiting {}ms",
                            self.timing.wait_limit.as_millis()
                        ),
                    });
                }
                Claim::Wait(_) => {}
            }
        }
    }

    /// Undo a `Create` claim that will not be acted on.
    async fn release_claim(&self, epoch: u64) {
        let mut state = self.state.lock().await;
        if state.epoch == epoch {
            state.creating = false;
        }
    }
}

fn ended_while_starting() -> WellvoiceError {
    WellvoiceError::Initialization {
        message: "session was ended before it was ready".to_string(),
    }
}
