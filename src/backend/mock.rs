//! In-memory backend for tests and offline demos.

use crate::backend::Backend;
use crate::backend::protocol::{
    CloseSummary, Health, HistoryEntry, MessageRole, SessionId, SessionTranscript, Statistics,
    TranscriptEntry,
};
use crate::error::{Result, WellvoiceError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Backend that keeps sessions in memory and answers with scripted replies.
pub struct MockBackend {
    replies: Mutex<VecDeque<String>>,
    default_reply: String,
    create_delay: Duration,
    generate_delay: Duration,
    fail_create: AtomicBool,
    fail_generate: AtomicBool,
    fail_close: AtomicBool,
    creates: AtomicUsize,
    closes: AtomicUsize,
    generates: AtomicUsize,
    sessions: Mutex<Vec<SessionTranscript>>,
    posted: Mutex<Vec<(SessionId, String, MessageRole)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: "How does that make you feel?".to_string(),
            create_delay: Duration::ZERO,
            generate_delay: Duration::ZERO,
            fail_create: AtomicBool::new(false),
            fail_generate: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            creates: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            generates: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
        }
    }

    /// Reply used once the scripted replies run out.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    /// Replies returned in order, one per `generate_reply`.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.replies).extend(replies.into_iter().map(Into::into));
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_generate(&self, fail: bool) {
        self.fail_generate.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    /// Every message posted, in order.
    pub fn posted(&self) -> Vec<(SessionId, String, MessageRole)> {
        lock(&self.posted).clone()
    }

    fn unreachable() -> WellvoiceError {
        WellvoiceError::connection("backend unreachable")
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn create_session(&self) -> Result<SessionId> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        let session_id = SessionId::new(format!("session-{n}"));
        lock(&self.sessions).push(SessionTranscript {
            session_id: session_id.clone(),
            created_at: Some(chrono::Local::now().to_rfc3339()),
            history: Vec::new(),
        });
        Ok(session_id)
    }

    async fn close_session(&self, session: &SessionId) -> Result<CloseSummary> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        let count = lock(&self.sessions)
            .iter()
            .find(|s| &s.session_id == session)
            .map_or(0, |s| s.history.len());
        if count < 5 {
            return Ok(CloseSummary {
                status: Some("not summarized".to_string()),
                reason: Some("Session too short".to_string()),
                ..CloseSummary::default()
            });
        }
        Ok(CloseSummary {
            status: Some("summarized".to_string()),
            summary: Some(format!("{count} messages exchanged.")),
            ..CloseSummary::default()
        })
    }

    async fn post_message(&self, session: &SessionId, text: &str, role: MessageRole) -> Result<()> {
        let mut sessions = lock(&self.sessions);
        let Some(stored) = sessions.iter_mut().find(|s| &s.session_id == session) else {
            return Err(WellvoiceError::connection("Session not found"));
        };
        stored.history.push(TranscriptEntry {
            text: text.to_string(),
            role: Some(match role {
                MessageRole::User => "user".to_string(),
                MessageRole::Generated => "generated".to_string(),
            }),
            time: Some(chrono::Local::now().to_rfc3339()),
        });
        lock(&self.posted).push((session.clone(), text.to_string(), role));
        Ok(())
    }

    async fn generate_reply(&self, _session: &SessionId) -> Result<String> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        let scripted = lock(&self.replies).pop_front();
        Ok(scripted.unwrap_or_else(|| self.default_reply.clone()))
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(lock(&self.sessions)
            .iter()
            .map(|s| HistoryEntry {
                session_id: s.session_id.clone(),
                created_at: s.created_at.clone(),
                status: Some("open".to_string()),
            })
            .collect())
    }

    async fn session_history(&self, session: &SessionId) -> Result<SessionTranscript> {
        lock(&self.sessions)
            .iter()
            .find(|s| &s.session_id == session)
            .cloned()
            .ok_or_else(|| WellvoiceError::connection("Session not found"))
    }

    async fn statistics(&self) -> Result<Statistics> {
        let total = lock(&self.sessions).len() as u64;
        Ok(Statistics {
            total_sessions: total,
            consecutive_days: u64::from(total > 0),
        })
    }

    async fn mood_trends(&self) -> Result<BTreeMap<String, u64>> {
        Ok(BTreeMap::new())
    }

    async fn goals(&self) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn health(&self) -> Result<Health> {
        Ok(Health {
            status: "healthy".to_string(),
            service: Some("mock".to_string()),
            version: None,
        })
    }
}
