//! Append-only conversation transcript.

use crate::conversation::events::ConversationEvent;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Strictly increasing, derived from wall-clock milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub speaker: Speaker,
    pub timestamp: DateTime<Local>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<Message>,
    last_id: i64,
}

/// Messages of the current conversation, in creation order.
pub struct Transcript {
    inner: Mutex<Inner>,
    events: Option<broadcast::Sender<ConversationEvent>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events: None,
        }
    }

    /// Transcript that announces each appended message on `events`.
    pub fn with_events(events: broadcast::Sender<ConversationEvent>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events: Some(events),
        }
    }

    pub fn append(&self, speaker: Speaker, text: impl Into<String>) -> Message {
        let timestamp = Local::now();
        let message = {
            let mut inner = self.lock();
            let id = timestamp.timestamp_millis().max(inner.last_id + 1);
            inner.last_id = id;
            let message = Message {
                id: MessageId(id),
                text: text.into(),
                speaker,
                timestamp,
            };
            inner.messages.push(message.clone());
            message
        };
        if let Some(events) = &self.events {
            // No subscribers is fine.
            events.send(ConversationEvent::MessageAppended(message.clone())).ok();
        }
        message
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Message> {
        self.lock().messages.last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase() {
        let transcript = Transcript::new();
        for i in 0..50 {
            transcript.append(Speaker::User, format!("message {i}"));
        }
        let messages = transcript.messages();
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(messages.len(), 50);
    }

    #[test]
    fn test_append_broadcasts_message() {
        let (tx, mut rx) = broadcast::channel(8);
        let transcript = Transcript::with_events(tx);

        let appended = transcript.append(Speaker::Assistant, "Hello");

        match rx.try_recv() {
            Ok(ConversationEvent::MessageAppended(message)) => assert_eq!(message, appended),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
