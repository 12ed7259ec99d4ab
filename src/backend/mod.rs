//! Companion backend: sessions, messages, replies and the read-only views.

#[cfg(feature = "http")]
pub mod http;
pub mod mock;
pub mod protocol;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[cfg(feature = "http")]
pub use http::HttpBackend;
pub use mock::MockBackend;
pub use protocol::{
    CloseSummary, Health, HistoryEntry, MessageRole, SessionId, SessionTranscript, Statistics,
    TranscriptEntry,
};

/// Operations the conversation needs from the backend.
///
/// Every failure is reported as [`WellvoiceError::Connection`](crate::error::WellvoiceError::Connection).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_session(&self) -> Result<SessionId>;

    async fn close_session(&self, session: &SessionId) -> Result<CloseSummary>;

    async fn post_message(&self, session: &SessionId, text: &str, role: MessageRole) -> Result<()>;

    /// Ask the backend for the companion's next reply in `session`.
    async fn generate_reply(&self, session: &SessionId) -> Result<String>;

    async fn history(&self) -> Result<Vec<HistoryEntry>>;

    async fn session_history(&self, session: &SessionId) -> Result<SessionTranscript>;

    async fn statistics(&self) -> Result<Statistics>;

    /// Mood name to number of entries.
    async fn mood_trends(&self) -> Result<BTreeMap<String, u64>>;

    /// Goals are free-form documents.
    async fn goals(&self) -> Result<Vec<serde_json::Value>>;

    async fn health(&self) -> Result<Health>;
}
