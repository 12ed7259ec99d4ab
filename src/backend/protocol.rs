//! Wire types of the companion backend and response parsing.

use crate::error::{Result, WellvoiceError};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque server-issued session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author of a persisted message, as the backend names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Generated,
}

#[derive(Debug, Serialize)]
pub struct PostMessage<'a> {
    pub session_id: &'a str,
    pub text: &'a str,
    pub role: MessageRole,
}

#[derive(Debug, Deserialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
}

/// What the backend reports when a session is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseSummary {
    pub status: Option<String>,
    pub reason: Option<String>,
    pub summary: Option<String>,
    pub overall_summary: Option<String>,
}

/// Reply of `generate-question`; servers use either field name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GeneratedReply {
    pub response: Option<String>,
    pub question: Option<String>,
}

impl GeneratedReply {
    /// The reply text, if the backend produced a non-blank one.
    pub fn into_text(self) -> Option<String> {
        self.response
            .into_iter()
            .chain(self.question)
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: SessionId,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryList {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

/// A past session with its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTranscript {
    pub session_id: SessionId,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub history: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub total_sessions: u64,
    pub consecutive_days: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MoodTrendList {
    pub mood_trends: BTreeMap<String, u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct GoalList {
    pub goals: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Turn a response into `T`.
///
/// Non-2xx statuses, bodies that are not JSON, and 2xx bodies of the form
/// `{"error": "..."}` all become connection errors.
pub fn parse_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("detail")
                    .or_else(|| v.get("error"))
                    .and_then(|d| d.as_str().map(str::to_string))
            });
        return Err(WellvoiceError::connection(match detail {
            Some(detail) => format!("backend returned status {status}: {detail}"),
            None => format!("backend returned status {status}"),
        }));
    }

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| WellvoiceError::connection(format!("invalid JSON from backend: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error.as_str().map_or_else(|| error.to_string(), str::to_string);
        return Err(WellvoiceError::connection(message));
    }

    serde_json::from_value(value)
        .map_err(|e| WellvoiceError::connection(format!("unexpected response from backend: {e}")))
}

/// Parse a backend timestamp (RFC 3339, or ISO 8601 without offset as local time).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Local));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
}
