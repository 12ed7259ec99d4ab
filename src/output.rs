//! Terminal rendering for conversation events and the read-only views.
//!
//! `format_*` functions build plain or colored strings; `render_event`
//! writes them. Messages go to stdout, everything else to stderr.

use crate::backend::{CloseSummary, Health, HistoryEntry, SessionTranscript, Statistics};
use crate::backend::protocol::parse_timestamp;
use crate::conversation::coordinator::ConversationState;
use crate::conversation::events::ConversationEvent;
use crate::conversation::notice::{Notice, NoticeKind};
use crate::conversation::transcript::{Message, Speaker};
use std::collections::BTreeMap;

const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Name the companion is shown under.
pub const COMPANION_NAME: &str = "Alex";

fn paint(text: &str, code: &str, color: bool) -> String {
    if color {
        format!("{code}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Clear the current terminal line (interim text, state line)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

pub fn speaker_label(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "You",
        Speaker::Assistant => COMPANION_NAME,
    }
}

/// `[14:03] Alex: How are you feeling today?`
pub fn format_message(message: &Message, color: bool) -> String {
    let time = message.timestamp.format("%H:%M").to_string();
    let label = speaker_label(message.speaker);
    let label = match message.speaker {
        Speaker::User => paint(label, GREEN, color),
        Speaker::Assistant => paint(label, CYAN, color),
    };
    format!("{} {}: {}", paint(&format!("[{time}]"), DIM, color), label, message.text)
}

/// One-word activity label.
pub fn state_label(state: &ConversationState) -> &'static str {
    if state.speaking {
        "speaking"
    } else if state.processing {
        "thinking"
    } else if state.listening {
        "listening"
    } else {
        "idle"
    }
}

pub fn format_state(state: &ConversationState, color: bool) -> String {
    let mut line = paint(state_label(state), BOLD, color);
    if state.latched {
        line.push_str(&paint(" (conversation mode)", DIM, color));
    }
    line
}

pub fn format_notice(notice: &Notice, color: bool) -> String {
    let code = match notice.kind {
        NoticeKind::Info => DIM,
        NoticeKind::Unsupported | NoticeKind::Recognition | NoticeKind::Playback => YELLOW,
        NoticeKind::Connection | NoticeKind::Initialization => RED,
    };
    paint(&format!("! {}", notice.message), code, color)
}

pub fn format_summary(summary: Option<&CloseSummary>) -> String {
    let Some(summary) = summary else {
        return "Session ended.".to_string();
    };
    let mut out = String::from("Session ended");
    if let Some(status) = summary.status.as_deref() {
        out.push_str(&format!(" ({status})"));
    }
    out.push('.');
    for text in [&summary.summary, &summary.overall_summary].into_iter().flatten() {
        if !text.trim().is_empty() {
            out.push('\n');
            out.push_str(text.trim());
        }
    }
    if let Some(reason) = summary.reason.as_deref()
        && summary.summary.is_none()
    {
        out.push_str(&format!("\n{reason}"));
    }
    out
}

fn format_when(raw: Option<&str>) -> String {
    match raw {
        Some(raw) => parse_timestamp(raw)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| raw.to_string()),
        None => "unknown time".to_string(),
    }
}

pub fn format_history(entries: &[HistoryEntry]) -> String {
    if entries.is_empty() {
        return "No past sessions.\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "  {}  {}  {}\n",
            format_when(entry.created_at.as_deref()),
            entry.session_id,
            entry.status.as_deref().unwrap_or("-")
        ));
    }
    out
}

pub fn format_session_transcript(transcript: &SessionTranscript) -> String {
    let mut out = format!(
        "Session {} ({})\n",
        transcript.session_id,
        format_when(transcript.created_at.as_deref())
    );
    for entry in &transcript.history {
        let who = match entry.role.as_deref() {
            Some("user") => "You",
            _ => COMPANION_NAME,
        };
        out.push_str(&format!("  {who}: {}\n", entry.text));
    }
    out
}

pub fn format_statistics(stats: &Statistics, moods: &BTreeMap<String, u64>, goals: usize) -> String {
    let mut out = format!(
        "Sessions:         {}\nDay streak:       {}\nGoals:            {goals}\n",
        stats.total_sessions, stats.consecutive_days
    );
    if !moods.is_empty() {
        out.push_str("Moods:\n");
        for (mood, count) in moods {
            out.push_str(&format!("  {mood:<16}{count}\n"));
        }
    }
    out
}

pub fn format_health(health: &Health) -> String {
    let mut out = format!("Backend: {}", health.status);
    if let Some(service) = &health.service {
        out.push_str(&format!(" ({service}"));
        if let Some(version) = &health.version {
            out.push_str(&format!(" {version}"));
        }
        out.push(')');
    }
    out
}

/// Print one conversation event.
pub fn render_event(event: &ConversationEvent, color: bool, verbose: u8) {
    match event {
        ConversationEvent::MessageAppended(message) => {
            clear_line();
            println!("{}", format_message(message, color));
        }
        ConversationEvent::Interim(text) => {
            clear_line();
            if !text.is_empty() {
                eprint!("{}", paint(&format!("… {text}"), DIM, color));
            }
        }
        ConversationEvent::StateChanged(state) => {
            if verbose > 0 {
                clear_line();
                eprintln!("{}", paint(&format!("[{}]", format_state(state, false)), DIM, color));
            }
        }
        ConversationEvent::Notice(notice) => {
            clear_line();
            eprintln!("{}", format_notice(notice, color));
        }
        ConversationEvent::SessionEnded { summary } => {
            clear_line();
            eprintln!("{}", format_summary(summary.as_ref()));
        }
    }
}
