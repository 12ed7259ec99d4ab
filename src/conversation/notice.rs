//! User-visible, non-fatal alerts.

use crate::error::WellvoiceError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Connection,
    Unsupported,
    Recognition,
    Initialization,
    Playback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NoticeKind::Info, message)
    }
}

impl From<&WellvoiceError> for Notice {
    fn from(error: &WellvoiceError) -> Self {
        let kind = match error {
            WellvoiceError::Connection { .. } => NoticeKind::Connection,
            WellvoiceError::Unsupported { .. } => NoticeKind::Unsupported,
            WellvoiceError::Recognition { kind } if kind.is_unsupported() => {
                NoticeKind::Unsupported
            }
            WellvoiceError::Recognition { .. } => NoticeKind::Recognition,
            WellvoiceError::Initialization { .. } => NoticeKind::Initialization,
            WellvoiceError::Playback { .. } => NoticeKind::Playback,
            _ => NoticeKind::Info,
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::capability::RecognitionErrorKind;

    #[test]
    fn test_errors_map_to_notice_kinds() {
        let notice = Notice::from(&WellvoiceError::connection("timeout"));
        assert_eq!(notice.kind, NoticeKind::Connection);
        assert_eq!(notice.message, "Connection error: timeout");

        let unsupported = Notice::from(&WellvoiceError::Recognition {
            kind: RecognitionErrorKind::LanguageNotSupported,
        });
        assert_eq!(unsupported.kind, NoticeKind::Unsupported);

        let transient = Notice::from(&WellvoiceError::Recognition {
            kind: RecognitionErrorKind::NoSpeech,
        });
        assert_eq!(transient.kind, NoticeKind::Recognition);
    }
}
