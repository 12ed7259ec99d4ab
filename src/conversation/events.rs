use crate::backend::CloseSummary;
use crate::conversation::coordinator::ConversationState;
use crate::conversation::notice::Notice;
use crate::conversation::transcript::Message;

/// Everything a front end needs to render the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    MessageAppended(Message),
    /// Latest interim recognition text; empty when the buffer was cleared.
    Interim(String),
    StateChanged(ConversationState),
    Notice(Notice),
    SessionEnded { summary: Option<CloseSummary> },
}
