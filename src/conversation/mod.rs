pub mod coordinator;
pub mod events;
pub mod notice;
pub mod orchestrator;
pub mod pipeline;
pub mod restart;
pub mod session;
pub mod transcript;

pub use coordinator::{Action, ConversationState, TurnCoordinator, TurnState};
pub use events::ConversationEvent;
pub use notice::{Notice, NoticeKind};
pub use orchestrator::{Conversation, ConversationHandle, ConversationSettings};
pub use pipeline::{MessagePipeline, PipelineOutcome};
pub use restart::RestartPolicy;
pub use session::{SessionManager, SessionStart, SessionTiming};
pub use transcript::{Message, MessageId, Speaker, Transcript};
