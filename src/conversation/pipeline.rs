//! Message pipeline: user text in, companion reply (or apology) out.

use crate::backend::{Backend, MessageRole};
use crate::conversation::notice::Notice;
use crate::conversation::session::SessionManager;
use crate::conversation::transcript::{Speaker, Transcript};
use crate::error::{Result, WellvoiceError};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The backend's reply, already appended to the transcript.
    Reply(String),
    /// The backend failed; `text` was appended in place of a reply.
    Apology { text: String, notice: Notice },
}

pub struct MessagePipeline {
    backend: Arc<dyn Backend>,
    session: Arc<SessionManager>,
    transcript: Arc<Transcript>,
    apology: String,
}

impl MessagePipeline {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<SessionManager>,
        transcript: Arc<Transcript>,
        apology: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            session,
            transcript,
            apology: apology.into(),
        }
    }

    /// Send one user message and obtain the reply.
    ///
    /// # Errors
    /// `EmptyInput` for blank text and `Initialization` when no session could
    /// be obtained; in both cases nothing is appended or sent. Backend
    /// failures after that point are not errors: they yield
    /// [`PipelineOutcome::Apology`].
    pub async fn submit(&self, text: &str) -> Result<PipelineOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WellvoiceError::EmptyInput);
        }

        let session_id = self.session.ensure_session().await?;
        self.transcript.append(Speaker::User, text);

        let reply = async {
            self.backend
                .post_message(&session_id, text, MessageRole::User)
                .await?;
            self.backend.generate_reply(&session_id).await
        }
        .await;

        match reply {
            Ok(reply) => {
                self.transcript.append(Speaker::Assistant, reply.clone());
                if let Err(e) = self
                    .backend
                    .post_message(&session_id, &reply, MessageRole::Generated)
                    .await
                {
                    tracing::warn!(session = %session_id, error = %e, "failed to persist reply");
                }
                Ok(PipelineOutcome::Reply(reply))
            }
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "no reply from backend");
                self.transcript.append(Speaker::Assistant, self.apology.clone());
                Ok(PipelineOutcome::Apology {
                    text: self.apology.clone(),
                    notice: Notice::from(&e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::conversation::notice::NoticeKind;
    use crate::conversation::session::SessionTiming;

    fn pipeline(backend: Arc<MockBackend>) -> (MessagePipeline, Arc<Transcript>) {
        let transcript = Arc::new(Transcript::new());
        let session = Arc::new(SessionManager::new(
            backend.clone(),
            transcript.clone(),
            "hello",
            SessionTiming::default(),
        ));
        (
            MessagePipeline::new(backend, session, transcript.clone(), "Sorry, try again."),
            transcript,
        )
    }

    #[tokio::test]
    async fn test_reply_is_appended_and_persisted() {
        let backend = Arc::new(MockBackend::new().with_reply("What's on your mind?"));
        let (pipeline, transcript) = pipeline(backend.clone());

        let outcome = pipeline.submit("I can't sleep").await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Reply("What's on your mind?".to_string()));
        let messages = transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].speaker, Speaker::User);
        assert_eq!(messages[1].speaker, Speaker::Assistant);

        let roles: Vec<MessageRole> = backend.posted().into_iter().map(|(_, _, r)| r).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Generated]);
    }

    #[tokio::test]
    async fn test_session_created_lazily() {
        let backend = Arc::new(MockBackend::new());
        let (pipeline, _) = pipeline(backend.clone());

        pipeline.submit("first").await.unwrap();
        pipeline.submit("second").await.unwrap();

        assert_eq!(backend.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_rejected_without_side_effects() {
        let backend = Arc::new(MockBackend::new());
        let (pipeline, transcript) = pipeline(backend.clone());

        let err = pipeline.submit("  \n ").await.unwrap_err();

        assert!(matches!(err, WellvoiceError::EmptyInput));
        assert!(transcript.is_empty());
        assert_eq!(backend.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_yields_apology() {
        let backend = Arc::new(MockBackend::new());
        backend.set_fail_generate(true);
        let (pipeline, transcript) = pipeline(backend.clone());

        let outcome = pipeline.submit("hello?").await.unwrap();

        let PipelineOutcome::Apology { text, notice } = outcome else {
            panic!("expected apology");
        };
        assert_eq!(text, "Sorry, try again.");
        assert_eq!(notice.kind, NoticeKind::Connection);
        assert_eq!(transcript.last().map(|m| m.text), Some(text));
    }

    #[tokio::test]
    async fn test_no_session_refuses_message() {
        let backend = Arc::new(MockBackend::new());
        backend.set_fail_create(true);
        let (pipeline, transcript) = pipeline(backend.clone());

        let err = pipeline.submit("hello").await.unwrap_err();

        assert!(matches!(err, WellvoiceError::Initialization { .. }));
        assert!(transcript.is_empty());
        assert!(backend.posted().is_empty());
    }
}
