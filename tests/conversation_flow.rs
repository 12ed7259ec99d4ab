//! End-to-end turn-taking scenarios against scripted engines and backend.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wellvoice::backend::MockBackend;
use wellvoice::conversation::{
    Conversation, ConversationEvent, ConversationHandle, ConversationSettings, ConversationState,
    NoticeKind, Speaker,
};
use wellvoice::speech::mock::{MockRecognizer, MockSynthesizer};
use wellvoice::speech::{RecognitionErrorKind, SpeechCapabilities, SpeechPlatform};

fn capabilities(
    recognizer: &Arc<MockRecognizer>,
    synthesizer: &Arc<MockSynthesizer>,
) -> SpeechCapabilities {
    SpeechCapabilities {
        platform: SpeechPlatform::WebSpeech,
        recognition: Some(recognizer.clone()),
        synthesis: Some(synthesizer.clone()),
    }
}

fn latched() -> ConversationSettings {
    ConversationSettings {
        latched: true,
        ..ConversationSettings::default()
    }
}

async fn settle(handle: &ConversationHandle, done: impl Fn(&ConversationHandle) -> bool) {
    for _ in 0..5_000 {
        if done(handle) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("conversation did not settle: {:?}", handle.state());
}

fn idle(handle: &ConversationHandle) -> bool {
    let s = handle.state();
    !s.listening && !s.processing && !s.speaking
}

fn active_flags(state: &ConversationState) -> usize {
    [state.listening, state.processing, state.speaking]
        .into_iter()
        .filter(|f| *f)
        .count()
}

fn drain(events: &mut broadcast::Receiver<ConversationEvent>) -> Vec<ConversationEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn spoken_turn_from_greeting_to_reply() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let backend = Arc::new(MockBackend::new().with_reply("That sounds exhausting."));
    let handle = Conversation::spawn(
        backend.clone(),
        capabilities(&recognizer, &synthesizer),
        ConversationSettings {
            greeting: "Hi, I'm here for you.".to_string(),
            ..ConversationSettings::default()
        },
    );

    handle.start_session(true).await.unwrap();
    settle(&handle, |h| idle(h) && synthesizer.speak_count() == 1).await;

    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;
    recognizer.say("Work has been a lot lately");
    settle(&handle, |h| h.messages().len() == 3 && idle(h)).await;

    let messages = handle.messages();
    let speakers: Vec<Speaker> = messages.iter().map(|m| m.speaker).collect();
    assert_eq!(speakers, vec![Speaker::Assistant, Speaker::User, Speaker::Assistant]);
    assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(
        synthesizer.spoken(),
        vec!["Hi, I'm here for you.".to_string(), "That sounds exhausting.".to_string()]
    );
    assert_eq!(recognizer.locales(), vec!["en-US".to_string()]);

    let summary = handle.end_session().await.unwrap();
    assert!(summary.is_some());
    assert_eq!(backend.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn listening_processing_and_speaking_never_overlap() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let backend = Arc::new(
        MockBackend::new()
            .with_replies(["First reply.", "Second reply."])
            .with_generate_delay(Duration::from_millis(300)),
    );
    let handle = Conversation::spawn(backend, capabilities(&recognizer, &synthesizer), latched());
    let mut events = handle.events();

    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;
    recognizer.say("one");
    settle(&handle, |h| h.messages().len() == 2 && h.state().listening).await;
    recognizer.say("two");
    settle(&handle, |h| h.messages().len() == 4 && h.state().listening).await;
    handle.stop().unwrap();
    settle(&handle, idle).await;

    let states: Vec<ConversationState> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ConversationEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert!(states.iter().any(|s| s.processing));
    assert!(states.iter().any(|s| s.speaking));
    assert!(states.iter().all(|s| active_flags(s) <= 1), "{states:?}");
    assert_eq!(synthesizer.speak_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_never_leaves_processing() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let backend = Arc::new(MockBackend::new());
    backend.set_fail_generate(true);
    let handle = Conversation::spawn(
        backend,
        capabilities(&recognizer, &synthesizer),
        ConversationSettings {
            apology: "Sorry, something went wrong.".to_string(),
            ..ConversationSettings::default()
        },
    );
    let mut events = handle.events();

    handle.submit_text("Are you there?").unwrap();
    settle(&handle, |h| h.messages().len() == 2 && idle(h)).await;

    let last = handle.messages().pop().unwrap();
    assert_eq!(last.speaker, Speaker::Assistant);
    assert_eq!(last.text, "Sorry, something went wrong.");
    assert_eq!(synthesizer.speak_count(), 0);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConversationEvent::Notice(notice) if notice.kind == NoticeKind::Connection
    )));
}

#[tokio::test(start_paused = true)]
async fn duplicate_and_late_completions_are_ignored() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new().with_reply("Take a breath.")),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );

    handle.submit_text("I'm panicking").unwrap();
    settle(&handle, |h| h.state().listening).await;
    assert_eq!(recognizer.start_count(), 1);

    // The engine repeats its finish event, then the fallback window passes.
    let utterance = synthesizer.last_utterance().unwrap();
    synthesizer.finish(utterance);
    tokio::time::sleep(Duration::from_secs(40)).await;

    assert_eq!(recognizer.start_count(), 1);
    assert!(handle.state().listening);
    assert_eq!(handle.messages().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn silent_engine_completes_through_fallback() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::silent());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new().with_reply("Okay.")),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );

    handle.submit_text("hello").unwrap();
    settle(&handle, |h| h.state().speaking).await;
    let started = tokio::time::Instant::now();
    settle(&handle, |h| h.state().listening).await;

    assert!(started.elapsed() >= Duration::from_secs(8));
    assert_eq!(recognizer.start_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_restarts_stay_bounded() {
    let recognizer = Arc::new(MockRecognizer::new().with_failing_starts(100));
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new()),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );
    let mut events = handle.events();

    handle.start_listening().unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // Two backed-off retries, then one forced start that also fails.
    assert_eq!(recognizer.start_count(), 4);
    assert!(idle(&handle));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConversationEvent::Notice(notice) if notice.kind == NoticeKind::Recognition
    )));
}

#[tokio::test(start_paused = true)]
async fn transient_start_failures_recover() {
    let recognizer = Arc::new(MockRecognizer::new().with_failing_starts(2));
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new()),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );

    let begun = tokio::time::Instant::now();
    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening && recognizer.is_listening()).await;

    assert_eq!(recognizer.start_count(), 3);
    // 200ms backoff, then the one-second cooldown wins over 400ms.
    assert!(begun.elapsed() >= Duration::from_millis(1200));
    assert_eq!(handle.state().restart_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_session_starts_create_one_session() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let backend = Arc::new(MockBackend::new().with_create_delay(Duration::from_millis(600)));
    let handle = Conversation::spawn(
        backend.clone(),
        capabilities(&recognizer, &synthesizer),
        ConversationSettings::default(),
    );

    let starter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.start_session(false).await })
    };
    handle.submit_text("hello").unwrap();
    settle(&handle, |h| h.messages().len() == 2 && idle(h)).await;

    let session = starter.await.unwrap().unwrap();
    assert_eq!(backend.create_calls(), 1);
    assert!(backend.posted().iter().all(|(s, _, _)| *s == session));
}

#[tokio::test(start_paused = true)]
async fn latched_conversation_resumes_after_silence_timeout() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new()),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );

    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;
    recognizer.time_out();
    settle(&handle, |_| recognizer.start_count() == 2).await;
    settle(&handle, |h| h.state().listening).await;

    assert!(handle.state().latched);
}

#[tokio::test(start_paused = true)]
async fn unsupported_language_turns_off_conversation_mode() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new()),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );
    let mut events = handle.events();

    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;
    recognizer.fail(RecognitionErrorKind::LanguageNotSupported);
    settle(&handle, |h| !h.state().latched && idle(h)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(recognizer.start_count(), 1);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConversationEvent::Notice(notice) if notice.kind == NoticeKind::Unsupported
    )));

    // Typed input keeps working.
    handle.submit_text("typing instead").unwrap();
    settle(&handle, |h| h.messages().len() == 2 && idle(h)).await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_restart() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new()),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );

    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;
    recognizer.time_out();
    settle(&handle, |h| !h.state().listening).await;
    handle.stop().unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(recognizer.start_count(), 1);
    assert!(idle(&handle));
    assert!(!handle.state().latched);
}

#[tokio::test(start_paused = true)]
async fn barge_in_stops_playback_and_listens() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::silent());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new().with_reply("A long answer that keeps going.")),
        capabilities(&recognizer, &synthesizer),
        ConversationSettings::default(),
    );

    handle.submit_text("tell me something").unwrap();
    settle(&handle, |h| h.state().speaking).await;
    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;

    assert!(synthesizer.stop_count() >= 1);
    assert!(recognizer.is_listening());

    // The interrupted utterance's fallback must not end this listening turn.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(handle.state().listening);
}

#[tokio::test(start_paused = true)]
async fn ending_during_session_start_stays_silent_and_closed() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let backend = Arc::new(MockBackend::new().with_create_delay(Duration::from_millis(500)));
    let handle = Conversation::spawn(
        backend.clone(),
        capabilities(&recognizer, &synthesizer),
        ConversationSettings::default(),
    );

    let starter = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.start_session(true).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let summary = handle.end_session().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(summary, None);
    assert!(starter.await.unwrap().is_err());
    assert!(synthesizer.spoken().is_empty());
    assert!(handle.messages().is_empty());
    assert!(idle(&handle));
    // The session that landed late was closed on the backend.
    assert_eq!(backend.create_calls(), 1);
    assert_eq!(backend.close_calls(), 1);

    // The next message starts a fresh session.
    handle.submit_text("hello again").unwrap();
    settle(&handle, |h| h.messages().len() == 2 && idle(h)).await;
    assert_eq!(backend.create_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn ending_while_processing_drops_the_reply() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let backend = Arc::new(
        MockBackend::new()
            .with_reply("Late reply.")
            .with_generate_delay(Duration::from_secs(1)),
    );
    let handle = Conversation::spawn(
        backend.clone(),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );
    let mut events = handle.events();

    handle.submit_text("I need to go").unwrap();
    settle(&handle, |h| h.messages().len() == 1 && h.state().processing).await;
    let summary = handle.end_session().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(summary.is_some());
    assert!(idle(&handle));
    assert!(!handle.state().latched);
    assert_eq!(handle.messages().len(), 1);
    assert_eq!(synthesizer.speak_count(), 0);
    assert_eq!(recognizer.start_count(), 0);
    assert_eq!(backend.create_calls(), 1);
    assert_eq!(backend.close_calls(), 1);
    assert!(drain(&mut events).iter().any(|e| matches!(e, ConversationEvent::SessionEnded { .. })));
}

#[tokio::test(start_paused = true)]
async fn transient_error_in_conversation_mode_notifies_and_rearms() {
    let recognizer = Arc::new(MockRecognizer::new());
    let synthesizer = Arc::new(MockSynthesizer::new());
    let handle = Conversation::spawn(
        Arc::new(MockBackend::new()),
        capabilities(&recognizer, &synthesizer),
        latched(),
    );
    let mut events = handle.events();

    handle.start_listening().unwrap();
    settle(&handle, |h| h.state().listening).await;
    recognizer.fail(RecognitionErrorKind::AudioCapture);
    settle(&handle, |_| recognizer.start_count() == 2).await;
    settle(&handle, |h| h.state().listening).await;

    assert!(handle.state().latched);
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ConversationEvent::Notice(notice) if notice.kind == NoticeKind::Recognition
    )));
}
