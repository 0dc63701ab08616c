//! End-to-end session behaviour against the scripted completion service
//!
//! Covers ordering, single-flight submissions, silence after abort and reset,
//! the display/wire split for urgent questions, and error recovery.

use lifeforge_companion::{
    completion::{CompletionError, ScriptedCompletionService},
    config::{Config, ConversationConfig},
    conversation::{classify, ConversationStore, Role, Turn, URGENCY_PREAMBLE},
    session::{ChatSession, RejectReason, SessionEvent, SubmitOutcome},
};
use std::sync::Arc;
use std::time::Duration;

fn session() -> (Arc<ScriptedCompletionService>, ChatSession) {
    let service = Arc::new(ScriptedCompletionService::new());
    let session = ChatSession::new(&Config::default(), service.clone());
    (service, session)
}

fn welcome() -> String {
    ConversationConfig::default().welcome_message
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_emergency_question_streams_and_finalizes() {
    let (service, mut session) = session();
    let script = service.push_stream();
    script.chunk("I'm sorry");
    script.chunk(" to hear that.");
    script.finish();

    let outcome = session.submit("emergency, need platelets now");
    let SubmitOutcome::Accepted { user_turn, assistant_turn, urgent } = outcome else {
        panic!("submission rejected: {:?}", outcome);
    };
    assert!(urgent);

    let events = session.run_until_idle().await;
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Completed { turn_id: assistant_turn })
    );

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].content, welcome());

    assert_eq!(snapshot[1].id, user_turn);
    assert_eq!(snapshot[1].role, Role::User);
    assert_eq!(snapshot[1].content, "emergency, need platelets now");
    assert!(snapshot[1].is_emergency);

    assert_eq!(snapshot[2].id, assistant_turn);
    assert_eq!(snapshot[2].content, "I'm sorry to hear that.");
    assert!(snapshot[2].is_emergency);
    assert!(!snapshot[2].streaming);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_cancel_after_first_chunk_ignores_late_chunks() {
    let (service, mut session) = session();
    let script = service.push_stream();
    script.chunk("Whole blood can be donated");

    session.submit("How often can I donate blood?");
    assert!(matches!(
        session.next_event().await,
        Some(SessionEvent::Chunk { .. })
    ));

    assert!(session.cancel());
    script.chunk(" every 56 days");
    script.chunk(" in India.");
    script.finish();
    settle().await;

    assert_eq!(session.next_event().await, None);
    let last = session.snapshot().pop().unwrap();
    assert_eq!(last.content, "Whole blood can be donated");
    assert!(!last.streaming);
}

#[tokio::test]
async fn test_reset_mid_stream_leaves_only_welcome() {
    let (service, mut session) = session();
    let script = service.push_stream();
    script.chunk("Thalassemia ");

    session.submit("What is thalassemia major?");
    assert!(matches!(
        session.next_event().await,
        Some(SessionEvent::Chunk { .. })
    ));

    session.reset();
    script.chunk("is an inherited");
    script.finish();
    settle().await;

    assert_eq!(session.next_event().await, None);
    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].content, welcome());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_chunks_concatenate_in_order() {
    let (service, mut session) = session();
    let script = service.push_stream();
    let parts = ["Pla", "te", "lets ", "last ", "5 days", "."];
    for part in parts {
        script.chunk(part);
    }
    script.finish();

    session.submit("How long do platelets last?");
    let events = session.run_until_idle().await;

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Chunk { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, parts.concat());
    assert_eq!(session.snapshot().pop().unwrap().content, parts.concat());
}

#[tokio::test]
async fn test_submit_while_streaming_is_rejected() {
    let (service, mut session) = session();
    let script = service.push_stream();

    assert!(session.submit("Can I donate after a tattoo?").is_accepted());
    assert_eq!(
        session.submit("And after travelling?"),
        SubmitOutcome::Rejected(RejectReason::Busy)
    );
    assert_eq!(session.snapshot().len(), 3);

    script.chunk("Wait 6 months.");
    script.finish();
    session.run_until_idle().await;

    assert_eq!(service.request_count(), 1);
    assert_eq!(session.snapshot().iter().filter(|t| t.streaming).count(), 0);
    assert!(session.submit("And after travelling?").is_accepted());
}

#[tokio::test]
async fn test_urgent_text_displayed_plain_and_sent_with_preamble() {
    let (service, mut session) = session();
    service.push_stream().finish();
    let text = "Patient is in the ICU and needs O negative";

    session.submit(text);
    let sent = session.in_flight_context().unwrap().last().unwrap().content.clone();
    assert_eq!(sent, format!("{}{}", URGENCY_PREAMBLE, text));
    session.run_until_idle().await;

    assert_eq!(session.snapshot()[1].content, text);
    let request = &service.requests()[0];
    assert_eq!(request.messages.last().unwrap().content, sent);
    assert!(request.params.urgent);
}

#[tokio::test]
async fn test_only_newest_turn_carries_preamble() {
    let (service, mut session) = session();
    let first = service.push_stream();
    first.chunk("Call 108 now.");
    first.finish();
    let second = service.push_stream();
    second.chunk("Yes.");
    second.finish();

    session.submit("urgent: donor fainted");
    session.run_until_idle().await;
    session.submit("Should they drink water?");
    session.run_until_idle().await;

    let messages = &service.requests()[1].messages;
    assert!(messages.iter().all(|m| !m.content.starts_with(URGENCY_PREAMBLE)));
    assert!(messages.iter().any(|m| m.content == "urgent: donor fainted"));
    assert_eq!(messages.last().unwrap().content, "Should they drink water?");
    assert!(!service.requests()[1].params.urgent);
}

#[test]
fn test_classifier_examples() {
    assert!(classify("Patient is in the ICU"));
    assert!(!classify("How do I donate blood"));
}

#[tokio::test]
async fn test_open_failure_installs_fallback() {
    let (service, mut session) = session();
    service.push_failure(CompletionError::Upstream {
        status: 503,
        body: "unavailable".into(),
    });

    session.submit("critical bleeding after surgery");
    let events = session.run_until_idle().await;
    assert!(matches!(events.as_slice(), [SessionEvent::Failed { .. }]));

    let last = session.snapshot().pop().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, ConversationConfig::default().fallback_for(true));
    assert!(last.content.contains("108"));
    assert!(last.is_emergency);
    assert!(!last.streaming);
}

#[tokio::test]
async fn test_mid_stream_failure_replaces_partial_text() {
    let (service, mut session) = session();
    let script = service.push_stream();
    script.chunk("HLA matching ");
    script.fail(CompletionError::MalformedStream("bad payload".into()));

    session.submit("What is HLA matching?");
    session.run_until_idle().await;

    let last = session.snapshot().pop().unwrap();
    assert_eq!(last.content, ConversationConfig::default().fallback_message);
    assert!(!last.is_emergency);
}

#[tokio::test]
async fn test_events_from_cancelled_stream_do_not_leak_into_next_answer() {
    let (service, mut session) = session();
    let first = service.push_stream();
    first.chunk("old ");
    first.chunk("answer");
    let second = service.push_stream();
    second.chunk("new answer");
    second.finish();

    session.submit("first question");
    session.next_event().await;
    session.cancel();

    session.submit("second question");
    session.run_until_idle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot[2].content, "old ");
    assert_eq!(snapshot[4].content, "new answer");
}

#[tokio::test]
async fn test_history_window_is_capped() {
    let service = Arc::new(ScriptedCompletionService::new());
    let mut config = Config::default();
    config.conversation.history_window = 2;
    let mut session = ChatSession::new(&config, service.clone());

    for answer in ["one", "two"] {
        let script = service.push_stream();
        script.chunk(answer);
        script.finish();
        session.submit(&format!("question {}", answer));
        session.run_until_idle().await;
    }

    let messages = &service.requests()[1].messages;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].content, "question one");
    assert_eq!(messages[1].content, "one");
    assert_eq!(messages[2].content, "question two");
}

#[test]
fn test_store_sequence_survives_reset() {
    let mut store = ConversationStore::with_seed(Turn::assistant("hi", false));
    let id = store.append(Turn::user("q", false)).unwrap();
    let before = store.get(id).unwrap().sequence;

    store.reset(Some(Turn::assistant("hi", false)));
    let after = store.snapshot()[0].sequence;
    assert!(after > before);
}

#[tokio::test]
async fn test_cancel_with_finished_answer_still_queued() {
    let (service, mut session) = session();
    let script = service.push_stream();
    script.chunk("Apheresis takes ");
    script.chunk("about two hours.");
    script.finish();

    session.submit("How long does platelet apheresis take?");
    assert!(matches!(
        session.next_event().await,
        Some(SessionEvent::Chunk { .. })
    ));
    settle().await;

    assert!(session.cancel());
    assert_eq!(session.next_event().await, None);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[2].content, "Apheresis takes ");
    assert!(snapshot.iter().all(|t| !t.streaming));

    let next = service.push_stream();
    next.chunk("Yes.");
    next.finish();
    assert!(session.submit("Can I eat before donating?").is_accepted());
    session.run_until_idle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot[2].content, "Apheresis takes ");
    assert_eq!(snapshot[4].content, "Yes.");
}

#[tokio::test]
async fn test_reset_with_finished_answer_still_queued() {
    let (service, mut session) = session();
    let script = service.push_stream();
    script.chunk("Iron chelation ");
    script.finish();

    session.submit("What is iron chelation?");
    settle().await;

    session.reset();
    assert_eq!(session.next_event().await, None);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].content, welcome());
    assert!(!snapshot[0].streaming);

    let next = service.push_stream();
    next.chunk("It removes excess iron.");
    next.finish();
    assert!(session.submit("What is iron chelation?").is_accepted());
    session.run_until_idle().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[2].content, "It removes excess iron.");
}

#[tokio::test]
async fn test_fallback_text_is_not_sent_upstream() {
    let (service, mut session) = session();
    service.push_failure(CompletionError::Timeout("read".into()));
    service.push_stream().finish();

    session.submit("Can I donate milk while on antibiotics?");
    session.run_until_idle().await;
    session.submit("What about after the course ends?");

    let messages = session.in_flight_context().unwrap().to_vec();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Can I donate milk while on antibiotics?");
    assert!(messages
        .iter()
        .all(|m| m.content != ConversationConfig::default().fallback_message));
    assert!(!messages.iter().any(|m| m.content == welcome()));
}
