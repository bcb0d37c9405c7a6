//! Unit tests for the transcript replay provider.

use tellstream::config::ModelSettings;
use tellstream::models::session::TellSession;
use tellstream::provider::replay::ReplayStream;
use tellstream::provider::{estimate_tokens, ModelStream, StreamEvent, TellContext};
use tokio_util::sync::CancellationToken;

fn context() -> TellContext {
    let session = TellSession::new("plan", "main", 0, "replay", ModelSettings::default());
    TellContext::for_session(&session)
}

async fn drain(provider: &ReplayStream) -> Vec<StreamEvent> {
    let context = context();
    let mut rx = provider
        .open(&context, CancellationToken::new())
        .await
        .expect("open");
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn replays_fragments_then_completes() {
    let provider = ReplayStream::from_fragments(vec!["ab".into(), "cd".into()]);
    let events = drain(&provider).await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::Fragment("ab".into()));
    assert_eq!(events[1], StreamEvent::Fragment("cd".into()));
    assert!(matches!(events[2], StreamEvent::Completed { .. }));
}

#[tokio::test]
async fn from_text_chunks_reassemble_to_the_original() {
    let text = "héllo wörld, this is a transcript"; // multibyte chars included
    let provider = ReplayStream::from_text(text, 5);
    let events = drain(&provider).await;

    let mut reassembled = String::new();
    for event in &events {
        if let StreamEvent::Fragment(f) = event {
            reassembled.push_str(f);
        }
    }
    assert_eq!(reassembled, text);
}

#[tokio::test]
async fn chunk_size_zero_is_clamped() {
    let provider = ReplayStream::from_text("abc", 0);
    let events = drain(&provider).await;
    // One char per fragment plus the completion event.
    assert_eq!(events.len(), 4);
}

#[tokio::test]
async fn completion_reports_the_token_estimate() {
    let text = "12345678"; // 8 bytes -> 2 estimated tokens
    let provider = ReplayStream::from_text(text, 4);
    let events = drain(&provider).await;

    match events.last() {
        Some(StreamEvent::Completed { reply_tokens, .. }) => assert_eq!(*reply_tokens, 2),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_stops_the_replay() {
    let provider = ReplayStream::from_fragments(vec!["a".into(); 100]);
    let context = context();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut rx = provider.open(&context, cancel).await.expect("open");
    let mut count = 0;
    while rx.recv().await.is_some() {
        count += 1;
    }
    // The replay task observes cancellation and stops early, without a
    // completion event.
    assert!(count < 101, "replay should stop early, saw {count} events");
}

#[test]
fn token_estimate_rounds_up() {
    assert_eq!(estimate_tokens(""), 0);
    assert_eq!(estimate_tokens("a"), 1);
    assert_eq!(estimate_tokens("abcd"), 1);
    assert_eq!(estimate_tokens("abcde"), 2);
}
