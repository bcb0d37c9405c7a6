//! Unit tests for `TellRepo` persistence.
//!
//! Validates:
//! - Subtask and summary round trips in position order
//! - `save_result` persisting the session row, operations, and subtasks
//! - `get_session` returning `None` for unknown identifiers
//! - Failure kind/message persistence for failed sessions

use std::sync::Arc;

use tellstream::config::ModelSettings;
use tellstream::models::operation::Operation;
use tellstream::models::session::{Stage, TellSession};
use tellstream::models::subtask::{Subtask, SubtaskState};
use tellstream::persistence::{db, tell_repo::TellRepo};
use tellstream::provider::StreamFailure;

async fn repo() -> TellRepo {
    let database = db::connect_memory().await.expect("db");
    TellRepo::new(Arc::new(database))
}

fn sample_session() -> TellSession {
    TellSession::new("plan-1", "main", 2, "add a parser", ModelSettings::default())
}

#[tokio::test]
async fn subtasks_round_trip_in_position_order() {
    let repo = repo().await;
    let subtasks = vec![
        Subtask::new("first", 0),
        Subtask::new("second", 1),
        Subtask {
            name: "third".into(),
            position: 2,
            state: SubtaskState::Completed,
        },
    ];

    repo.save_subtasks("plan-1", "main", &subtasks)
        .await
        .expect("save");
    let loaded = repo.load_subtasks("plan-1", "main").await.expect("load");

    assert_eq!(loaded, subtasks);
}

#[tokio::test]
async fn subtasks_are_scoped_by_plan_and_branch() {
    let repo = repo().await;
    repo.save_subtasks("plan-1", "main", &[Subtask::new("only", 0)])
        .await
        .expect("save");

    assert!(repo
        .load_subtasks("plan-1", "feature")
        .await
        .expect("load")
        .is_empty());
    assert!(repo
        .load_subtasks("plan-2", "main")
        .await
        .expect("load")
        .is_empty());
}

#[tokio::test]
async fn summaries_round_trip_in_position_order() {
    let repo = repo().await;
    repo.save_summary("plan-1", "main", 1, "second summary")
        .await
        .expect("save");
    repo.save_summary("plan-1", "main", 0, "first summary")
        .await
        .expect("save");

    let summaries = repo.load_summaries("plan-1", "main").await.expect("load");
    assert_eq!(summaries, vec!["first summary", "second summary"]);
}

#[tokio::test]
async fn save_result_persists_session_and_operations() {
    let repo = repo().await;
    let mut session = sample_session();
    session.stage = Stage::Finished;
    session.request_tokens = 1200;
    session.reply_tokens = 340;
    session.has_assistant_reply = true;
    session.append_operation(Operation::file("src/a.rs", "fn a() {}\n"));
    session.append_operation(Operation::patch("src/b.rs", "@@ -1 +1 @@\n"));

    repo.save_result(&session, None).await.expect("save");

    let record = repo
        .get_session(&session.reply_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.plan_id, "plan-1");
    assert_eq!(record.iteration, 2);
    assert_eq!(record.stage, Stage::Finished);
    assert_eq!(record.request_tokens, 1200);
    assert_eq!(record.reply_tokens, 340);
    assert!(record.has_assistant_reply);
    assert!(record.failure_kind.is_none());

    let operations = repo
        .load_operations(&session.reply_id)
        .await
        .expect("ops");
    assert_eq!(operations, session.operations);
}

#[tokio::test]
async fn save_result_records_the_failure() {
    let repo = repo().await;
    let mut session = sample_session();
    session.stage = Stage::Failed;
    session.attempt_count = 4;

    let failure = StreamFailure::InactivityTimeout(120);
    repo.save_result(&session, Some(&failure)).await.expect("save");

    let record = repo
        .get_session(&session.reply_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.stage, Stage::Failed);
    assert_eq!(record.attempt_count, 4);
    assert_eq!(record.failure_kind.as_deref(), Some("inactivity_timeout"));
    assert!(record
        .failure_message
        .as_deref()
        .is_some_and(|msg| msg.contains("120")));
}

#[tokio::test]
async fn save_result_is_idempotent_per_reply() {
    let repo = repo().await;
    let mut session = sample_session();
    session.stage = Stage::Finished;
    session.append_operation(Operation::file("a.rs", "one"));

    repo.save_result(&session, None).await.expect("first save");
    repo.save_result(&session, None).await.expect("second save");

    let operations = repo
        .load_operations(&session.reply_id)
        .await
        .expect("ops");
    assert_eq!(operations.len(), 1);
}

#[tokio::test]
async fn get_session_returns_none_for_unknown_reply() {
    let repo = repo().await;
    assert!(repo
        .get_session("no-such-reply")
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn timestamps_survive_the_round_trip() {
    let repo = repo().await;
    let mut session = sample_session();
    session.stage = Stage::Finished;
    session.first_token_at = Some(session.started_at);

    repo.save_result(&session, None).await.expect("save");

    let record = repo
        .get_session(&session.reply_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(
        record.started_at.timestamp_millis(),
        session.started_at.timestamp_millis()
    );
    assert!(record.first_token_at.is_some());
}
