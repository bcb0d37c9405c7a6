//! Unit tests for the tell session model and stage machine.

use tellstream::config::ModelSettings;
use tellstream::models::operation::Operation;
use tellstream::models::session::{Stage, TellSession};
use tellstream::models::subtask::SubtaskState;

fn session() -> TellSession {
    TellSession::new("plan-1", "main", 0, "add a parser", ModelSettings::default())
}

#[test]
fn new_session_starts_in_starting_stage() {
    let session = session();

    assert_eq!(session.stage, Stage::Starting);
    assert_eq!(session.attempt_count, 0);
    assert!(session.operations.is_empty());
    assert!(session.first_token_at.is_none());
    assert!(!session.has_assistant_reply);
    assert_ne!(session.reply_id, session.generation_id);
}

#[test]
fn happy_path_transitions_are_permitted() {
    let mut session = session();

    session.advance(Stage::Planning).expect("to planning");
    session
        .advance(Stage::ImplementingSubtask)
        .expect("to implementing");
    session
        .advance(Stage::AwaitingMissingFileDecision)
        .expect("to awaiting");
    session
        .advance(Stage::ImplementingSubtask)
        .expect("resume implementing");
    session.advance(Stage::Finished).expect("to finished");
}

#[test]
fn failed_is_reachable_from_any_non_terminal_stage() {
    for stage in [
        Stage::Starting,
        Stage::Planning,
        Stage::ImplementingSubtask,
        Stage::AwaitingMissingFileDecision,
    ] {
        let mut s = session();
        s.stage = stage;
        assert!(s.can_transition_to(Stage::Failed), "{stage:?} -> Failed");
    }
}

#[test]
fn terminal_stages_permit_no_transitions() {
    for stage in [Stage::Finished, Stage::Failed] {
        let mut s = session();
        s.stage = stage;
        assert!(stage.is_terminal());
        assert!(s.advance(Stage::Planning).is_err());
        assert!(s.advance(Stage::Failed).is_err() || stage == Stage::Failed);
    }
}

#[test]
fn skipping_planning_is_rejected() {
    let mut s = session();
    assert!(s.advance(Stage::ImplementingSubtask).is_err());
    assert!(s.advance(Stage::Finished).is_err());
}

#[test]
fn advance_to_same_stage_is_a_no_op() {
    let mut s = session();
    s.advance(Stage::Planning).expect("to planning");
    s.advance(Stage::Planning).expect("same stage is fine");
    assert_eq!(s.stage, Stage::Planning);
}

#[test]
fn append_operation_returns_sequence_numbers() {
    let mut s = session();

    assert_eq!(s.append_operation(Operation::file("a.rs", "a")), 0);
    assert_eq!(s.append_operation(Operation::file("b.rs", "b")), 1);
    assert_eq!(s.operations.len(), 2);
    assert_eq!(s.operations[0].path, "a.rs");
}

#[test]
fn activate_subtask_registers_unannounced_subtasks() {
    let mut s = session();
    s.activate_subtask("first");

    assert_eq!(s.subtasks.len(), 1);
    assert_eq!(s.subtasks[0].state, SubtaskState::Active);
    assert_eq!(s.current_subtask_name(), Some("first"));
}

#[test]
fn activating_the_next_subtask_completes_the_previous_one() {
    let mut s = session();
    s.activate_subtask("first");
    s.activate_subtask("second");

    assert_eq!(s.subtasks[0].state, SubtaskState::Completed);
    assert_eq!(s.subtasks[1].state, SubtaskState::Active);
    assert_eq!(s.current_subtask_name(), Some("second"));
}

#[test]
fn complete_active_subtask_clears_the_pointer() {
    let mut s = session();
    s.activate_subtask("only");
    s.complete_active_subtask();

    assert_eq!(s.subtasks[0].state, SubtaskState::Completed);
    assert_eq!(s.current_subtask_name(), None);
    assert!(!s.has_pending_subtasks());
}

#[test]
fn has_pending_subtasks_reflects_lifecycle() {
    let mut s = session();
    assert!(!s.has_pending_subtasks());

    s.activate_subtask("one");
    assert!(s.has_pending_subtasks());

    s.complete_active_subtask();
    assert!(!s.has_pending_subtasks());
}
