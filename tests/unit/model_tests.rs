//! Unit tests for operation and subtask models.

use tellstream::models::operation::{Operation, OperationKind};
use tellstream::models::subtask::{Subtask, SubtaskState};

#[test]
fn operation_constructors_set_kind() {
    let file = Operation::file("src/lib.rs", "content");
    assert_eq!(file.kind, OperationKind::File);
    assert_eq!(file.path, "src/lib.rs");
    assert_eq!(file.content, "content");

    let patch = Operation::patch("src/lib.rs", "@@");
    assert_eq!(patch.kind, OperationKind::Patch);
}

#[test]
fn operation_kind_serializes_snake_case() {
    let json = serde_json::to_string(&OperationKind::Patch).expect("serialize");
    assert_eq!(json, "\"patch\"");
}

#[test]
fn new_subtask_is_pending() {
    let subtask = Subtask::new("write tests", 2);
    assert_eq!(subtask.state, SubtaskState::Pending);
    assert_eq!(subtask.position, 2);
    assert_eq!(subtask.name, "write tests");
}
