//! Subtask model.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a planned subtask.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskState {
    /// Planned but not yet started.
    Pending,
    /// Currently being implemented.
    Active,
    /// Implementation finished.
    Completed,
}

/// A named unit of planned implementation work within a plan iteration.
///
/// Lifecycle is driven by session stage transitions; the reply parser reads
/// subtasks to know which boundaries to expect but never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Subtask {
    /// Subtask title as announced in the plan.
    pub name: String,
    /// Zero-based position within the plan iteration.
    pub position: u32,
    /// Current lifecycle state.
    pub state: SubtaskState,
}

impl Subtask {
    /// Construct a pending subtask.
    #[must_use]
    pub fn new(name: impl Into<String>, position: u32) -> Self {
        Self {
            name: name.into(),
            position,
            state: SubtaskState::Pending,
        }
    }
}
