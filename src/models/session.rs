//! Tell session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ModelSettings;
use crate::models::operation::Operation;
use crate::models::subtask::{Subtask, SubtaskState};
use crate::{AppError, Result};

/// Session phase within the tell lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Session accepted, no stream opened yet.
    Starting,
    /// Model is producing the plan narrative.
    Planning,
    /// Model is implementing the currently active subtask.
    ImplementingSubtask,
    /// Stream suspended until the missing-file decision is supplied.
    AwaitingMissingFileDecision,
    /// Session completed and the result was reported.
    Finished,
    /// Session terminated with a classified failure.
    Failed,
}

impl Stage {
    /// Whether the stage is terminal (no further transitions permitted).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// One tell exchange: the session state mutated exclusively by the attempt
/// loop and read by observers through published events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TellSession {
    /// Plan the tell belongs to.
    pub plan_id: String,
    /// Plan branch the tell operates on.
    pub branch: String,
    /// Iteration number within the plan.
    pub iteration: u32,
    /// Identifier of the assistant reply produced by this session.
    pub reply_id: String,
    /// Identifier of the generation request sent to the provider.
    pub generation_id: String,
    /// User instruction that started the exchange.
    pub instruction: String,
    /// Current lifecycle stage.
    pub stage: Stage,
    /// Stream attempts consumed so far (0-based until the first retry).
    pub attempt_count: u32,
    /// Cumulative prompt tokens across all attempts.
    pub request_tokens: u64,
    /// Cumulative reply tokens across all attempts.
    pub reply_tokens: u64,
    /// When the tell request was accepted.
    pub started_at: DateTime<Utc>,
    /// When the first fragment arrived, if any has.
    pub first_token_at: Option<DateTime<Utc>>,
    /// Whether any assistant content has been produced yet.
    pub has_assistant_reply: bool,
    /// Model configuration snapshot taken at session start.
    pub model: ModelSettings,
    /// Operations emitted so far, in emission order. Never truncated.
    pub operations: Vec<Operation>,
    /// Planned subtasks for this iteration.
    pub subtasks: Vec<Subtask>,
    /// Index of the currently active subtask, if any.
    pub current_subtask: Option<usize>,
    /// Conversation summaries loaded at session start.
    pub summaries: Vec<String>,
}

impl TellSession {
    /// Construct a new session in the `Starting` stage with generated
    /// reply and generation identifiers.
    #[must_use]
    pub fn new(
        plan_id: impl Into<String>,
        branch: impl Into<String>,
        iteration: u32,
        instruction: impl Into<String>,
        model: ModelSettings,
    ) -> Self {
        Self {
            plan_id: plan_id.into(),
            branch: branch.into(),
            iteration,
            reply_id: Uuid::new_v4().to_string(),
            generation_id: Uuid::new_v4().to_string(),
            instruction: instruction.into(),
            stage: Stage::Starting,
            attempt_count: 0,
            request_tokens: 0,
            reply_tokens: 0,
            started_at: Utc::now(),
            first_token_at: None,
            has_assistant_reply: false,
            model,
            operations: Vec::new(),
            subtasks: Vec::new(),
            current_subtask: None,
            summaries: Vec::new(),
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: Stage) -> bool {
        matches!(
            (self.stage, next),
            (Stage::Starting, Stage::Planning)
                | (
                    Stage::Planning,
                    Stage::ImplementingSubtask
                        | Stage::AwaitingMissingFileDecision
                        | Stage::Finished
                )
                | (
                    Stage::ImplementingSubtask,
                    Stage::AwaitingMissingFileDecision | Stage::Finished
                )
                | (
                    Stage::AwaitingMissingFileDecision,
                    Stage::Planning | Stage::ImplementingSubtask
                )
        ) || (!self.stage.is_terminal() && next == Stage::Failed)
    }

    /// Advance the stage, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the transition is not permitted.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if self.stage == next {
            return Ok(());
        }
        if !self.can_transition_to(next) {
            return Err(AppError::Session(format!(
                "invalid stage transition {:?} -> {next:?}",
                self.stage
            )));
        }
        self.stage = next;
        Ok(())
    }

    /// Append an operation to the emission list, returning its sequence
    /// number.
    pub fn append_operation(&mut self, operation: Operation) -> u64 {
        self.operations.push(operation);
        u64::try_from(self.operations.len() - 1).unwrap_or(u64::MAX)
    }

    /// Mark the named subtask active, registering it if the plan did not
    /// announce it up front. A previously active subtask is completed first:
    /// the model has moved on.
    pub fn activate_subtask(&mut self, name: &str) {
        self.complete_active_subtask();

        let index = match self.subtasks.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                let position = u32::try_from(self.subtasks.len()).unwrap_or(u32::MAX);
                self.subtasks.push(Subtask::new(name, position));
                self.subtasks.len() - 1
            }
        };
        self.subtasks[index].state = SubtaskState::Active;
        self.current_subtask = Some(index);
    }

    /// Complete the currently active subtask, if any, clearing the pointer.
    pub fn complete_active_subtask(&mut self) {
        if let Some(index) = self.current_subtask.take() {
            if let Some(subtask) = self.subtasks.get_mut(index) {
                subtask.state = SubtaskState::Completed;
            }
        }
    }

    /// Name of the currently active subtask, if any.
    #[must_use]
    pub fn current_subtask_name(&self) -> Option<&str> {
        self.current_subtask
            .and_then(|index| self.subtasks.get(index))
            .map(|subtask| subtask.name.as_str())
    }

    /// Whether any subtask is still pending or active.
    #[must_use]
    pub fn has_pending_subtasks(&self) -> bool {
        self.subtasks
            .iter()
            .any(|s| s.state != SubtaskState::Completed)
    }
}
