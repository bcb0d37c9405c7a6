//! Tell session repository for `SQLite` persistence.
//!
//! Reads plan context (subtasks, conversation summaries) at session start
//! and writes the terminal session row plus the ordered operation list at
//! session end.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::operation::{Operation, OperationKind};
use crate::models::session::{Stage, TellSession};
use crate::models::subtask::{Subtask, SubtaskState};
use crate::provider::StreamFailure;
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for tell session records.
#[derive(Clone)]
pub struct TellRepo {
    db: Arc<Database>,
}

/// Persisted summary of a tell session, as read back from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TellSessionRecord {
    /// Reply identifier (primary key).
    pub reply_id: String,
    /// Plan the tell belongs to.
    pub plan_id: String,
    /// Plan branch.
    pub branch: String,
    /// Iteration number within the plan.
    pub iteration: u32,
    /// Generation request identifier.
    pub generation_id: String,
    /// Terminal stage.
    pub stage: Stage,
    /// Attempts consumed.
    pub attempt_count: u32,
    /// Cumulative prompt tokens.
    pub request_tokens: u64,
    /// Cumulative reply tokens.
    pub reply_tokens: u64,
    /// When the tell was accepted.
    pub started_at: DateTime<Utc>,
    /// When the first fragment arrived, if any did.
    pub first_token_at: Option<DateTime<Utc>>,
    /// Whether any assistant content was produced.
    pub has_assistant_reply: bool,
    /// Terminal failure kind, if the session failed.
    pub failure_kind: Option<String>,
    /// Terminal failure description, if the session failed.
    pub failure_message: Option<String>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    reply_id: String,
    plan_id: String,
    branch: String,
    iteration: i64,
    generation_id: String,
    stage: String,
    attempt_count: i64,
    request_tokens: i64,
    reply_tokens: i64,
    started_at: String,
    first_token_at: Option<String>,
    has_assistant_reply: bool,
    failure_kind: Option<String>,
    failure_message: Option<String>,
}

impl SessionRow {
    /// Convert a database row into the domain record.
    fn into_record(self) -> Result<TellSessionRecord> {
        Ok(TellSessionRecord {
            reply_id: self.reply_id,
            plan_id: self.plan_id,
            branch: self.branch,
            iteration: to_u32(self.iteration, "iteration")?,
            generation_id: self.generation_id,
            stage: parse_stage(&self.stage)?,
            attempt_count: to_u32(self.attempt_count, "attempt_count")?,
            request_tokens: to_u64(self.request_tokens, "request_tokens")?,
            reply_tokens: to_u64(self.reply_tokens, "reply_tokens")?,
            started_at: parse_timestamp(&self.started_at)?,
            first_token_at: self
                .first_token_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            has_assistant_reply: self.has_assistant_reply,
            failure_kind: self.failure_kind,
            failure_message: self.failure_message,
        })
    }
}

/// Internal row struct for operation rows.
#[derive(sqlx::FromRow)]
struct OperationRow {
    kind: String,
    path: String,
    content: String,
}

/// Internal row struct for subtask rows.
#[derive(sqlx::FromRow)]
struct SubtaskRow {
    position: i64,
    name: String,
    state: String,
}

fn parse_stage(s: &str) -> Result<Stage> {
    match s {
        "starting" => Ok(Stage::Starting),
        "planning" => Ok(Stage::Planning),
        "implementing_subtask" => Ok(Stage::ImplementingSubtask),
        "awaiting_missing_file_decision" => Ok(Stage::AwaitingMissingFileDecision),
        "finished" => Ok(Stage::Finished),
        "failed" => Ok(Stage::Failed),
        other => Err(AppError::Db(format!("invalid stage: {other}"))),
    }
}

fn stage_str(stage: Stage) -> &'static str {
    match stage {
        Stage::Starting => "starting",
        Stage::Planning => "planning",
        Stage::ImplementingSubtask => "implementing_subtask",
        Stage::AwaitingMissingFileDecision => "awaiting_missing_file_decision",
        Stage::Finished => "finished",
        Stage::Failed => "failed",
    }
}

fn parse_kind(s: &str) -> Result<OperationKind> {
    match s {
        "file" => Ok(OperationKind::File),
        "patch" => Ok(OperationKind::Patch),
        other => Err(AppError::Db(format!("invalid operation kind: {other}"))),
    }
}

fn kind_str(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::File => "file",
        OperationKind::Patch => "patch",
    }
}

fn parse_state(s: &str) -> Result<SubtaskState> {
    match s {
        "pending" => Ok(SubtaskState::Pending),
        "active" => Ok(SubtaskState::Active),
        "completed" => Ok(SubtaskState::Completed),
        other => Err(AppError::Db(format!("invalid subtask state: {other}"))),
    }
}

fn state_str(state: SubtaskState) -> &'static str {
    match state {
        SubtaskState::Pending => "pending",
        SubtaskState::Active => "active",
        SubtaskState::Completed => "completed",
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Db(format!("invalid {column}: {value}")))
}

fn to_u64(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| AppError::Db(format!("invalid {column}: {value}")))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TellRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load the plan branch's subtasks in position order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn load_subtasks(&self, plan_id: &str, branch: &str) -> Result<Vec<Subtask>> {
        let rows: Vec<SubtaskRow> = sqlx::query_as(
            "SELECT position, name, state FROM subtask \
             WHERE plan_id = ?1 AND branch = ?2 ORDER BY position",
        )
        .bind(plan_id)
        .bind(branch)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Subtask {
                    name: row.name,
                    position: to_u32(row.position, "position")?,
                    state: parse_state(&row.state)?,
                })
            })
            .collect()
    }

    /// Replace the plan branch's subtask records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a statement fails.
    pub async fn save_subtasks(
        &self,
        plan_id: &str,
        branch: &str,
        subtasks: &[Subtask],
    ) -> Result<()> {
        sqlx::query("DELETE FROM subtask WHERE plan_id = ?1 AND branch = ?2")
            .bind(plan_id)
            .bind(branch)
            .execute(self.db.as_ref())
            .await?;

        for subtask in subtasks {
            sqlx::query(
                "INSERT INTO subtask (plan_id, branch, position, name, state) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(plan_id)
            .bind(branch)
            .bind(i64::from(subtask.position))
            .bind(&subtask.name)
            .bind(state_str(subtask.state))
            .execute(self.db.as_ref())
            .await?;
        }
        Ok(())
    }

    /// Load the plan branch's conversation summaries in position order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn load_summaries(&self, plan_id: &str, branch: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT summary FROM convo_summary \
             WHERE plan_id = ?1 AND branch = ?2 ORDER BY position",
        )
        .bind(plan_id)
        .bind(branch)
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(rows.into_iter().map(|(summary,)| summary).collect())
    }

    /// Append a conversation summary for the plan branch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn save_summary(
        &self,
        plan_id: &str,
        branch: &str,
        position: u32,
        summary: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO convo_summary (plan_id, branch, position, summary) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(plan_id)
        .bind(branch)
        .bind(i64::from(position))
        .bind(summary)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Write the session's terminal state: the session row, the ordered
    /// operation list, and the updated subtask records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a statement fails.
    pub async fn save_result(
        &self,
        session: &TellSession,
        failure: Option<&StreamFailure>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO tell_session (reply_id, plan_id, branch, iteration, \
             generation_id, instruction, stage, attempt_count, request_tokens, reply_tokens, \
             started_at, first_token_at, has_assistant_reply, model_provider, model_name, \
             failure_kind, failure_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(&session.reply_id)
        .bind(&session.plan_id)
        .bind(&session.branch)
        .bind(i64::from(session.iteration))
        .bind(&session.generation_id)
        .bind(&session.instruction)
        .bind(stage_str(session.stage))
        .bind(i64::from(session.attempt_count))
        .bind(to_i64(session.request_tokens))
        .bind(to_i64(session.reply_tokens))
        .bind(session.started_at.to_rfc3339())
        .bind(session.first_token_at.map(|ts| ts.to_rfc3339()))
        .bind(session.has_assistant_reply)
        .bind(&session.model.provider)
        .bind(&session.model.model)
        .bind(failure.map(StreamFailure::kind_str))
        .bind(failure.map(ToString::to_string))
        .execute(self.db.as_ref())
        .await?;

        sqlx::query("DELETE FROM operation WHERE session_reply_id = ?1")
            .bind(&session.reply_id)
            .execute(self.db.as_ref())
            .await?;

        for (seq, operation) in session.operations.iter().enumerate() {
            sqlx::query(
                "INSERT INTO operation (session_reply_id, seq, kind, path, content) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&session.reply_id)
            .bind(to_i64(u64::try_from(seq).unwrap_or(u64::MAX)))
            .bind(kind_str(operation.kind))
            .bind(&operation.path)
            .bind(&operation.content)
            .execute(self.db.as_ref())
            .await?;
        }

        self.save_subtasks(&session.plan_id, &session.branch, &session.subtasks)
            .await
    }

    /// Retrieve a persisted session by reply identifier.
    ///
    /// Returns `Ok(None)` if the session was never persisted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_session(&self, reply_id: &str) -> Result<Option<TellSessionRecord>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM tell_session WHERE reply_id = ?1")
                .bind(reply_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(SessionRow::into_record).transpose()
    }

    /// Load a session's persisted operations in emission order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn load_operations(&self, reply_id: &str) -> Result<Vec<Operation>> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            "SELECT kind, path, content FROM operation \
             WHERE session_reply_id = ?1 ORDER BY seq",
        )
        .bind(reply_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Operation {
                    kind: parse_kind(&row.kind)?,
                    path: row.path,
                    content: row.content,
                })
            })
            .collect()
    }
}
