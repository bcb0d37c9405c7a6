//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS tell_session (
    reply_id            TEXT PRIMARY KEY NOT NULL,
    plan_id             TEXT NOT NULL,
    branch              TEXT NOT NULL,
    iteration           INTEGER NOT NULL,
    generation_id       TEXT NOT NULL,
    instruction         TEXT NOT NULL,
    stage               TEXT NOT NULL CHECK(stage IN ('starting','planning','implementing_subtask','awaiting_missing_file_decision','finished','failed')),
    attempt_count       INTEGER NOT NULL DEFAULT 0,
    request_tokens      INTEGER NOT NULL DEFAULT 0,
    reply_tokens        INTEGER NOT NULL DEFAULT 0,
    started_at          TEXT NOT NULL,
    first_token_at      TEXT,
    has_assistant_reply INTEGER NOT NULL DEFAULT 0,
    model_provider      TEXT NOT NULL,
    model_name          TEXT NOT NULL,
    failure_kind        TEXT,
    failure_message     TEXT
);

CREATE TABLE IF NOT EXISTS operation (
    session_reply_id    TEXT NOT NULL,
    seq                 INTEGER NOT NULL,
    kind                TEXT NOT NULL CHECK(kind IN ('file','patch')),
    path                TEXT NOT NULL,
    content             TEXT NOT NULL,
    PRIMARY KEY (session_reply_id, seq)
);

CREATE TABLE IF NOT EXISTS subtask (
    plan_id             TEXT NOT NULL,
    branch              TEXT NOT NULL,
    position            INTEGER NOT NULL,
    name                TEXT NOT NULL,
    state               TEXT NOT NULL CHECK(state IN ('pending','active','completed')),
    PRIMARY KEY (plan_id, branch, position)
);

CREATE TABLE IF NOT EXISTS convo_summary (
    plan_id             TEXT NOT NULL,
    branch              TEXT NOT NULL,
    position            INTEGER NOT NULL,
    summary             TEXT NOT NULL,
    PRIMARY KEY (plan_id, branch, position)
);
";

    for statement in ddl.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
