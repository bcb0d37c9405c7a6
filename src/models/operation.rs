//! File-edit operation model.

use serde::{Deserialize, Serialize};

/// The kind of edit an operation performs on its target path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Replace the full file content with the payload.
    File,
    /// Apply the payload as a structured patch.
    Patch,
}

/// One parsed file-edit unit emitted by the reply parser.
///
/// Immutable once emitted; ownership transfers to the operation sink.
/// Ordering within a session is the operation's index in the session's
/// emission list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Operation {
    /// Edit kind.
    pub kind: OperationKind,
    /// Target path, relative to the working tree root.
    pub path: String,
    /// Raw content payload (full file body or patch text).
    pub content: String,
}

impl Operation {
    /// Construct a full-file write operation.
    #[must_use]
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::File,
            path: path.into(),
            content: content.into(),
        }
    }

    /// Construct a patch operation.
    #[must_use]
    pub fn patch(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Patch,
            path: path.into(),
            content: content.into(),
        }
    }
}
