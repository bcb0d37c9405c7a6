//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Model-provider connection or stream failure.
    Provider(String),
    /// Accumulated reply text violated the block protocol grammar.
    Malformed(String),
    /// Explicit fatal rejection from the model provider.
    Refused(String),
    /// Caller-initiated abort of a running session.
    Cancelled,
    /// The operation sink rejected an emitted operation.
    Sink(String),
    /// Invalid session lifecycle transition.
    Session(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Provider(msg) => write!(f, "provider: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Self::Refused(msg) => write!(f, "provider refused: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Sink(msg) => write!(f, "sink: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
