//! Model-provider stream abstraction.
//!
//! The provider is an external collaborator reduced to one contract: a
//! cancellable source of an ordered text stream that terminates in success
//! or a classified failure. Implementations deliver [`StreamEvent`]s over a
//! tokio [`mpsc`] channel; dropping the receiver (or firing the cancellation
//! token) aborts the underlying connection.

pub mod replay;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ModelSettings;
use crate::models::session::TellSession;
use crate::reply::MalformedResponse;
use crate::AppError;

/// Classified reply-stream failure.
///
/// The attempt loop feeds these to the retry policy; the terminal kind is
/// reported to observers and persisted with the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    /// The accumulated reply text violated the block grammar.
    Malformed(String),
    /// The provider connection dropped before completion.
    Disconnected(String),
    /// The provider rejected the request due to rate limiting.
    RateLimited(String),
    /// No fragment arrived within the configured interval (seconds).
    InactivityTimeout(u64),
    /// Explicit fatal refusal or policy rejection from the provider.
    Refused(String),
    /// Caller-initiated abort.
    Cancelled,
}

impl StreamFailure {
    /// Stable identifier for the failure kind, used in events and
    /// persistence.
    #[must_use]
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Disconnected(_) => "disconnected",
            Self::RateLimited(_) => "rate_limited",
            Self::InactivityTimeout(_) => "inactivity_timeout",
            Self::Refused(_) => "refused",
            Self::Cancelled => "cancelled",
        }
    }
}

impl Display for StreamFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed response: {msg}"),
            Self::Disconnected(msg) => write!(f, "stream disconnected: {msg}"),
            Self::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            Self::InactivityTimeout(secs) => {
                write!(f, "no fragment received within {secs}s")
            }
            Self::Refused(msg) => write!(f, "provider refused: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<MalformedResponse> for StreamFailure {
    fn from(err: MalformedResponse) -> Self {
        Self::Malformed(err.message().to_owned())
    }
}

impl From<StreamFailure> for AppError {
    fn from(failure: StreamFailure) -> Self {
        match failure {
            StreamFailure::Malformed(msg) => Self::Malformed(msg),
            StreamFailure::Disconnected(msg) => Self::Provider(msg),
            StreamFailure::RateLimited(msg) => Self::Provider(format!("rate limited: {msg}")),
            StreamFailure::InactivityTimeout(secs) => {
                Self::Provider(format!("no fragment received within {secs}s"))
            }
            StreamFailure::Refused(msg) => Self::Refused(msg),
            StreamFailure::Cancelled => Self::Cancelled,
        }
    }
}

/// One item of the provider's reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An arbitrarily sized piece of the model's streamed text.
    Fragment(String),
    /// Graceful end of stream with authoritative token accounting.
    Completed {
        /// Prompt tokens consumed by the request.
        request_tokens: u64,
        /// Reply tokens produced by the stream.
        reply_tokens: u64,
    },
    /// Terminal stream failure.
    Failed(StreamFailure),
}

/// Accumulated conversation context passed to the provider on every attempt.
///
/// Retries reuse the same context unchanged; the provider owns prompt
/// construction beyond these inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TellContext {
    /// Plan the tell belongs to.
    pub plan_id: String,
    /// Plan branch the tell operates on.
    pub branch: String,
    /// Iteration number within the plan.
    pub iteration: u32,
    /// User instruction for this exchange.
    pub instruction: String,
    /// Model configuration for the request.
    pub model: ModelSettings,
    /// Conversation summaries loaded at session start.
    pub summaries: Vec<String>,
}

impl TellContext {
    /// Snapshot the provider-facing context from a session.
    #[must_use]
    pub fn for_session(session: &TellSession) -> Self {
        Self {
            plan_id: session.plan_id.clone(),
            branch: session.branch.clone(),
            iteration: session.iteration,
            instruction: session.instruction.clone(),
            model: session.model.clone(),
            summaries: session.summaries.clone(),
        }
    }
}

/// Cancellable source of an ordered reply-text stream.
///
/// `open` establishes one connection attempt and resolves to the receiving
/// end of the event channel. The stream terminates with exactly one
/// [`StreamEvent::Completed`] or [`StreamEvent::Failed`]; a channel that
/// closes without either is treated as a disconnect by the attempt loop.
pub trait ModelStream: Send + Sync {
    /// Open a fresh reply stream for the given context.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamFailure`] when the connection cannot be
    /// established; the attempt loop classifies it like any other attempt
    /// failure.
    fn open<'a>(
        &'a self,
        context: &'a TellContext,
        cancel: CancellationToken,
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<mpsc::Receiver<StreamEvent>, StreamFailure>>
                + Send
                + 'a,
        >,
    >;
}

/// Rough token estimate for a text fragment (one token per four bytes).
///
/// Used for live accounting while a stream is in flight; the provider's
/// completion event supplies authoritative totals.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    u64::try_from(text.len()).unwrap_or(u64::MAX).div_ceil(4)
}
