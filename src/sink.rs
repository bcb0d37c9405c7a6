//! Operation sink boundary.
//!
//! The sink is the external collaborator that applies emitted operations to
//! the working tree. A rejection is surfaced to observers and logged but
//! never unwinds the reply stream.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use crate::models::operation::Operation;
use crate::Result;

/// Destination for emitted operations.
pub trait OperationSink: Send + Sync {
    /// Apply one operation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sink`](crate::AppError::Sink) if the operation is
    /// rejected. The session continues parsing either way.
    fn apply<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Sink that logs each applied operation. Used by the replay binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceSink;

impl TraceSink {
    /// Construct the sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl OperationSink for TraceSink {
    fn apply<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                path = %operation.path,
                kind = ?operation.kind,
                bytes = operation.content.len(),
                "operation applied"
            );
            Ok(())
        })
    }
}
