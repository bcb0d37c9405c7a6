//! Missing-file decision boundary.
//!
//! When the model reports a referenced file as missing from its context the
//! session suspends operation emission until a decision is supplied. The
//! decision source is an external collaborator; the default implementation
//! answers with the pre-configured choice.

use std::future::Future;
use std::pin::Pin;

use crate::config::MissingFileChoice;

/// Supplier of missing-file decisions.
pub trait MissingFileDecisionSource: Send + Sync {
    /// Choose how to handle the missing path.
    fn choose<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = MissingFileChoice> + Send + 'a>>;
}

/// Decision source that always answers with the configured choice.
#[derive(Debug, Clone, Copy)]
pub struct ConfiguredDecisionSource {
    choice: MissingFileChoice,
}

impl ConfiguredDecisionSource {
    /// Construct a source answering with `choice`.
    #[must_use]
    pub fn new(choice: MissingFileChoice) -> Self {
        Self { choice }
    }
}

impl MissingFileDecisionSource for ConfiguredDecisionSource {
    fn choose<'a>(
        &'a self,
        _path: &'a str,
    ) -> Pin<Box<dyn Future<Output = MissingFileChoice> + Send + 'a>> {
        let choice = self.choice;
        Box::pin(async move { choice })
    }
}
