//! Reply stream parsing.
//!
//! [`parser`] holds the incremental block-grammar automaton that turns raw
//! text fragments into narrative and [`crate::models::operation::Operation`]
//! values. [`signals`] scans the narrative half for stage-transition markers.

pub mod parser;
pub mod signals;

pub use parser::{MalformedResponse, ReplyEvent, ReplyParser};
pub use signals::{NarrativeScanner, NarrativeSignal};
