#![forbid(unsafe_code)]

//! Streaming reply engine for AI pair-programming sessions.
//!
//! Consumes the incremental text stream a language-model backend produces in
//! response to one tell exchange and turns it live into a well-ordered
//! sequence of file-edit operations: tag-delimited block parsing that is
//! invariant under chunk fragmentation, a staged session lifecycle, a bounded
//! retry loop around stream failures, and push notifications to any number of
//! attached observers.

pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod provider;
pub mod reply;
pub mod sink;

pub use config::EngineConfig;
pub use errors::{AppError, Result};
