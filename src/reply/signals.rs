//! Narrative signal scanning.
//!
//! Stage transitions are announced in the model's narrative text, outside
//! block markers. The scanner buffers narrative until complete lines are
//! available and matches each line against the known markers; everything
//! else is ordinary prose and is skipped.

use regex::Regex;

use crate::{AppError, Result};

/// Line marking the active subtask as finished.
const SUBTASK_COMPLETE_MARKER: &str = "**Subtask complete**";
/// Line signalling that the whole plan iteration is implemented.
const ALL_COMPLETE_MARKER: &str = "**All subtasks complete**";
/// Pattern introducing a subtask implementation section.
const SUBTASK_PATTERN: &str = r"^###\s+Subtask:\s*(.+)$";
/// Pattern reporting a referenced file as absent from model context.
const MISSING_FILE_PATTERN: &str = r"^Missing file:\s*(.+)$";

/// A stage-transition marker recognized in narrative text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrativeSignal {
    /// The model started implementing the named subtask.
    SubtaskStarted(String),
    /// The model declared the active subtask finished.
    SubtaskCompleted,
    /// The model declared the whole iteration finished.
    AllSubtasksComplete,
    /// The model reported the given path as missing from its context.
    MissingFile(String),
}

/// Line-buffered scanner over one attempt's narrative text.
#[derive(Debug)]
pub struct NarrativeScanner {
    subtask: Regex,
    missing_file: Regex,
    line_buf: String,
}

impl NarrativeScanner {
    /// Construct a scanner with an empty line buffer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a marker pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            subtask: compile(SUBTASK_PATTERN)?,
            missing_file: compile(MISSING_FILE_PATTERN)?,
            line_buf: String::new(),
        })
    }

    /// Append narrative text and return the signals found on any lines it
    /// completed.
    pub fn push(&mut self, text: &str) -> Vec<NarrativeSignal> {
        self.line_buf.push_str(text);

        let mut signals = Vec::new();
        while let Some(nl) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=nl).collect();
            if let Some(signal) = self.scan_line(&line) {
                signals.push(signal);
            }
        }
        signals
    }

    /// Scan the final unterminated line at end of stream.
    pub fn flush(&mut self) -> Option<NarrativeSignal> {
        if self.line_buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.line_buf);
        self.scan_line(&line)
    }

    fn scan_line(&self, line: &str) -> Option<NarrativeSignal> {
        let line = line.trim();
        if line == SUBTASK_COMPLETE_MARKER {
            return Some(NarrativeSignal::SubtaskCompleted);
        }
        if line == ALL_COMPLETE_MARKER {
            return Some(NarrativeSignal::AllSubtasksComplete);
        }
        if let Some(name) = capture(&self.subtask, line) {
            return Some(NarrativeSignal::SubtaskStarted(name));
        }
        if let Some(path) = capture(&self.missing_file, line) {
            return Some(NarrativeSignal::MissingFile(path));
        }
        None
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|err| AppError::Config(format!("invalid narrative pattern `{pattern}`: {err}")))
}

fn capture(pattern: &Regex, line: &str) -> Option<String> {
    pattern
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_owned())
}
