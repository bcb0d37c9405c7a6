//! Incremental reply parser.
//!
//! Converts the model's streamed reply text into an ordered sequence of
//! [`ReplyEvent`]s: narrative passages and completed file-edit operations.
//! The parser is fed arbitrarily fragmented input and yields identical
//! operation sequences regardless of where the chunk boundaries fall.
//!
//! # Grammar
//!
//! ```text
//! reply    := (narrative | block)*
//! block    := '<Block path="PATH" [op="patch"]>' fence CONTENT fence '</Block>'
//! fence    := '```' [info-string] '\n'
//! ```
//!
//! The closing fence is a ``` at the start of a line; everything between the
//! fences is captured verbatim as the operation payload. Text outside blocks
//! is narrative and is emitted as [`ReplyEvent::Narrative`].
//!
//! # Partial delimiters
//!
//! A trailing run of input that is a strict prefix of a delimiter expected in
//! the current state (opening tag, fence, closing tag) is withheld until more
//! input disambiguates it. On divergence the withheld bytes are flushed
//! exactly once, in original order, as ordinary narrative or content.
//!
//! Parser state is scoped to exactly one connection attempt and is never
//! shared across attempts.

use std::fmt::{Display, Formatter};

use crate::models::operation::{Operation, OperationKind};

/// Opening-tag prefix that starts a file block.
const OPEN_TAG_START: &str = "<Block ";
/// Closing tag that ends a file block.
const CLOSE_TAG: &str = "</Block>";
/// Backtick fence delimiting the verbatim content region.
const FENCE: &str = "```";

/// Irrecoverable violation of the reply block grammar.
///
/// Returned from [`ReplyParser::feed`] and [`ReplyParser::finish`]; the
/// attempt loop is the sole place that decides retry versus terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedResponse(String);

impl MalformedResponse {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Human-readable description of the grammar violation.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl Display for MalformedResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed response: {}", self.0)
    }
}

impl std::error::Error for MalformedResponse {}

/// One parsed item of the reply stream, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// Narrative text outside any block. Fragment boundaries within
    /// narrative are not significant; only the concatenation is.
    Narrative(String),
    /// A completed file-edit operation. Emitted atomically once the block's
    /// closing tag is fully recognized; no partial operation is ever exposed.
    Operation(Operation),
}

/// Automaton state. One enum rather than independent booleans so that
/// illegal combinations (a fence outside a block, nested headers) cannot be
/// represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    /// Outside any block; scanning narrative for an opening tag.
    PlainText,
    /// Between `<Block ` and `>`; accumulating header attributes.
    InBlockHeader,
    /// Header closed; expecting the opening fence.
    AwaitingOpenFence,
    /// Opening fence seen; discarding the info string through end of line.
    OpenFenceInfo,
    /// Inside the verbatim content region.
    InFileContent,
    /// Closing fence seen; expecting the closing tag.
    AwaitingCloseTag,
}

/// Progress indicator for one automaton step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    /// The state advanced; run another step on the remaining input.
    Progress,
    /// Nothing more can be decided until another fragment arrives.
    NeedMore,
}

/// Target parsed from a block header, held until the closing tag emits the
/// operation.
#[derive(Debug)]
struct PendingBlock {
    path: String,
    kind: OperationKind,
}

/// Incremental lexer/parser for one reply-stream attempt.
#[derive(Debug)]
pub struct ReplyParser {
    state: LexState,
    /// Unconsumed input, including any withheld partial delimiter.
    tail: String,
    /// Verbatim content of the currently open block.
    content: String,
    /// Header data of the currently open block.
    pending: Option<PendingBlock>,
    /// Fragments received by this attempt.
    chunks_received: u64,
}

impl Default for ReplyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyParser {
    /// Construct a parser with empty lexical state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LexState::PlainText,
            tail: String::new(),
            content: String::new(),
            pending: None,
            chunks_received: 0,
        }
    }

    /// Number of fragments fed so far.
    #[must_use]
    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    /// Whether a file block is currently open.
    #[must_use]
    pub fn file_open(&self) -> bool {
        self.state != LexState::PlainText
    }

    /// Feed one fragment, returning the events completed by it.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedResponse`] when the accumulated text violates the
    /// grammar irrecoverably; the parser must then be discarded.
    pub fn feed(&mut self, fragment: &str) -> Result<Vec<ReplyEvent>, MalformedResponse> {
        self.chunks_received += 1;
        self.tail.push_str(fragment);

        let mut out = Vec::new();
        loop {
            let outcome = match self.state {
                LexState::PlainText => self.scan_plain(&mut out),
                LexState::InBlockHeader => self.scan_header()?,
                LexState::AwaitingOpenFence => self.scan_open_fence()?,
                LexState::OpenFenceInfo => self.scan_fence_info(),
                LexState::InFileContent => self.scan_content(),
                LexState::AwaitingCloseTag => self.scan_close_tag(&mut out)?,
            };
            if outcome == StepOutcome::NeedMore {
                break;
            }
        }
        Ok(out)
    }

    /// Signal end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedResponse`] if the stream ended inside a block or
    /// with a withheld partial delimiter: truncation is never silent.
    pub fn finish(&mut self) -> Result<(), MalformedResponse> {
        match self.state {
            LexState::PlainText if self.tail.is_empty() => Ok(()),
            LexState::PlainText => Err(MalformedResponse::new(format!(
                "stream ended inside a partial opening tag `{}`",
                self.tail
            ))),
            LexState::InBlockHeader => {
                Err(MalformedResponse::new("stream ended inside a block header"))
            }
            LexState::AwaitingOpenFence | LexState::OpenFenceInfo => Err(MalformedResponse::new(
                "stream ended before the content fence opened",
            )),
            LexState::InFileContent => Err(MalformedResponse::new(
                "stream ended inside an unterminated file block",
            )),
            LexState::AwaitingCloseTag => Err(MalformedResponse::new(
                "stream ended before the block closing tag",
            )),
        }
    }

    /// Scan narrative for the next opening-tag candidate.
    fn scan_plain(&mut self, out: &mut Vec<ReplyEvent>) -> StepOutcome {
        let mut from = 0;
        while let Some(offset) = self.tail[from..].find('<') {
            let idx = from + offset;
            let rest = &self.tail[idx..];

            if rest.len() >= OPEN_TAG_START.len() {
                if rest.starts_with(OPEN_TAG_START) {
                    if idx > 0 {
                        let narrative: String = self.tail.drain(..idx).collect();
                        out.push(ReplyEvent::Narrative(narrative));
                    }
                    self.tail.drain(..OPEN_TAG_START.len());
                    self.state = LexState::InBlockHeader;
                    return StepOutcome::Progress;
                }
            } else if OPEN_TAG_START.starts_with(rest) {
                // Trailing strict prefix of the opening tag: withhold it.
                if idx > 0 {
                    let narrative: String = self.tail.drain(..idx).collect();
                    out.push(ReplyEvent::Narrative(narrative));
                }
                return StepOutcome::NeedMore;
            }
            from = idx + 1;
        }

        if !self.tail.is_empty() {
            out.push(ReplyEvent::Narrative(std::mem::take(&mut self.tail)));
        }
        StepOutcome::NeedMore
    }

    /// Accumulate the block header until `>` and parse its attributes.
    fn scan_header(&mut self) -> Result<StepOutcome, MalformedResponse> {
        let Some(end) = self.tail.find('>') else {
            return Ok(StepOutcome::NeedMore);
        };

        let header: String = self.tail.drain(..=end).collect();
        let attrs = &header[..header.len() - 1];
        let (path, kind) = parse_block_attrs(attrs)?;

        self.pending = Some(PendingBlock { path, kind });
        self.content.clear();
        self.state = LexState::AwaitingOpenFence;
        Ok(StepOutcome::Progress)
    }

    /// Expect the opening fence, skipping whitespace after the header.
    fn scan_open_fence(&mut self) -> Result<StepOutcome, MalformedResponse> {
        self.skip_leading_whitespace();
        if self.tail.is_empty() {
            return Ok(StepOutcome::NeedMore);
        }

        if self.tail.starts_with(FENCE) {
            self.tail.drain(..FENCE.len());
            self.state = LexState::OpenFenceInfo;
            return Ok(StepOutcome::Progress);
        }
        if FENCE.starts_with(self.tail.as_str()) {
            return Ok(StepOutcome::NeedMore);
        }
        Err(MalformedResponse::new(
            "expected ``` content fence after block header",
        ))
    }

    /// Discard the fence info string through the end of the line.
    fn scan_fence_info(&mut self) -> StepOutcome {
        match self.tail.find('\n') {
            Some(nl) => {
                self.tail.drain(..=nl);
                self.state = LexState::InFileContent;
                StepOutcome::Progress
            }
            None => StepOutcome::NeedMore,
        }
    }

    /// Accumulate verbatim content until a line-initial closing fence.
    fn scan_content(&mut self) -> StepOutcome {
        let mut from = 0;
        while let Some(offset) = self.tail[from..].find(FENCE) {
            let idx = from + offset;
            if self.at_line_start(idx) {
                self.content.push_str(&self.tail[..idx]);
                self.tail.drain(..idx + FENCE.len());
                self.state = LexState::AwaitingCloseTag;
                return StepOutcome::Progress;
            }
            from = idx + 1;
        }

        // Withhold a trailing partial fence at line start; flush the rest.
        let keep = self.partial_fence_len();
        let cut = self.tail.len() - keep;
        self.content.push_str(&self.tail[..cut]);
        self.tail.drain(..cut);
        StepOutcome::NeedMore
    }

    /// Expect the closing tag, skipping whitespace after the fence.
    fn scan_close_tag(&mut self, out: &mut Vec<ReplyEvent>) -> Result<StepOutcome, MalformedResponse> {
        self.skip_leading_whitespace();
        if self.tail.is_empty() {
            return Ok(StepOutcome::NeedMore);
        }

        if self.tail.starts_with(CLOSE_TAG) {
            self.tail.drain(..CLOSE_TAG.len());
            let Some(block) = self.pending.take() else {
                return Err(MalformedResponse::new("closing tag without an open block"));
            };
            out.push(ReplyEvent::Operation(Operation {
                kind: block.kind,
                path: block.path,
                content: std::mem::take(&mut self.content),
            }));
            self.state = LexState::PlainText;
            return Ok(StepOutcome::Progress);
        }
        if CLOSE_TAG.starts_with(self.tail.as_str()) {
            return Ok(StepOutcome::NeedMore);
        }
        Err(MalformedResponse::new(
            "expected </Block> closing tag after content fence",
        ))
    }

    /// Whether a fence starting at `idx` in the tail sits at the start of a
    /// content line.
    fn at_line_start(&self, idx: usize) -> bool {
        if idx == 0 {
            self.content.is_empty() || self.content.ends_with('\n')
        } else {
            self.tail.as_bytes()[idx - 1] == b'\n'
        }
    }

    /// Length of the trailing strict fence prefix to withhold, if any.
    fn partial_fence_len(&self) -> usize {
        for keep in (1..FENCE.len()).rev() {
            if self.tail.len() >= keep
                && self.tail.ends_with(&FENCE[..keep])
                && self.at_line_start(self.tail.len() - keep)
            {
                return keep;
            }
        }
        0
    }

    /// Drop leading whitespace from the unconsumed tail.
    fn skip_leading_whitespace(&mut self) {
        let trimmed_len = self.tail.trim_start().len();
        let ws = self.tail.len() - trimmed_len;
        if ws > 0 {
            self.tail.drain(..ws);
        }
    }
}

/// Parse `key="value"` attributes from a block header.
fn parse_block_attrs(raw: &str) -> Result<(String, OperationKind), MalformedResponse> {
    let mut path: Option<String> = None;
    let mut kind = OperationKind::File;

    let mut rest = raw.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            return Err(MalformedResponse::new(format!(
                "malformed block attribute near `{rest}`"
            )));
        };
        let key = rest[..eq].trim();
        let Some(after_quote) = rest[eq + 1..].strip_prefix('"') else {
            return Err(MalformedResponse::new(format!(
                "block attribute `{key}` value must be double-quoted"
            )));
        };
        let Some(end) = after_quote.find('"') else {
            return Err(MalformedResponse::new(format!(
                "unterminated value for block attribute `{key}`"
            )));
        };
        let value = &after_quote[..end];

        match key {
            "path" => path = Some(value.to_owned()),
            "op" => {
                kind = match value {
                    "file" => OperationKind::File,
                    "patch" => OperationKind::Patch,
                    other => {
                        return Err(MalformedResponse::new(format!(
                            "unknown block op `{other}`"
                        )))
                    }
                };
            }
            other => {
                return Err(MalformedResponse::new(format!(
                    "unknown block attribute `{other}`"
                )))
            }
        }
        rest = after_quote[end + 1..].trim_start();
    }

    match path {
        Some(path) if !path.is_empty() => Ok((path, kind)),
        _ => Err(MalformedResponse::new("block is missing a path attribute")),
    }
}
