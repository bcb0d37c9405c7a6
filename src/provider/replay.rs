//! Transcript replay provider.
//!
//! Feeds a recorded reply transcript through the engine as if it were
//! arriving live, split into fixed-size fragments. Backs the `tellstream`
//! replay binary and exercises the full attempt loop without a network
//! provider.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{estimate_tokens, ModelStream, StreamEvent, StreamFailure, TellContext};

/// Channel depth between the replay task and the attempt loop.
const REPLAY_CHANNEL_DEPTH: usize = 16;

/// Replays a fixed fragment sequence, then completes gracefully.
#[derive(Debug, Clone)]
pub struct ReplayStream {
    fragments: Vec<String>,
}

impl ReplayStream {
    /// Split a full transcript into fragments of at most `chunk_size` bytes,
    /// respecting character boundaries.
    #[must_use]
    pub fn from_text(text: &str, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut fragments = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            current.push(ch);
            if current.len() >= chunk_size {
                fragments.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            fragments.push(current);
        }
        Self { fragments }
    }

    /// Replay an explicit fragment sequence.
    #[must_use]
    pub fn from_fragments(fragments: Vec<String>) -> Self {
        Self { fragments }
    }
}

impl ModelStream for ReplayStream {
    fn open<'a>(
        &'a self,
        _context: &'a TellContext,
        cancel: CancellationToken,
    ) -> Pin<
        Box<
            dyn Future<Output = std::result::Result<mpsc::Receiver<StreamEvent>, StreamFailure>>
                + Send
                + 'a,
        >,
    > {
        let fragments = self.fragments.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(REPLAY_CHANNEL_DEPTH);
            let reply_tokens: u64 = fragments.iter().map(|f| estimate_tokens(f)).sum();

            tokio::spawn(async move {
                for fragment in fragments {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if tx.send(StreamEvent::Fragment(fragment)).await.is_err() {
                        // Receiver dropped: the attempt was abandoned.
                        return;
                    }
                }
                let _ = tx
                    .send(StreamEvent::Completed {
                        request_tokens: 0,
                        reply_tokens,
                    })
                    .await;
            });

            Ok(rx)
        })
    }
}
