//! Shared fixtures for controller integration tests.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tellstream::config::EngineConfig;
use tellstream::models::operation::Operation;
use tellstream::models::session::TellSession;
use tellstream::orchestrator::controller::SessionController;
use tellstream::orchestrator::decisions::ConfiguredDecisionSource;
use tellstream::orchestrator::observers::{ObserverRegistry, SessionEvent};
use tellstream::provider::{ModelStream, StreamEvent, StreamFailure, TellContext};
use tellstream::sink::OperationSink;
use tellstream::{AppError, Result};

/// How one scripted attempt ends after its fragments are delivered.
#[derive(Debug, Clone)]
pub enum ScriptEnd {
    /// Graceful completion with token totals.
    Complete {
        request_tokens: u64,
        reply_tokens: u64,
    },
    /// Terminal failure event.
    Fail(StreamFailure),
    /// Drop the channel without a terminal event (connection loss).
    Close,
    /// Keep the channel open and silent until cancellation.
    HoldOpen,
}

/// One attempt's worth of provider behavior.
#[derive(Debug, Clone)]
pub struct Script {
    pub fragments: Vec<String>,
    pub end: ScriptEnd,
}

impl Script {
    /// Successful attempt delivering `text` in `chunk_size`-byte fragments.
    pub fn success(text: &str, chunk_size: usize) -> Self {
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
        Self {
            fragments,
            end: ScriptEnd::Complete {
                request_tokens: 100,
                reply_tokens: 50,
            },
        }
    }

    /// Attempt that fails with `failure` after delivering `fragments`.
    pub fn failure(fragments: Vec<String>, failure: StreamFailure) -> Self {
        Self {
            fragments,
            end: ScriptEnd::Fail(failure),
        }
    }
}

/// Provider that plays one script per attempt, in order.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    opens: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            opens: AtomicU32::new(0),
        })
    }

    /// Number of attempts opened against this provider.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ModelStream for ScriptedProvider {
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
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();

        Box::pin(async move {
            let Some(script) = script else {
                return Err(StreamFailure::Disconnected("script exhausted".into()));
            };

            let (tx, rx) = mpsc::channel(32);
            tokio::spawn(async move {
                for fragment in script.fragments {
                    if tx.send(StreamEvent::Fragment(fragment)).await.is_err() {
                        return;
                    }
                }
                match script.end {
                    ScriptEnd::Complete {
                        request_tokens,
                        reply_tokens,
                    } => {
                        let _ = tx
                            .send(StreamEvent::Completed {
                                request_tokens,
                                reply_tokens,
                            })
                            .await;
                    }
                    ScriptEnd::Fail(failure) => {
                        let _ = tx.send(StreamEvent::Failed(failure)).await;
                    }
                    ScriptEnd::Close => {}
                    ScriptEnd::HoldOpen => cancel.cancelled().await,
                }
            });
            Ok(rx)
        })
    }
}

/// Sink recording applied operations, optionally rejecting chosen paths.
pub struct CollectingSink {
    applied: Mutex<Vec<Operation>>,
    reject_paths: HashSet<String>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            reject_paths: HashSet::new(),
        })
    }

    pub fn rejecting(paths: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            applied: Mutex::new(Vec::new()),
            reject_paths: paths.iter().map(|&p| p.to_owned()).collect(),
        })
    }

    pub fn applied(&self) -> Vec<Operation> {
        self.applied.lock().unwrap().clone()
    }
}

impl OperationSink for CollectingSink {
    fn apply<'a>(
        &'a self,
        operation: &'a Operation,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.reject_paths.contains(&operation.path) {
                return Err(AppError::Sink(format!("rejected {}", operation.path)));
            }
            self.applied.lock().unwrap().push(operation.clone());
            Ok(())
        })
    }
}

/// Engine config with a short inactivity timeout suitable for tests.
pub fn test_config() -> EngineConfig {
    EngineConfig::from_toml_str(
        "[stream]\nretry_limit = 4\ninactivity_timeout_seconds = 1\n",
    )
    .expect("test config")
}

pub fn test_config_with_choice(choice: &str) -> EngineConfig {
    EngineConfig::from_toml_str(&format!(
        "[stream]\nretry_limit = 4\ninactivity_timeout_seconds = 1\nmissing_file_choice = \"{choice}\"\n"
    ))
    .expect("test config")
}

pub fn test_session(config: &EngineConfig) -> TellSession {
    TellSession::new("plan-1", "main", 0, "implement the thing", config.model.clone())
}

/// Build a controller plus an attached observer receiver.
pub async fn build_controller(
    session: TellSession,
    provider: Arc<ScriptedProvider>,
    sink: Arc<CollectingSink>,
    config: EngineConfig,
) -> (
    SessionController,
    Arc<ObserverRegistry>,
    mpsc::Receiver<SessionEvent>,
) {
    let config = Arc::new(config);
    let observers = Arc::new(ObserverRegistry::new(
        config.stream.observer_channel_capacity,
    ));
    let decisions = Arc::new(ConfiguredDecisionSource::new(
        config.stream.missing_file_choice,
    ));

    let (_handle, rx, _snapshot) = observers.attach().await;
    let controller = SessionController::new(
        session,
        provider,
        sink,
        Arc::clone(&observers),
        decisions,
        config,
    );
    (controller, observers, rx)
}

/// Drain every event currently buffered on the observer channel.
pub fn drain_events(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
