//! Session controller: the attempt loop.
//!
//! Owns one tell session end to end. Exactly one task drives this loop and
//! mutates session state; observers read through published events only. The
//! only suspension point while a stream is live is "receive next fragment or
//! stream end": parsing and operation publication are synchronous with
//! respect to it, so operation order is total.
//!
//! Each attempt gets a fresh [`ReplyParser`]; a failed attempt's lexical
//! state is discarded because the provider may not resume exactly where it
//! stopped. Session-scoped state (emitted operations, stage, subtask
//! pointer, token totals) survives retries untouched.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{EngineConfig, MissingFileChoice};
use crate::models::operation::Operation;
use crate::models::session::{Stage, TellSession};
use crate::orchestrator::decisions::MissingFileDecisionSource;
use crate::orchestrator::observers::{ObserverRegistry, SessionEvent};
use crate::orchestrator::retry::{self, RetryDecision};
use crate::persistence::tell_repo::TellRepo;
use crate::provider::{estimate_tokens, ModelStream, StreamEvent, StreamFailure, TellContext};
use crate::reply::{NarrativeScanner, NarrativeSignal, ReplyEvent, ReplyParser};
use crate::sink::OperationSink;
use crate::Result;

/// Terminal report for one controller run.
#[derive(Debug)]
pub struct TellOutcome {
    /// Final session state.
    pub session: TellSession,
    /// Terminal failure, if the session did not complete gracefully.
    pub failure: Option<StreamFailure>,
}

/// Outcome of one stream attempt.
#[derive(Debug)]
enum AttemptResult {
    /// The stream completed gracefully and the parser drained cleanly.
    Completed,
    /// The attempt failed; the retry policy decides what happens next.
    Failed(StreamFailure),
}

/// Drives one tell session through its attempts to a terminal report.
pub struct SessionController {
    session: TellSession,
    provider: Arc<dyn ModelStream>,
    sink: Arc<dyn OperationSink>,
    observers: Arc<ObserverRegistry>,
    decisions: Arc<dyn MissingFileDecisionSource>,
    repo: Option<TellRepo>,
    config: Arc<EngineConfig>,
    completion_signaled: bool,
}

impl SessionController {
    /// Construct a controller for a freshly accepted session.
    #[must_use]
    pub fn new(
        session: TellSession,
        provider: Arc<dyn ModelStream>,
        sink: Arc<dyn OperationSink>,
        observers: Arc<ObserverRegistry>,
        decisions: Arc<dyn MissingFileDecisionSource>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            session,
            provider,
            sink,
            observers,
            decisions,
            repo: None,
            config,
            completion_signaled: false,
        }
    }

    /// Attach a persistence repository: plan context is loaded at start and
    /// the terminal result is written at the end.
    #[must_use]
    pub fn with_repo(mut self, repo: TellRepo) -> Self {
        self.repo = Some(repo);
        self
    }

    /// Run the session to a terminal report.
    ///
    /// # Errors
    ///
    /// Returns an error only for engine-internal faults (persistence,
    /// invalid lifecycle transitions). Stream failures are reported through
    /// the returned [`TellOutcome`], never as `Err`.
    pub async fn run(self, cancel: CancellationToken) -> Result<TellOutcome> {
        let span = info_span!(
            "tell_session",
            plan_id = %self.session.plan_id,
            branch = %self.session.branch,
            reply_id = %self.session.reply_id,
        );
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(mut self, cancel: CancellationToken) -> Result<TellOutcome> {
        self.load_plan_context().await?;
        self.set_stage(Stage::Planning).await?;

        // Retries reuse this context unchanged.
        let context = TellContext::for_session(&self.session);

        loop {
            let attempt = self.session.attempt_count + 1;
            let attempt_span = info_span!("attempt", attempt);
            let result = self
                .drive_attempt(&context, &cancel)
                .instrument(attempt_span)
                .await?;

            match result {
                AttemptResult::Completed => {
                    self.finalize_completed().await?;
                    return Ok(TellOutcome {
                        session: self.session,
                        failure: None,
                    });
                }
                AttemptResult::Failed(failure) => {
                    self.session.attempt_count += 1;
                    warn!(
                        %failure,
                        attempts = self.session.attempt_count,
                        "stream attempt failed"
                    );

                    let decision = retry::decide(
                        &failure,
                        self.session.attempt_count,
                        self.config.stream.retry_limit,
                    );
                    match decision {
                        RetryDecision::Retry => {
                            info!(
                                attempt = self.session.attempt_count + 1,
                                "retrying with preserved conversation context"
                            );
                        }
                        RetryDecision::Stop => {
                            self.fail_session(&failure).await?;
                            return Ok(TellOutcome {
                                session: self.session,
                                failure: Some(failure),
                            });
                        }
                    }
                }
            }
        }
    }

    /// Load subtasks and conversation summaries for the plan branch.
    async fn load_plan_context(&mut self) -> Result<()> {
        let Some(repo) = &self.repo else {
            return Ok(());
        };

        let subtasks = repo
            .load_subtasks(&self.session.plan_id, &self.session.branch)
            .await?;
        if !subtasks.is_empty() {
            self.session.subtasks = subtasks;
        }
        self.session.summaries = repo
            .load_summaries(&self.session.plan_id, &self.session.branch)
            .await?;

        debug!(
            subtasks = self.session.subtasks.len(),
            summaries = self.session.summaries.len(),
            "plan context loaded"
        );
        Ok(())
    }

    /// Run one connection attempt to stream end or failure.
    async fn drive_attempt(
        &mut self,
        context: &TellContext,
        cancel: &CancellationToken,
    ) -> Result<AttemptResult> {
        // Attempt-scoped state only; everything on the session survives.
        let mut parser = ReplyParser::new();
        let mut scanner = NarrativeScanner::new()?;
        let mut skip_paths: HashSet<String> = HashSet::new();
        let mut attempt_reply_estimate: u64 = 0;
        let inactivity = self.config.inactivity_timeout();

        let mut rx = match self.provider.open(context, cancel.child_token()).await {
            Ok(rx) => rx,
            Err(failure) => return Ok(AttemptResult::Failed(failure)),
        };

        loop {
            let event = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("cancellation received, aborting attempt");
                    return Ok(AttemptResult::Failed(StreamFailure::Cancelled));
                }

                received = tokio::time::timeout(inactivity, rx.recv()) => match received {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        return Ok(AttemptResult::Failed(StreamFailure::Disconnected(
                            "provider stream closed without completion".into(),
                        )));
                    }
                    Err(_) => {
                        return Ok(AttemptResult::Failed(StreamFailure::InactivityTimeout(
                            inactivity.as_secs(),
                        )));
                    }
                },
            };

            match event {
                StreamEvent::Fragment(text) => {
                    if self.session.first_token_at.is_none() {
                        self.session.first_token_at = Some(Utc::now());
                    }
                    let estimate = estimate_tokens(&text);
                    attempt_reply_estimate += estimate;
                    self.session.reply_tokens += estimate;

                    let events = match parser.feed(&text) {
                        Ok(events) => events,
                        Err(err) => return Ok(AttemptResult::Failed(StreamFailure::from(err))),
                    };
                    for parsed in events {
                        match parsed {
                            ReplyEvent::Narrative(narrative) => {
                                if !narrative.trim().is_empty() {
                                    self.session.has_assistant_reply = true;
                                }
                                for signal in scanner.push(&narrative) {
                                    self.handle_signal(signal, &mut skip_paths).await?;
                                }
                            }
                            ReplyEvent::Operation(operation) => {
                                self.session.has_assistant_reply = true;
                                if skip_paths.contains(&operation.path) {
                                    debug!(
                                        path = %operation.path,
                                        "operation dropped per missing-file decision"
                                    );
                                    continue;
                                }
                                self.publish_operation(operation).await;
                            }
                        }
                    }
                }

                StreamEvent::Completed {
                    request_tokens,
                    reply_tokens,
                } => {
                    if let Err(err) = parser.finish() {
                        return Ok(AttemptResult::Failed(StreamFailure::from(err)));
                    }
                    if let Some(signal) = scanner.flush() {
                        self.handle_signal(signal, &mut skip_paths).await?;
                    }

                    self.session.request_tokens += request_tokens;
                    // The completion event carries authoritative totals;
                    // top up past the live estimate for this attempt.
                    if reply_tokens > attempt_reply_estimate {
                        self.session.reply_tokens += reply_tokens - attempt_reply_estimate;
                    }

                    debug!(
                        chunks = parser.chunks_received(),
                        "stream completed gracefully"
                    );
                    return Ok(AttemptResult::Completed);
                }

                StreamEvent::Failed(failure) => return Ok(AttemptResult::Failed(failure)),
            }
        }
    }

    /// React to a stage-transition marker found in narrative text.
    async fn handle_signal(
        &mut self,
        signal: NarrativeSignal,
        skip_paths: &mut HashSet<String>,
    ) -> Result<()> {
        match signal {
            NarrativeSignal::SubtaskStarted(name) => {
                info!(subtask = %name, "subtask started");
                self.session.activate_subtask(&name);
                self.set_stage(Stage::ImplementingSubtask).await?;
            }
            NarrativeSignal::SubtaskCompleted => {
                info!(
                    subtask = ?self.session.current_subtask_name(),
                    "subtask completed"
                );
                self.session.complete_active_subtask();
                self.publish_stage().await;
            }
            NarrativeSignal::AllSubtasksComplete => {
                info!("completion signal received");
                self.completion_signaled = true;
            }
            NarrativeSignal::MissingFile(path) => {
                warn!(path = %path, "model reported a missing file");
                let resume = self.session.stage;
                self.set_stage(Stage::AwaitingMissingFileDecision).await?;

                let choice = self.decisions.choose(&path).await;
                info!(?choice, path = %path, "missing-file decision applied");
                if choice == MissingFileChoice::Skip {
                    skip_paths.insert(path);
                }

                // Resume in the same subtask the model was implementing.
                self.set_stage(resume).await?;
            }
        }
        Ok(())
    }

    /// Append, apply, and publish one emitted operation, in that order.
    async fn publish_operation(&mut self, operation: Operation) {
        let seq = self.session.append_operation(operation.clone());
        info!(seq, path = %operation.path, kind = ?operation.kind, "operation emitted");

        if let Err(err) = self.sink.apply(&operation).await {
            // Sink rejection is surfaced but does not unwind the stream.
            warn!(seq, path = %operation.path, %err, "sink rejected operation");
            self.observers
                .broadcast(SessionEvent::SinkRejected {
                    seq,
                    path: operation.path.clone(),
                    error: err.to_string(),
                })
                .await;
        }

        self.observers
            .broadcast(SessionEvent::OperationProduced { seq, operation })
            .await;
    }

    /// Advance the session stage after a graceful stream completion.
    async fn finalize_completed(&mut self) -> Result<()> {
        if self.completion_signaled {
            self.session.complete_active_subtask();
        }

        if self.completion_signaled || !self.session.has_pending_subtasks() {
            self.set_stage(Stage::Finished).await?;
            let operations_emitted =
                u64::try_from(self.session.operations.len()).unwrap_or(u64::MAX);
            self.observers
                .broadcast(SessionEvent::Finished { operations_emitted })
                .await;
            self.persist_terminal(None).await?;
            info!(operations = operations_emitted, "session finished");
        } else {
            // Subtasks remain: the session is handed back mid-plan for the
            // next tell iteration.
            info!(
                subtask = ?self.session.current_subtask_name(),
                "stream complete, subtasks remain"
            );
        }
        Ok(())
    }

    /// Transition to `Failed`, report to observers, and persist.
    async fn fail_session(&mut self, failure: &StreamFailure) -> Result<()> {
        self.session.advance(Stage::Failed)?;
        self.publish_stage().await;
        self.observers
            .broadcast(SessionEvent::Failed {
                failure: failure.clone(),
            })
            .await;
        self.persist_terminal(Some(failure)).await?;
        error!(%failure, "session failed");
        Ok(())
    }

    /// Validate and apply a stage transition, then publish it.
    async fn set_stage(&mut self, next: Stage) -> Result<()> {
        self.session.advance(next)?;
        self.publish_stage().await;
        Ok(())
    }

    /// Publish the current stage and active subtask to observers.
    async fn publish_stage(&self) {
        self.observers
            .broadcast(SessionEvent::StageChanged {
                stage: self.session.stage,
                subtask: self.session.current_subtask_name().map(ToOwned::to_owned),
            })
            .await;
    }

    /// Write the terminal session state if a repository is attached.
    async fn persist_terminal(&self, failure: Option<&StreamFailure>) -> Result<()> {
        if let Some(repo) = &self.repo {
            repo.save_result(&self.session, failure).await?;
            debug!("terminal session state persisted");
        }
        Ok(())
    }
}
