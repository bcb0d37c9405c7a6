#![forbid(unsafe_code)]

//! `tellstream` — replay a recorded model transcript through the engine.
//!
//! Reads a captured reply transcript, splits it into fragments, and drives
//! the full session pipeline (parser, stage machine, observers, in-memory
//! persistence) exactly as a live provider stream would. Useful for
//! inspecting what a captured stream parses into.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tellstream::config::EngineConfig;
use tellstream::models::session::TellSession;
use tellstream::orchestrator::controller::SessionController;
use tellstream::orchestrator::decisions::ConfiguredDecisionSource;
use tellstream::orchestrator::observers::ObserverRegistry;
use tellstream::persistence::{db, tell_repo::TellRepo};
use tellstream::provider::replay::ReplayStream;
use tellstream::sink::TraceSink;
use tellstream::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tellstream", about = "Streaming reply engine transcript replay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded reply transcript to replay.
    #[arg(long)]
    transcript: PathBuf,

    /// Fragment size in bytes for the replayed stream.
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    let config = Arc::new(config);

    let transcript = std::fs::read_to_string(&args.transcript)?;
    info!(
        transcript = %args.transcript.display(),
        bytes = transcript.len(),
        chunk_size = args.chunk_size,
        "replaying transcript"
    );

    // ── Wire up the engine ──────────────────────────────
    let database = db::connect_memory().await?;
    let repo = TellRepo::new(Arc::new(database));

    let session = TellSession::new(
        "replay",
        "main",
        0,
        "transcript replay",
        config.model.clone(),
    );
    let reply_id = session.reply_id.clone();

    let observers = Arc::new(ObserverRegistry::new(
        config.stream.observer_channel_capacity,
    ));
    let (handle, mut events, _snapshot) = observers.attach().await;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "session event");
        }
    });

    let provider = Arc::new(ReplayStream::from_text(&transcript, args.chunk_size));
    let sink = Arc::new(TraceSink::new());
    let decisions = Arc::new(ConfiguredDecisionSource::new(
        config.stream.missing_file_choice,
    ));

    // Ctrl-C aborts the replay the way a caller cancels a live session.
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling session");
            cancel_on_signal.cancel();
        }
    });

    // ── Run the session ─────────────────────────────────
    let controller = SessionController::new(
        session,
        provider,
        sink,
        Arc::clone(&observers),
        decisions,
        Arc::clone(&config),
    )
    .with_repo(repo.clone());

    let outcome = controller.run(cancel).await?;

    observers.detach(&handle).await;
    printer.abort();

    let persisted = repo.load_operations(&reply_id).await?;
    info!(
        stage = ?outcome.session.stage,
        operations = outcome.session.operations.len(),
        persisted = persisted.len(),
        request_tokens = outcome.session.request_tokens,
        reply_tokens = outcome.session.reply_tokens,
        "replay finished"
    );

    match outcome.failure {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => fmt().with_env_filter(filter).init(),
        LogFormat::Json => fmt().with_env_filter(filter).json().init(),
    }
}
