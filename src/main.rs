#![forbid(unsafe_code)]

//! `spawn-relay`: chat-driven coding-agent orchestrator.
//!
//! Bootstraps configuration, the execution backends, the spawn registry, and
//! the Slack Socket Mode integration, then serves until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{fmt, EnvFilter};

use spawn_relay::attachments::AttachmentFetcher;
use spawn_relay::backend::Backends;
use spawn_relay::commands::MentionParser;
use spawn_relay::config::GlobalConfig;
use spawn_relay::orchestrator::Orchestrator;
use spawn_relay::outbound::ChatSink;
use spawn_relay::slack::client::SlackService;
use spawn_relay::slack::SlackState;
use spawn_relay::{AppError, Result};

/// Time given to the outbound queue to flush before exit.
const DRAIN_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "spawn-relay", about = "Chat-driven coding-agent orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("spawn-relay bootstrap");

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!(state_dir = %config.state_dir.display(), "configuration loaded");

    let backends = Backends::from_config(&config)?;
    let (slack, queue_task) = SlackService::start(&config.slack).map_err(|err| {
        error!(%err, "slack service start failed");
        err
    })?;
    let slack = Arc::new(slack);
    let sink: Arc<dyn ChatSink> = slack.clone();
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config), backends, sink));
    info!(
        spawns = orchestrator.registry.lock().await.len(),
        "registry loaded"
    );

    let bot_user_id = slack.bot_user_id().await?;
    let state = Arc::new(SlackState {
        orchestrator: Arc::clone(&orchestrator),
        mentions: MentionParser::new(&bot_user_id)?,
        fetcher: AttachmentFetcher::new(Some(config.slack.bot_token.clone())),
    });
    let socket_task = slack.spawn_socket_mode(state);
    info!(%bot_user_id, "spawn-relay ready");

    let signal = shutdown_signal().await;
    info!(signal, "shutting down");

    async {
        socket_task.abort();
        orchestrator.shutdown().await;
        tokio::time::sleep(DRAIN_DELAY).await;
        queue_task.abort();
    }
    .instrument(info_span!("graceful_shutdown"))
    .await;
    info!("spawn-relay shut down");

    Ok(())
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM. Returns the signal's name.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable, waiting for ctrl-c only");
                return ctrl_c().await;
            }
        };
        tokio::select! {
            name = ctrl_c() => name,
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let installed = match log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| AppError::Config(format!("failed to install log subscriber: {err}")))
}
