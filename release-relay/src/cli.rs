///
/// This module implements the CLI interface for release-relay: command parsing, wiring of the
/// concrete clients into the core transfer engine, and the user-visible entrypoints.
///
/// All transfer logic (bucket resolution, retries, conflict handling) lives in the
/// [`release-relay-core`] crate. This module is strictly glue.
///
/// ## Commands
/// - `serve`: run the Telegram bot dispatcher together with the health endpoint until Ctrl-C.
/// - `push`: relay one local file into a release and print the outcome as JSON.
///
/// ## How To Use
/// - From the shell: `release-relay --help`.
/// - Programmatically and in integration tests: call [`run`] with a constructed [`Cli`].
///
/// [`release-relay-core`]: ../../release-relay-core/
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use release_relay_core::contract::{SourceRef, TransferRequest};
use release_relay_core::source::LocalFileSource;
use release_relay_core::TransferCoordinator;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::dispatcher::{Dispatcher, IntakeRules};
use crate::github::GitHubClient;
use crate::health;
use crate::load_config::{load_config, RelayConfig, Secrets};
use crate::naming::sanitize_file_name;
use crate::telegram::TelegramClient;

/// CLI for release-relay: stream files from Telegram (or disk) into GitHub Releases.
#[derive(Parser)]
#[clap(
    name = "release-relay",
    version,
    about = "Relay files from a Telegram bot into GitHub Releases without buffering them"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot and the health endpoint until interrupted
    Serve {
        /// Path to the YAML config file; defaults and environment only when omitted
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Upload one local file to a release and print the outcome
    Push {
        /// Path to the YAML config file; defaults and environment only when omitted
        #[clap(long)]
        config: Option<PathBuf>,
        /// File to upload
        #[clap(long)]
        file: PathBuf,
        /// Asset name; the sanitised file name when omitted
        #[clap(long)]
        name: Option<String>,
        /// Release tag; taken from the release config when omitted
        #[clap(long)]
        tag: Option<String>,
    },
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "serve", "Starting relay bot");
            serve(config).await
        }
        Commands::Push {
            config,
            file,
            name,
            tag,
        } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "push", file = %file.display(), "Pushing local file");
            push(config, &file, name, tag).await
        }
    }
}

async fn serve(config: RelayConfig) -> Result<()> {
    let secrets = Secrets::from_env(true)?;
    let bot_token = secrets
        .bot_token
        .context("BOT_TOKEN environment variable not set")?;

    let repository = Arc::new(GitHubClient::new(&config.github, secrets.github_token)?);
    let telegram = Arc::new(TelegramClient::new(
        &config.telegram.api_base,
        bot_token,
        config.transfer.chunk_size,
        config.telegram.poll_timeout_secs,
    )?);
    telegram.delete_webhook().await?;

    let coordinator = Arc::new(TransferCoordinator::new(
        telegram.clone(),
        repository,
        config.retry_policy(),
    ));
    let rules = IntakeRules {
        allowed_extensions: config.bot.allowed_extensions.clone(),
        tag_policy: config.tag_policy(),
    };
    let dispatcher = Dispatcher::new(telegram, coordinator, rules);

    let (stop_tx, stop_rx) = watch::channel(false);
    let health_task = tokio::spawn(health::serve(config.health.port, stopped(stop_rx.clone())));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
            Err(e) => tracing::error!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
        }
        let _ = stop_tx.send(true);
    });

    supervise(dispatcher.run(stopped(stop_rx)), health_task).await
}

/// Run the dispatcher next to the health endpoint. The health endpoint ending
/// first (a bind failure, usually) stops serving at once and aborts in-flight
/// transfers; otherwise the endpoint is awaited after the dispatcher drains.
async fn supervise(
    dispatching: impl Future<Output = ()>,
    mut health_task: JoinHandle<Result<()>>,
) -> Result<()> {
    tokio::select! {
        _ = dispatching => {}
        joined = &mut health_task => {
            tracing::error!("Health endpoint ended before the dispatcher, shutting down");
            return health_result(joined)
                .and_then(|()| Err(anyhow::anyhow!("health endpoint stopped unexpectedly")));
        }
    }
    health_result(health_task.await)
}

fn health_result(joined: Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("health endpoint task failed: {e}")),
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn push(
    config: RelayConfig,
    file: &Path,
    name: Option<String>,
    tag: Option<String>,
) -> Result<()> {
    let secrets = Secrets::from_env(false)?;
    let repository = Arc::new(GitHubClient::new(&config.github, secrets.github_token)?);
    let source = Arc::new(LocalFileSource::new(config.transfer.chunk_size));
    let coordinator = TransferCoordinator::new(source, repository, config.retry_policy());

    let target_name = match name {
        Some(name) => name,
        None => {
            let raw = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sanitize_file_name(&raw, None)
        }
    };
    let request = TransferRequest {
        source_ref: SourceRef::new(file.to_string_lossy()),
        target_name,
        bucket_tag: tag.unwrap_or_else(|| config.tag_policy().tag_for(Utc::now())),
    };

    let report = coordinator.run(&request).await;
    tracing::info!(
        command = "push",
        states = ?report.states,
        attempts = report.publish_attempts,
        bytes = report.bytes_relayed,
        "Push finished"
    );
    println!("{}", serde_json::to_string_pretty(&report.outcome)?);

    if report.outcome.is_success() {
        Ok(())
    } else {
        tracing::error!(command = "push", outcome = ?report.outcome, "Push failed");
        Err(anyhow::anyhow!("push of {} failed", request.target_name))
    }
}
