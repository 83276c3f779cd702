use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tagrelay::config::Config;
use tagrelay::mastodon::client::MastodonClient;
use tagrelay::mastodon::models::Status;
use tagrelay::output;
use tagrelay::pipeline::{self, PipelineHandle};

/// tagrelay: relay hashtag streams on Mastodon.
///
/// Follows one or more hashtags live and boosts every new status that
/// passes the configured filters.
#[derive(Parser)]
#[command(name = "tagrelay", version, about)]
struct Cli {
    /// Hashtag to stream (repeatable; overrides TAGRELAY_TAGS)
    #[arg(long = "tag", global = true)]
    tags: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boost every status that passes the filters
    Boost,

    /// Print statuses that pass the filters instead of boosting them
    Print,

    /// Show which account the access token belongs to
    Whoami,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tagrelay=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Fatal error: {e:#}");
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if !cli.tags.is_empty() {
        config.override_tags(&cli.tags);
    }
    config.require_credentials()?;

    let client = Arc::new(MastodonClient::new(
        &config.instance_url,
        &config.access_token,
        config.api_requests_per_second,
    )?);

    match cli.command {
        Commands::Whoami => {
            let account = client.verify_credentials().await?;
            println!("@{} (id {})", account.acct, account.id);
            if let Some(url) = account.url {
                println!("  {}", url.dimmed());
            }
        }

        Commands::Boost => {
            let (handle, accepted) = start_pipeline(&config, Arc::clone(&client)).await?;
            let sink = output::boost::run(&client, accepted);
            let stats = drive(handle, sink).await?;
            info!(boosted = stats.boosted, failed = stats.failed, "Boost sink finished");
        }

        Commands::Print => {
            let (handle, accepted) = start_pipeline(&config, Arc::clone(&client)).await?;
            let sink = output::terminal::run(accepted);
            let printed = drive(handle, sink).await?;
            info!(printed, "Print sink finished");
        }
    }

    Ok(())
}

async fn start_pipeline(
    config: &Config,
    client: Arc<MastodonClient>,
) -> Result<(PipelineHandle, mpsc::Receiver<Status>)> {
    info!(
        instance = %config.instance_url,
        tags = ?config.tags,
        "Starting relay"
    );
    pipeline::start(
        client,
        config.tags.clone(),
        config.filter.clone(),
        config.channel_capacity,
    )
    .await
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = until_signal("Ctrl-C", tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = until_signal("SIGTERM", async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())?.recv().await;
        Ok::<(), std::io::Error>(())
    });

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for one signal. If its handler can't be installed, log that and
/// never resolve, so the pipeline keeps running.
async fn until_signal<F>(name: &str, signal: F)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!(signal = name, "Received shutdown signal"),
        Err(e) => {
            warn!(signal = name, error = %e, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Run the sink to completion, turning Ctrl-C or SIGTERM into a pipeline
/// shutdown.
async fn drive<F, T>(handle: PipelineHandle, sink: F) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::pin!(sink);

    let result = tokio::select! {
        result = &mut sink => result,
        _ = shutdown_signal() => {
            info!("Shutting down streams");
            handle.shutdown();
            sink.await
        }
    };

    match handle.join().await {
        Ok((multiplex, filter)) => info!(
            streamed = multiplex.forwarded,
            accepted = filter.forwarded,
            "Pipeline finished"
        ),
        Err(e) => warn!(error = %e, "Pipeline did not shut down cleanly"),
    }

    Ok(result)
}
