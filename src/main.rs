use anyhow::Context;
use clap::Parser;
use previewer::{build_cache, config::PreviewerConfig, fetch::HttpFetcher, logging, router};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "previewer")]
#[command(version)]
#[command(about = "On-demand image fill proxy with an LRU cache")]
struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, default_value = "./configs/config.json")]
    config: PathBuf,

    /// Listen address, overrides config and PREVIEWER_HOST
    #[arg(short = 'H', long, value_name = "ADDR")]
    host: Option<String>,

    /// Log level, overrides config
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

/// Previewer server entry point.
///
/// Loads configuration (file, then `PREVIEWER_*` env, then CLI flags),
/// serves until SIGINT/SIGTERM and clears the cache on the way out so the
/// disk backend leaves no files behind.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = PreviewerConfig::load(&cli.config)?;
    cfg.apply_env()?;
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(level) = cli.log_level {
        cfg.logger.level = level;
    }
    cfg.validate()?;

    logging::init(&cfg.logger)?;
    tracing::info!("Starting previewer");

    let timeout = (cfg.fetch_timeout_secs > 0).then(|| Duration::from_secs(cfg.fetch_timeout_secs));
    let fetcher = Arc::new(
        HttpFetcher::new(cfg.max_input_size, timeout).context("failed to build HTTP client")?,
    );
    let cache = build_cache(&cfg, fetcher)
        .await
        .context("failed to create cache")?;

    let app = router(cache.clone());

    let listener = tokio::net::TcpListener::bind(&cfg.host)
        .await
        .with_context(|| format!("failed to bind {}", cfg.host))?;
    tracing::info!("Server listening on {}", cfg.host);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully...");
    match cache.clear().await {
        Ok(n) => tracing::info!("Removed {} cached variants", n),
        Err(e) => tracing::error!("Failed to clear cache: {}", e),
    }
    tracing::info!("Application stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
