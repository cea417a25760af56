use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod cache;
mod config;
mod error;
mod extractor;
mod server;

use crate::config::Config;
use crate::extractor::invoker::probe_tool_version;
use crate::extractor::ToolchainExtractor;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_audio_proxy=debug".parse()?)
                .add_directive("tower=info".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    info!("🎵 Starting open-audio-proxy v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?.provision_cookies()?;
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let extractor = Arc::new(ToolchainExtractor::new(config.clone())?);
    let state = AppState::new(config.clone(), extractor)?;

    // Periodic sweep: expired cache entries plus elapsed rate-limit windows.
    {
        let cache = state.cache.clone();
        let limiter = state.limiter.clone();
        let interval = Duration::from_secs(config.cache_sweep_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                cache.cleanup_expired();
                limiter.cleanup();
            }
        });
    }

    let app = server::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("⚠️ Shutdown signal received, closing...");
}

/// `--health-check`: verifies the extraction toolchain is present and exits.
async fn health_check(config: &Config) -> Result<()> {
    match probe_tool_version(&config.ytdlp_bin, "--version").await {
        Ok(version) => info!("✅ {} version {}", config.ytdlp_bin, version),
        Err(e) => anyhow::bail!("extractor unavailable: {e}"),
    }

    match probe_tool_version(&config.ffmpeg_bin, "-version").await {
        Ok(_) => info!("✅ {} available", config.ffmpeg_bin),
        Err(e) => anyhow::bail!("ffmpeg unavailable: {e}"),
    }

    println!("OK");
    Ok(())
}
