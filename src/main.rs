//! Tubeload - YouTube download service
//!
//! Serves the HTTP API, runs the download workers and the maintenance
//! jobs until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tubeload::extractor::check_ytdlp;
use tubeload::{api, AppSettings, AppState};

#[derive(Parser)]
#[command(name = "tubeload", version, about = "YouTube download service")]
struct Args {
    /// Address to bind
    #[arg(long, env = "TUBELOAD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, short, env = "TUBELOAD_PORT", default_value_t = 8000)]
    port: u16,

    /// Override the database URL from the environment
    #[arg(long)]
    database_url: Option<String>,

    /// Read settings from this file instead of `.env`
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.env_file {
        Some(path) => AppSettings::from_env_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => AppSettings::from_env(),
    };
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }
    init_tracing(&settings);
    let settings = settings.validate();

    match check_ytdlp().await {
        Ok(version) => info!("yt-dlp {} found", version),
        Err(e) => warn!("{}; downloads will fail until yt-dlp is installed", e),
    }

    let state = AppState::build(settings).await?;
    bootstrap_admin(&state).await;

    let shutdown = CancellationToken::new();
    let handles = state.start_background(shutdown.clone());
    match state.queue.resume_pending().await {
        Ok(0) => {}
        Ok(n) => info!("{} download(s) queued from the previous run", n),
        Err(e) => error!("Failed to resume pending downloads: {}", e),
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{} listening on http://{}", state.settings.project_name, addr);

    let app = api::router(state.clone());
    let signal = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn init_tracing(settings: &AppSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tubeload={},tower_http=info", settings.log_level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.json_logs() {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the first admin account from `TUBELOAD_ADMIN_*` when all three are set
async fn bootstrap_admin(state: &AppState) {
    let lookup = |key: &str| std::env::var(format!("TUBELOAD_ADMIN_{}", key)).ok();
    let (Some(username), Some(email), Some(password)) =
        (lookup("USERNAME"), lookup("EMAIL"), lookup("PASSWORD"))
    else {
        return;
    };
    match state.auth.bootstrap_admin(&username, &email, &password).await {
        Ok(user) => info!("Admin account '{}' ready", user.username),
        Err(e) => error!("Failed to create admin account '{}': {}", username, e),
    }
}
