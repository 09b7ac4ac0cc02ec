//! huertbeat - Hue heartbeat
//!
//! Pulses every reachable Philips Hue light in time with whatever Spotify is
//! playing.
//!
//! Startup order:
//! 1. Load tunables and credentials (fail fast on bad credentials)
//! 2. Serve the OAuth callback on 127.0.0.1 and open the authorization page
//! 3. On the first successful callback, start the poll session
//! 4. Run until Ctrl+C / SIGTERM

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use huertbeat::services::{HueClient, SpotifyClient};
use huertbeat::session::Session;
use huertbeat::{build_router, AppState};
use huertbeat_common::config::{
    resolve_config_path, Credentials, TomlConfig, DEFAULT_CREDENTIALS_FILE,
};
use tokio::signal;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for huertbeat
#[derive(Parser, Debug)]
#[command(name = "huertbeat")]
#[command(about = "Pulse Hue lights to the beat of whatever Spotify is playing")]
#[command(version)]
struct Args {
    /// Credentials file with Hue bridge and Spotify app settings
    #[arg(long, default_value = DEFAULT_CREDENTIALS_FILE, env = "HUERTBEAT_CREDENTIALS")]
    credentials: PathBuf,

    /// Tunables file (TOML)
    #[arg(short, long, env = "HUERTBEAT_CONFIG")]
    config: Option<PathBuf>,

    /// Callback server port, overrides server.port
    #[arg(short, long, env = "HUERTBEAT_PORT")]
    port: Option<u16>,

    /// Print the authorization URL instead of opening a browser
    #[arg(long)]
    no_browser: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Tunables first: they carry the log level
    let config_path = resolve_config_path(args.config.as_deref());
    let config = TomlConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("huertbeat={level},huertbeat_common={level},tower_http=warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting huertbeat {}", huertbeat::build_id());

    if config_path.exists() {
        info!("Config: {}", config_path.display());
    } else {
        warn!("Config file {} not found, using defaults", config_path.display());
    }

    let credentials = Credentials::load(&args.credentials).context("Failed to load credentials")?;
    info!("Credentials: {}", args.credentials.display());

    let port = args.port.unwrap_or(config.server.port);
    let open_browser = config.server.open_browser && !args.no_browser;
    let request_timeout = Duration::from_secs(config.poll.request_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll.interval_ms);

    let spotify = Arc::new(
        SpotifyClient::new(credentials.spotify.clone(), request_timeout)
            .context("Failed to create Spotify client")?,
    );
    let hue = Arc::new(
        HueClient::new(&credentials.hue, request_timeout).context("Failed to create Hue client")?,
    );
    info!("Hue bridge: {}", credentials.hue.host);

    let (authorized_tx, authorized_rx) = oneshot::channel();
    let app = build_router(AppState::new(spotify.clone(), authorized_tx));

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("Failed to bind callback port {}", port))?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let authorize_url = spotify.authorize_url()?;
    info!("Authorize huertbeat at {}", authorize_url);
    if open_browser {
        if let Err(e) = webbrowser::open(authorize_url.as_str()) {
            warn!("Could not open a browser ({}), visit the URL above", e);
        }
    }

    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown before authorization completed");
        }
        authorized = authorized_rx => match authorized {
            Ok(()) => {
                let session = Session::new(spotify, hue, config.pulse.clone(), shutdown.clone());
                session.run(poll_interval).await.context("Poll session failed")?;
            }
            Err(_) => error!("Callback server stopped before authorization"),
        },
    }

    shutdown.cancel();
    server
        .await
        .context("Server task failed")?
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
