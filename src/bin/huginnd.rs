//! huginnd: Huginn daemon.
//!
//! Serves the persona chat gateway over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use huginn::limiter::RateLimiter;
use huginn::server::config::{Config, Secrets};
use huginn::server::{AppState, cors_layer, router};
use huginn::{GeminiClient, GenerationBackend, HuginnError};

/// Huginn daemon, a persona chat gateway for the Gemini API.
#[derive(Parser)]
#[command(name = "huginnd")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Huginn chat gateway daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// List backend models that support content generation.
    Models,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; the key may come from secrets or the shell.
    let _ = dotenvy::dotenv();

    // Initialise tracing (default: huginn=info; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("huginn=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let api_key = secrets.require_gemini_key()?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, api_key).await,
        Command::Models => list_models(&config, api_key).await,
    }
}

async fn serve(config: Config, api_key: String) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = config.gateway_builder(api_key)?.build()?;
    let limiter = RateLimiter::new(&config.rate_limit_config());

    // Parse address
    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| HuginnError::Configuration(format!("Invalid address: {e}")))?;

    info!(
        version = huginn::version_string(),
        %addr,
        candidates = ?gateway.chain().candidates(),
        persona = gateway.persona().version(),
        "huginnd starting"
    );

    let state = AppState {
        gateway: Arc::new(gateway),
        limiter: Arc::new(limiter),
    };
    let app = router(state, cors_layer(&config.server.allowed_origins)?);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("huginnd stopped");
    Ok(())
}

async fn list_models(config: &Config, api_key: String) -> Result<(), Box<dyn std::error::Error>> {
    let client = match config.models.base_url {
        Some(ref url) => GeminiClient::with_base_url(api_key, url.clone())?,
        None => GeminiClient::new(api_key)?,
    };

    let models = client.list_models().await?;
    for model in &models {
        let marker = if config.models.candidates.contains(model) {
            " (candidate)"
        } else {
            ""
        };
        println!("{model}{marker}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
