use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relay_backend::{
    config::{LogFormat, Settings, DEFAULT_CONFIG_FILE},
    ws_router, AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Signaling relay for peer-to-peer meetings
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the bind address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the log level
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    settings.validate()?;

    init_tracing(&settings);

    let bind_addr = settings.bind_addr;
    let state = Arc::new(AppState::from_settings(settings)?);
    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "signaling relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
