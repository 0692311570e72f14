//! # alarmd — alarm trigger provider
//!
//! Arms cron, interval and one-shot triggers for one worker and fires them
//! against the trigger platform. Two hosts per worker run active/standby.
//!
//! Usage:
//!   alarmd                               # ~/.alarmd/config.toml + environment
//!   alarmd --config ./alarmd.toml        # Explicit config file
//!   alarmd --worker worker1 --host host1 # Override identity

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alarmd_core::AlarmConfig;
use alarmd_gateway::{AppState, start_server};
use alarmd_scheduler::{ActiveHost, AlarmEngine, HttpPlatform, SelfTestMonitor};
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "alarmd",
    version,
    about = "⏰ alarmd — cron, interval and one-shot trigger provider"
)]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP port (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Worker this process serves
    #[arg(long)]
    worker: Option<String>,

    /// Host id within the worker's active/standby pair
    #[arg(long)]
    host: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(cli: &Cli) -> Result<AlarmConfig> {
    let mut config = match &cli.config {
        Some(path) => AlarmConfig::load_from(Path::new(&expand_path(path)))?,
        None => AlarmConfig::load()?,
    };
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.provider.port = port;
    }
    if let Some(worker) = &cli.worker {
        config.provider.worker = worker.clone();
    }
    if let Some(host) = &cli.host {
        config.provider.host = host.clone();
    }
    Ok(config)
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "alarmd=debug,alarmd_core=debug,alarmd_store=debug,alarmd_scheduler=debug,alarmd_gateway=debug,tower_http=debug"
    } else {
        "alarmd=info,alarmd_core=info,alarmd_store=info,alarmd_scheduler=info,alarmd_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let provider = &config.provider;
    tracing::info!(
        "⏰ alarmd v{} starting: {} / {}",
        env!("CARGO_PKG_VERSION"),
        provider.worker,
        provider.host
    );

    let store = alarmd_store::open_store(&config.store).await?;
    let channel = alarmd_store::open_channel(&config.coordination).await?;
    let active = Arc::new(ActiveHost::new(
        &provider.host,
        &config.redis_key(),
        &config.coordination.field,
        channel,
    ));
    active.init().await?;

    let platform = Arc::new(HttpPlatform::new(
        &provider.router_uri(),
        provider.accept_invalid_certs,
    )?);
    let engine = AlarmEngine::new(&config, store, platform, active.clone());
    engine.start().await?;

    match &config.monitor.auth {
        Some(auth) => {
            let interval = Duration::from_secs(config.monitor.interval_secs);
            SelfTestMonitor::new(engine.clone(), auth, interval).spawn();
            tracing::info!("🩺 Self-test monitor every {interval:?}");
        }
        None => tracing::info!("🩺 Self-test monitor disabled (no monitor auth)"),
    }

    let shutdown_active = active.clone();
    let shutdown = async move {
        wait_for_signal().await;
        tracing::info!("🛑 Shutdown requested");
        match shutdown_active.hand_off().await {
            Ok(Some(next)) => tracing::info!("👋 {next} is now the active host"),
            Ok(None) => {}
            Err(e) => tracing::error!("❌ Active host hand-off failed: {e}"),
        }
    };

    start_server(AppState::new(engine.clone(), &config), provider.port, shutdown).await?;
    engine.shutdown();
    tracing::info!("👋 alarmd stopped");
    Ok(())
}
