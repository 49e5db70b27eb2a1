//! OTA release service binary.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use ota_release::config::HOST_CONFIG_PATH;
use ota_release::{Coordinator, EffectiveConfig};
use ota_server::{serve, AppState};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "ota-server")]
#[command(about = "Serve OTA artifact releases and device rollouts over HTTP", version)]
struct Cli {
    /// Config file layered over /etc/ota-release/config.toml
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Storage root (overrides storage.root)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Listen address (overrides server.bind_address)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut overrides = serde_json::Map::new();
    if let Some(root) = &cli.root {
        overrides.insert("storage".into(), serde_json::json!({ "root": root }));
    }
    if let Some(bind) = &cli.bind {
        overrides.insert("server".into(), serde_json::json!({ "bind_address": bind }));
    }
    let overrides = (!overrides.is_empty()).then(|| serde_json::Value::Object(overrides));

    let settings = match EffectiveConfig::build(
        Some(Path::new(HOST_CONFIG_PATH)),
        cli.config.as_deref(),
        overrides,
    )
    .and_then(|effective| effective.settings())
    {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };
    ota_release::init_tracing(&settings.logging.filter);

    info!(
        root = %settings.storage.root.display(),
        bind_address = %settings.server.bind_address,
        "OTA release service starting"
    );

    let coordinator = match tokio::task::spawn_blocking({
        let settings = settings.clone();
        move || Coordinator::open(&settings)
    })
    .await
    {
        Ok(Ok(coordinator)) => Arc::new(coordinator),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to open storage root");
            process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "Startup task failed");
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&settings.server.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, bind_address = %settings.server.bind_address, "Failed to bind");
            process::exit(1);
        }
    };

    let state = Arc::new(AppState::new(Arc::clone(&coordinator), &settings));
    let served = serve(listener, state, shutdown_signal()).await;
    if let Err(e) = &served {
        error!(error = %e, "Server error");
    }

    match Arc::try_unwrap(coordinator) {
        Ok(coordinator) => {
            if let Err(e) = coordinator.close() {
                error!(error = %e, "Final ledger flush failed");
                process::exit(1);
            }
        }
        // blocking calls that outlived their budget still hold a handle
        Err(coordinator) => {
            if let Err(e) = coordinator.flush_ledger() {
                error!(error = %e, "Final ledger flush failed");
                process::exit(1);
            }
        }
    }

    info!("Shutdown complete");
    if served.is_err() {
        process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
