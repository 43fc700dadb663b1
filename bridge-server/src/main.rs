use anyhow::Context;
use bindings::{BridgeConfig, DefaultAdapterFactory, Orchestrator};
use bridge_server::server;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // RUST_LOG wins, then LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .json()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    init_tracing();

    info!("Starting MQ bridge...");

    // Load configuration
    let config = BridgeConfig::load().context("Failed to load configuration")?;
    let bindings = config.binding_configs().context("Invalid configuration")?;

    info!("Configuration loaded: {} bindings", bindings.len());

    // Start binding workers
    let orchestrator = Arc::new(
        Orchestrator::new(bindings, config.runtime.clone(), Arc::new(DefaultAdapterFactory))
            .context("Invalid binding set")?,
    );
    orchestrator.start().context("Failed to start bindings")?;

    // Start HTTP server
    let server_config = config.server.clone();
    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );
    let server = server::build(orchestrator.clone(), &server_config)?;

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    shutdown_signal().await;
    info!("Shutdown signal received");

    server_handle.stop(true).await;
    match server_task.await {
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let report = orchestrator.shutdown(config.runtime.shutdown_timeout()).await;
    if !report.is_clean() {
        warn!("Bindings force-stopped: {:?}", report.forced);
    }

    info!("MQ bridge stopped");
    Ok(())
}
