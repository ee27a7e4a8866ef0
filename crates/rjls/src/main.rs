#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use rjl_common::types::DEFAULT_PORT;
use rjls::admin::run_admin;
use rjls::bootstrap::load_rejects;
use rjls::config::{Args, ServerConfig};
use rjls::logger::DecisionLogger;
use rjls::metrics::{start_metrics_server, HealthState};
use rjls::server::ServerState;
use rjls::{bind, run_with_shutdown};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.port.is_none() {
        warn!("LC_PORT not set, using default port {}", DEFAULT_PORT);
    }
    let no_admin = args.no_admin;
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let logger = DecisionLogger::open(&config.log_path).await?;
    info!("appending decisions to {}", config.log_path.display());
    let state = Arc::new(ServerState::new(config.clone(), logger));

    let health_state = HealthState::new();
    tokio::spawn({
        let health_state = health_state.clone();
        let metrics_addr = config.metrics_addr;
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    if let Err(e) = load_rejects(&config.rejects_path, &state.store).await {
        warn!(
            "failed to read reject list {}: {}",
            config.rejects_path.display(),
            e
        );
    }

    let listener = match bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!("bound to {}", config.listen);
    health_state.set_ready(true);

    if !no_admin {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = run_admin(stdin, &state.store).await {
                warn!("admin command source failed: {}", e);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let server = run_with_shutdown(listener, Arc::clone(&state), shutdown_rx);
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            health_state.set_ready(false);
            let _ = shutdown_tx.send(());
            if let Err(e) = server.await {
                error!("server error during shutdown: {}", e);
            }
        }
    }

    Ok(())
}
