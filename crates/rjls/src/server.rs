use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RjlsError;
use crate::logger::DecisionLogger;
use crate::metrics::counters;
use crate::registry::Registry;
use crate::store::RejectList;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Shared state for the relay server.
#[derive(Debug)]
pub struct ServerState {
    /// Canonical reject list; broadcasts through `registry`.
    pub store: RejectList,
    /// Active connections.
    pub registry: Arc<Registry>,
    /// Audit sink for decision reports.
    pub logger: DecisionLogger,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Cancelled once the accept loop stops.
    pub shutdown: CancellationToken,
}

impl ServerState {
    /// Wire a fresh registry and empty reject list around `logger`.
    #[must_use]
    pub fn new(config: ServerConfig, logger: DecisionLogger) -> Self {
        let registry = Arc::new(Registry::new(config.queue_capacity));
        Self {
            store: RejectList::new(Arc::clone(&registry)),
            registry,
            logger,
            config,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Bind the relay listener.
///
/// # Errors
///
/// Returns [`RjlsError::Bind`] if the address cannot be bound.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, RjlsError> {
    TcpListener::bind(config.listen)
        .await
        .map_err(|source| RjlsError::Bind {
            addr: config.listen,
            source,
        })
}

/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RjlsError> {
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// When the sender side of `shutdown_rx` is signalled or dropped, the accept
/// loop stops, every registered connection is closed, and the loop waits for
/// the connection tasks to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: tokio::sync::watch::Receiver<()>,
) -> Result<(), RjlsError> {
    let local_addr = listener.local_addr().map_err(RjlsError::Io)?;
    info!("server listening on {}", local_addr);
    let tasks = TaskTracker::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        // counts handlers that have not subscribed yet
                        if tasks.len() >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        counters::connections_accepted_total();
                        info!("new connection from {}", addr);
                        let state = Arc::clone(&state);
                        tasks.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, state).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, closing {} connections", tasks.len());
                break;
            }
        }
    }

    drop(listener);
    tasks.close();
    state.shutdown.cancel();
    state.registry.close_all();

    // Wait for in-flight connections to finish (with timeout)
    let drain_timeout = std::time::Duration::from_secs(30);
    if tokio::time::timeout(drain_timeout, tasks.wait()).await.is_err() {
        warn!(
            "drain timeout reached with {} connections still active",
            tasks.len()
        );
    }

    info!("server shut down gracefully");
    Ok(())
}
