//! Graceful shutdown handling for the relay.
//!
//! On shutdown every registered connection is asked to close with
//! 1001 (going away), then we wait a bounded time for the registry to drain.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::close_code;
use tokio::signal;
use tokio::time::timeout;
use uuid::Uuid;

use crate::connection_manager::ConnectionManager;

/// Handles graceful shutdown of the relay
pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new(connection_manager: Arc<ConnectionManager>, drain_timeout: Duration) -> Self {
        Self {
            connection_manager,
            drain_timeout,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.connection_manager.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();

        tracing::info!(reason = %reason, "Starting graceful shutdown: closing connections");
        let mut signalled = HashSet::new();
        self.signal_connections(&mut signalled);

        tracing::info!("Waiting for connections to close");
        self.wait_for_connections_to_close(&mut signalled).await;

        let remaining = self.connection_manager.len();
        let result = ShutdownResult {
            connections_signalled: signalled.len(),
            connections_closed: signalled.len().saturating_sub(remaining),
            remaining,
            duration: start.elapsed(),
        };

        tracing::info!(
            connections_signalled = result.connections_signalled,
            connections_closed = result.connections_closed,
            remaining = result.remaining,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    /// Ask every registered connection not yet signalled to close
    fn signal_connections(&self, signalled: &mut HashSet<Uuid>) {
        for conn in self.connection_manager.snapshot() {
            if signalled.insert(conn.id) {
                conn.request_close(close_code::AWAY);
            }
        }
    }

    /// Poll until the registry is empty, signalling late arrivals on each tick
    async fn wait_for_connections_to_close(&self, signalled: &mut HashSet<Uuid>) {
        let wait_future = async {
            while !self.connection_manager.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.signal_connections(signalled);
            }
        };

        if timeout(self.drain_timeout, wait_future).await.is_err() {
            tracing::warn!(
                remaining_connections = self.connection_manager.len(),
                "Some connections did not close gracefully"
            );
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Connections asked to close
    pub connections_signalled: usize,
    /// Connections that left the registry before the deadline
    pub connections_closed: usize,
    /// Connections still registered when we gave up waiting
    pub remaining: usize,
    pub duration: Duration,
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
