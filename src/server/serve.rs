use std::future::Future;
use std::net::SocketAddr;

use axum_server::tls_rustls::RustlsConfig;
use config::ConfigError;
use tokio::net::TcpListener;

use crate::error::AppError;
use crate::shutdown::{shutdown_signal, GracefulShutdown};

use super::{create_app, AppState};

/// Bind the configured address and serve until SIGINT/SIGTERM.
///
/// Serves wss:// when a certificate and key are configured, plain ws:// otherwise.
pub async fn run(state: AppState) -> Result<(), AppError> {
    let addr: SocketAddr = state
        .settings
        .server_addr()
        .parse()
        .map_err(|e| ConfigError::Message(format!("invalid server address: {}", e)))?;

    let shutdown = GracefulShutdown::new(
        state.connection_manager.clone(),
        state.settings.shutdown.drain_timeout(),
    );
    let drain = async move {
        shutdown_signal().await;
        shutdown.execute("server shutting down").await;
    };

    match state.settings.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .map_err(|e| {
                    AppError::Tls(format!(
                        "failed to load {} / {}: {}",
                        cert_path.display(),
                        key_path.display(),
                        e
                    ))
                })?;

            let app = create_app(state.clone());
            let handle = axum_server::Handle::new();
            let stopper = handle.clone();
            let drain_timeout = state.settings.shutdown.drain_timeout();
            tokio::spawn(async move {
                drain.await;
                stopper.graceful_shutdown(Some(drain_timeout));
            });

            tracing::info!(addr = %addr, "Relay listening (TLS)");
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(addr = %addr, "Relay listening");
            serve_listener(listener, state, drain).await?;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Serve plain WebSocket/HTTP on an already-bound listener until `shutdown` resolves
pub async fn serve_listener<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_app(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
