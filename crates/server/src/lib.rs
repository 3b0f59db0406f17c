//! Proxy server library.
//!
//! Provides a reusable serve function for the binary and for integration
//! tests: bind, run the proxy router, shut down on cancellation.

#![deny(missing_docs)]

mod logger;

use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use logger::init as init_logger;

/// Configuration for serving the proxy.
pub struct ServeConfig {
    /// The socket address the server binds to. Port 0 picks a free port.
    pub listen_address: SocketAddr,
    /// Environment-derived proxy configuration.
    pub config: config::Config,
    /// The environment snapshot the configuration was built from; the
    /// secret resolver consults it per request.
    pub env: config::Env,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Optional oneshot sender receiving the bound address (useful when
    /// port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Serve-time failures, separated so the binary can map bind errors to
/// their own exit code.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The listen address could not be bound.
    #[error("failed to bind to {address}: {source}")]
    Bind {
        /// The address that was requested.
        address: SocketAddr,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The server failed while running.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Start and run the proxy server until the shutdown signal fires.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        env,
        shutdown_signal,
        bound_addr_sender,
    }: ServeConfig,
) -> Result<(), ServeError> {
    let state = Arc::new(proxy::ProxyState::new(config, env));
    let app = proxy::router(state);

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|source| ServeError::Bind {
            address: listen_address,
            source,
        })?;

    let bound = listener.local_addr().map_err(ServeError::Serve)?;

    if let Some(sender) = bound_addr_sender {
        // The receiver may be gone; the server keeps running regardless.
        let _ = sender.send(bound);
    }

    log::info!("Anthropic Messages endpoint: http://{bound}/v1/messages");
    log::info!("Health endpoint: http://{bound}/health");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(ServeError::Serve)?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
