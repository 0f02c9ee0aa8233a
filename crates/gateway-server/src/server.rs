//! HTTP server implementation.

use crate::{routes::create_router, state::GatewayContext};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// HTTP server for the gateway
#[derive(Debug)]
pub struct Server {
    context: GatewayContext,
}

impl Server {
    /// Create a new server
    #[must_use]
    pub fn new(context: GatewayContext) -> Self {
        Self { context }
    }

    /// Run until Ctrl+C or SIGTERM
    ///
    /// # Errors
    /// Returns error if the server fails to start or encounters a fatal error
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` completes, then drain in-flight requests for at most the
    /// configured graceful shutdown timeout
    ///
    /// # Errors
    /// Returns error if the server fails to start
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server_config = self.context.config().server.clone();
        let addr = server_config.socket_addr();
        let router = create_router(self.context);

        info!(
            host = %server_config.host,
            port = server_config.port,
            "Starting HTTP server"
        );

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;

        info!(address = %addr, "Server listening");

        let (draining_tx, draining_rx) = oneshot::channel::<()>();
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown.await;
            let _ = draining_tx.send(());
        });

        tokio::select! {
            result = serve => {
                result.map_err(|e| ServerError::Serve(e.to_string()))?;
            }
            () = drain_deadline(draining_rx, server_config.graceful_shutdown_timeout) => {
                warn!(
                    timeout_secs = server_config.graceful_shutdown_timeout.as_secs(),
                    "Graceful shutdown timed out, dropping open connections"
                );
            }
        }

        info!("Server shutdown complete");

        Ok(())
    }
}

/// Completes `grace` after draining starts; never completes if it does not start
async fn drain_deadline(draining: oneshot::Receiver<()>, grace: Duration) {
    if draining.await.is_ok() {
        tokio::time::sleep(grace).await;
    } else {
        std::future::pending::<()>().await;
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),
    /// Server error during operation
    #[error("Server error: {0}")]
    Serve(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_drain_deadline_waits_for_signal() {
        let (tx, rx) = oneshot::channel();
        let deadline = tokio::spawn(drain_deadline(rx, Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!deadline.is_finished());

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(deadline.is_finished());
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind("0.0.0.0:80: permission denied".to_string());
        assert!(err.to_string().contains("permission denied"));
    }
}
