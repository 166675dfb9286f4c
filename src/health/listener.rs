//! Accept-and-close TCP listener for load balancer probes.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("invalid health bind address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind health listener on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound health-check listener.
pub struct HealthListener {
    inner: TcpListener,
}

impl HealthListener {
    /// Bind to `address`.
    pub async fn bind(address: &str) -> Result<Self, HealthError> {
        let addr: SocketAddr = address.parse().map_err(|source| HealthError::Address {
            address: address.to_string(),
            source,
        })?;

        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthError::Bind { address: addr, source })?;

        let local_addr = inner.local_addr().unwrap_or(addr);
        tracing::info!(address = %local_addr, "Health listener bound");

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept and immediately close connections until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.inner.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::trace!(peer_addr = %peer, "Health probe accepted");
                        drop(stream);
                    }
                    Err(e) => accept_failed(&e).await,
                },
                _ = shutdown.recv() => {
                    tracing::debug!("Health listener stopping");
                    return;
                }
            }
        }
    }
}

async fn accept_failed(error: &std::io::Error) {
    tracing::debug!(error = %error, "Health listener accept failed");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}
