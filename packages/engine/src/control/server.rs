// packages/engine/src/control/server.rs
//! TCP control server
//!
//! Accepts viewers until shutdown and runs each one on its own task with its
//! own [`SessionController`](crate::control::SessionController).

use crate::control::connection::serve_connection;
use crate::observability::metrics;
use crate::runtime::session::SessionSettings;
use crate::utils::config::{EngineConfig, ServerConfig};
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// A registered control connection
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer: SocketAddr,
    pub connected_at: Instant,
}

/// Live connections, keyed by connection id
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Ulid, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, peer: SocketAddr) -> Ulid {
        let id = Ulid::new();
        self.connections.insert(
            id,
            ConnectionEntry {
                peer,
                connected_at: Instant::now(),
            },
        );
        id
    }

    fn remove(&self, id: &Ulid) -> Option<ConnectionEntry> {
        self.connections.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Control server
pub struct ControlServer {
    listen_addr: String,
    server: ServerConfig,
    settings: SessionSettings,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ControlServer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            listen_addr: config.listen_addr(),
            server: config.server.clone(),
            settings: SessionSettings::from(config),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            EngineError::Configuration(format!("Failed to bind {}: {}", self.listen_addr, e))
        })?;

        info!("Control server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until `signal` resolves or [`shutdown_token`] fires,
    /// then stop every connection and wait for them
    ///
    /// [`shutdown_token`]: ControlServer::shutdown_token
    pub async fn serve<F>(&self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        self.shutdown.cancel();
        self.tracker.close();

        info!("Waiting for {} connections to close", self.registry.len());
        self.tracker.wait().await;
        info!("Control server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let cancel = self.shutdown.child_token();
        let id = self.registry.register(peer);
        metrics::connection_opened();
        info!("Connection {} opened from {}", id, peer);

        let registry = self.registry.clone();
        let server = self.server.clone();
        let settings = self.settings.clone();

        self.tracker.spawn(async move {
            let result = serve_connection(stream, &server, settings, cancel).await;

            let lifetime = registry
                .remove(&id)
                .map(|entry| entry.connected_at.elapsed())
                .unwrap_or_default();
            metrics::connection_closed();
            match result {
                Ok(()) => info!("Connection {} from {} closed after {:?}", id, peer, lifetime),
                Err(e) => warn!(
                    "Connection {} from {} ended after {:?}: {}",
                    id, peer, lifetime, e
                ),
            }
        });
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Cancelling this token shuts the server down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
