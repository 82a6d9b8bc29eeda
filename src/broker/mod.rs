//! Broker supervisor
//!
//! Owns the TCP listener, the client table (client_id -> outbound writer),
//! and the subscription registry. `start()` binds and runs the accept loop;
//! `stop()` closes the listener and every active session, then waits for
//! their workers to finish releasing registry entries.

mod connection;
mod router;
mod writer;

pub use connection::{Connection, ConnectionError};
pub use router::Router;
pub use writer::{SendError, SessionWriter};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::topic::SubscriptionRegistry;

/// Broker configuration. Fields map 1:1 onto `config::Config` plus whatever
/// a CLI invocation overrides.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections. 0 means unlimited.
    pub max_connections: usize,
    /// Maximum decoded packet size in bytes.
    pub max_packet_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1883".parse().unwrap(),
            max_connections: 0,
            max_packet_size: crate::codec::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// The MQTT broker: listener + client table + subscription registry.
pub struct Broker {
    config: BrokerConfig,
    registry: Arc<SubscriptionRegistry>,
    clients: Arc<DashMap<Arc<str>, Arc<SessionWriter>>>,
    router: Arc<Router>,
    shutdown: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let clients = Arc::new(DashMap::new());
        let router = Arc::new(Router::new(registry.clone(), clients.clone()));
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            registry,
            clients,
            router,
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind the listener and run the accept loop until `stop()` is called
    /// (or the process receives Ctrl-C). Each accepted connection spawns a
    /// session worker task; returns once every worker has exited.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "listening");
        self.running.store(true, Ordering::Release);

        let mut workers = JoinSet::new();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!(%addr, "accepted connection");
                            let config = self.config.clone();
                            let registry = self.registry.clone();
                            let clients = self.clients.clone();
                            let router = self.router.clone();
                            workers.spawn(async move {
                                let mut conn = Connection::new(stream, addr, config, registry, clients, router);
                                if let Err(e) = conn.run().await {
                                    debug!(%addr, error = %e, "connection closed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed, retrying");
                        }
                    }
                }
            }
        }

        drop(listener);
        // Every still-running worker observes EOF once its socket is closed
        // by `stop()`, or exits on its own. Drain them so `stop()`/`run()`
        // only returns after every session has released its registry entries.
        while workers.join_next().await.is_some() {}
        self.running.store(false, Ordering::Release);
        info!("broker stopped");
        Ok(())
    }

    /// Signal every active session to close and the accept loop to exit.
    /// Returns immediately; `run()` resolves once shutdown has drained.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
        for entry in self.clients.iter() {
            entry.value().close();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Client ids subscribed to any filter matching `topic`. Exposed for
    /// tests and diagnostics; the router uses this internally on PUBLISH.
    pub fn matching_clients(&self, topic: &str) -> Vec<Arc<str>> {
        self.registry.matching_clients(topic).into_iter().collect()
    }
}
