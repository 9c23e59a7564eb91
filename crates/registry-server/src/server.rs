// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry server core implementation.

use crate::config::{ConfigError, ServerConfig};
use registry_core::{ChannelError, InterestChannel, MessageConnection};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub mod connection;
pub mod multiplexer;
pub mod registration;
pub mod registry;

pub use connection::{ConnectionOptions, FramedConnection};
pub use multiplexer::InterestNotificationMultiplexer;
pub use registration::{RegistrationChannel, RegistrationState};
pub use registry::{InstanceRegistry, RegisterOutcome, RegistryChange, RegistryError};

/// Registry server - registration and discovery listeners over one registry.
#[derive(Clone)]
pub struct RegistryServer {
    config: Arc<ServerConfig>,
    registry: Arc<InstanceRegistry>,
    shutdown: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
    live_channels: Arc<AtomicUsize>,
}

impl RegistryServer {
    /// Create a new registry server.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = InstanceRegistry::new(config.change_feed_capacity);
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            shutdown: Arc::new(watch::channel(false).0),
            running: Arc::new(AtomicBool::new(false)),
            live_channels: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The instance registry served by this server.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Number of open registration and interest channels.
    pub fn live_channels(&self) -> usize {
        self.live_channels.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bind both configured ports and serve until shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        let registration_addr =
            SocketAddr::new(self.config.bind_address, self.config.registration_port);
        let discovery_addr = SocketAddr::new(self.config.bind_address, self.config.discovery_port);

        let registration = TcpListener::bind(registration_addr)
            .await
            .map_err(|e| ServerError::Bind(registration_addr, e.to_string()))?;
        let discovery = TcpListener::bind(discovery_addr)
            .await
            .map_err(|e| ServerError::Bind(discovery_addr, e.to_string()))?;

        self.serve(registration, discovery).await
    }

    /// Serve on already bound listeners until shut down.
    pub async fn serve(
        &self,
        registration: TcpListener,
        discovery: TcpListener,
    ) -> Result<(), ServerError> {
        let registration_addr = registration.local_addr()?;
        let discovery_addr = discovery.local_addr()?;

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        info!(
            "Registry server listening on {} (registration) and {} (discovery)",
            registration_addr, discovery_addr
        );

        self.spawn_eviction();

        let shutdown = self.shutdown_requested();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = registration.accept() => match result {
                    Ok((stream, peer_addr)) => self.spawn_registration(stream, peer_addr),
                    Err(e) => error!("Registration accept error: {}", e),
                },
                result = discovery.accept() => match result {
                    Ok((stream, peer_addr)) => self.spawn_discovery(stream, peer_addr),
                    Err(e) => error!("Discovery accept error: {}", e),
                },
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_eviction(&self) {
        let registry = Arc::clone(&self.registry);
        let interval = self.config.eviction_interval();
        let shutdown = self.shutdown_requested();

        tokio::spawn(async move {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let evicted = registry.evict_expired();
                        if !evicted.is_empty() {
                            info!("Evicted {} expired instances", evicted.len());
                            for id in &evicted {
                                debug!("  - {}", id);
                            }
                        }
                    }
                    _ = &mut shutdown => {
                        debug!("Eviction sweep shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_registration(&self, stream: TcpStream, peer_addr: SocketAddr) {
        info!("New registration connection from {}", peer_addr);
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_registration(stream, peer_addr).await {
                warn!("Registration connection error from {}: {}", peer_addr, e);
            }
        });
    }

    fn spawn_discovery(&self, stream: TcpStream, peer_addr: SocketAddr) {
        info!("New discovery connection from {}", peer_addr);
        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_discovery(stream, peer_addr).await {
                warn!("Discovery connection error from {}: {}", peer_addr, e);
            }
        });
    }

    async fn handle_registration(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let transport: Arc<dyn MessageConnection> = FramedConnection::new(
            stream,
            peer_addr.to_string(),
            self.config.connection_options(),
        );
        let channel = RegistrationChannel::open(
            transport,
            Arc::clone(&self.registry),
            self.config.lease_duration(),
        )?;

        self.live_channels.fetch_add(1, Ordering::AcqRel);
        tokio::select! {
            _ = channel.closed() => {}
            _ = self.shutdown_requested() => {
                debug!("Registration handler shutting down: {}", peer_addr);
                channel.close();
            }
        }
        self.live_channels.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    async fn handle_discovery(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let transport: Arc<dyn MessageConnection> = FramedConnection::new(
            stream,
            peer_addr.to_string(),
            self.config.connection_options(),
        );
        let multiplexer = InterestNotificationMultiplexer::new(Arc::clone(&self.registry));
        let channel = InterestChannel::open(transport, multiplexer)?;

        self.live_channels.fetch_add(1, Ordering::AcqRel);
        tokio::select! {
            _ = channel.closed() => {}
            _ = self.shutdown_requested() => {
                debug!("Discovery handler shutting down: {}", peer_addr);
                channel.close();
            }
        }
        self.live_channels.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Stop accepting, stop the sweep and close every live channel.
    ///
    /// Final: tasks started afterwards, including a later `serve`, see the
    /// request and stop at once.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called, whether
    /// before or after this future was created.
    fn shutdown_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut requested = self.shutdown.subscribe();
        async move {
            // A dropped sender cannot request shutdown any more; treat it as one.
            let _ = requested.wait_for(|stopped| *stopped).await;
        }
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, String),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
