//! Network discovery and listening
//!
//! Owns the TCP listener and its advertisement. When the listener dies, the
//! advertisement is withdrawn and the listener is rebound on a fresh
//! ephemeral port with exponential backoff, then advertised again under the
//! same service type.

mod advertiser;
mod listener;

pub use advertiser::{
    browse, DiscoveredGateway, MdnsAdvertiser, NoopAdvertiser, ServiceAdvertiser,
    ServiceRegistration,
};
pub use listener::{Listener, ListenerSource, TcpListenerSource};

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use toolgate_core::{EventSender, GatewayConfig, GatewayEvent};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid bind address '{0}': only IPv4 addresses are supported")]
    InvalidAddress(String),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Service advertisement failed: {0}")]
    Advertise(String),
    #[error("Service browse failed: {0}")]
    Browse(String),
}

/// Listener settings, derived from [`GatewayConfig`]
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub bind_address: Ipv4Addr,
    pub port: u16,
    pub service_type: String,
    pub instance_name: String,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl DiscoveryConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Result<Self, DiscoveryError> {
        let bind_address = config
            .bind_address
            .parse::<Ipv4Addr>()
            .map_err(|_| DiscoveryError::InvalidAddress(config.bind_address.clone()))?;
        let (backoff_min, backoff_max) = config.rebind_backoff();
        Ok(Self {
            bind_address,
            port: config.port,
            service_type: config.service_type.clone(),
            instance_name: config.instance_name.clone(),
            backoff_min,
            backoff_max,
        })
    }
}

/// A connection that passed the peer filter
#[derive(Debug)]
pub struct AcceptedConnection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// Running listener
pub struct DiscoveryHandle {
    port: watch::Receiver<Option<u16>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Port currently bound, `None` while rebinding
    pub fn port(&self) -> Option<u16> {
        *self.port.borrow()
    }

    pub fn port_watch(&self) -> watch::Receiver<Option<u16>> {
        self.port.clone()
    }

    /// Stop listening and withdraw the advertisement
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "[Discovery] Listener task panicked");
            }
        }
    }
}

pub struct NetworkDiscovery {
    config: DiscoveryConfig,
    advertiser: Arc<dyn ServiceAdvertiser>,
    listeners: Arc<dyn ListenerSource>,
    events: EventSender,
}

impl NetworkDiscovery {
    pub fn new(config: DiscoveryConfig, advertiser: Arc<dyn ServiceAdvertiser>, events: EventSender) -> Self {
        Self {
            config,
            advertiser,
            listeners: Arc::new(TcpListenerSource),
            events,
        }
    }

    pub fn with_listener_source(mut self, listeners: Arc<dyn ListenerSource>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Bind, advertise and start accepting
    ///
    /// A configured port that is already in use falls back to an ephemeral
    /// port. Any other bind error is returned.
    pub async fn start(
        self,
        cancel: CancellationToken,
    ) -> Result<(DiscoveryHandle, mpsc::UnboundedReceiver<AcceptedConnection>), DiscoveryError> {
        let listener = match self.bind(self.config.port).await {
            Ok(listener) => listener,
            Err(DiscoveryError::Bind { source, .. })
                if source.kind() == io::ErrorKind::AddrInUse && self.config.port != 0 =>
            {
                warn!(
                    port = self.config.port,
                    "[Discovery] Configured port in use, using an ephemeral port"
                );
                self.bind(0).await?
            }
            Err(e) => return Err(e),
        };

        let initial_port = listener.local_addr().ok().map(|addr| addr.port());
        let (port_tx, port_rx) = watch::channel(initial_port);
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(self.run(listener, conn_tx, port_tx, cancel.clone()));

        Ok((
            DiscoveryHandle {
                port: port_rx,
                cancel,
                task,
            },
            conn_rx,
        ))
    }

    async fn run(
        self,
        mut listener: Box<dyn Listener>,
        connections: mpsc::UnboundedSender<AcceptedConnection>,
        port: watch::Sender<Option<u16>>,
        cancel: CancellationToken,
    ) {
        let mut backoff = self.config.backoff_min;

        loop {
            let bound_port = match listener.local_addr() {
                Ok(addr) => addr.port(),
                Err(e) => {
                    error!(error = %e, "[Discovery] Listener has no local address");
                    0
                }
            };
            self.publish(bound_port);
            let _ = port.send(Some(bound_port));

            let failure = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.advertiser.withdraw();
                        let _ = port.send(None);
                        info!("[Discovery] Listener stopped");
                        return;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            backoff = self.config.backoff_min;
                            if !is_local_peer(peer.ip()) {
                                warn!(peer = %peer, "[Discovery] Dropping non-local peer");
                                continue;
                            }
                            debug!(peer = %peer, "[Discovery] Accepted connection");
                            if connections.send(AcceptedConnection { stream, peer }).is_err() {
                                self.advertiser.withdraw();
                                let _ = port.send(None);
                                debug!("[Discovery] Connection consumer gone, stopping");
                                return;
                            }
                        }
                        Err(e) if is_transient(&e) => {
                            debug!(error = %e, "[Discovery] Transient accept error");
                        }
                        Err(e) => break e,
                    }
                }
            };

            warn!(error = %failure, port = bound_port, "[Discovery] Listener failed, rebinding");
            self.advertiser.withdraw();
            let _ = port.send(None);
            drop(listener);

            listener = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.config.backoff_max);
                match self.bind(0).await {
                    Ok(listener) => break listener,
                    Err(e) => warn!(error = %e, retry_in = ?backoff, "[Discovery] Rebind failed"),
                }
            };
        }
    }

    async fn bind(&self, port: u16) -> Result<Box<dyn Listener>, DiscoveryError> {
        let addr = SocketAddr::new(IpAddr::V4(self.config.bind_address), port);
        self.listeners
            .bind(addr)
            .await
            .map_err(|source| DiscoveryError::Bind { addr, source })
    }

    fn publish(&self, port: u16) {
        let registration = ServiceRegistration {
            service_type: self.config.service_type.clone(),
            instance_name: self.config.instance_name.clone(),
            port,
        };
        if let Err(e) = self.advertiser.advertise(&registration) {
            // Clients can still connect by address
            warn!(error = %e, "[Discovery] Failed to advertise listener");
        }
        info!(port, "[Discovery] Listening");
        self.events.emit(GatewayEvent::ListenerReady { port });
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Loopback, private and link-local IPv4 peers only
pub fn is_local_peer(ip: IpAddr) -> bool {
    let v4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4,
            None => return false,
        },
    };
    v4.is_loopback() || v4.is_private() || v4.is_link_local()
}
