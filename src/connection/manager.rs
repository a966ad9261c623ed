//! Connection Manager
//!
//! Bridges raw inbound connections to outbounds that only offer the plain
//! dial contract: dial the destination through the outbound, then relay
//! bytes (TCP) or datagrams (UDP) in both directions until one side closes,
//! the session idles out, or an outbound switch interrupts it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::stats::{ConnectionStats, StatsSnapshot};
use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::interrupt::is_interrupted;
use crate::outbound::{BoxedStream, ConnectionOrigin, DatagramSocket, Outbound};

/// Maximum UDP datagram we relay
const UDP_BUFFER_SIZE: usize = 65_535;

/// Metadata of an inbound connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundContext {
    /// Where the client wants to go
    pub destination: SocketAddr,
    /// Client address, when known
    pub source: Option<SocketAddr>,
    /// Tag of the inbound that accepted the connection
    pub inbound_tag: Option<String>,
}

impl InboundContext {
    /// Create metadata for a destination
    #[must_use]
    pub const fn new(destination: SocketAddr) -> Self {
        Self {
            destination,
            source: None,
            inbound_tag: None,
        }
    }

    /// Set the client address
    #[must_use]
    pub const fn with_source(mut self, source: SocketAddr) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the inbound tag
    #[must_use]
    pub fn with_inbound_tag(mut self, tag: impl Into<String>) -> Self {
        self.inbound_tag = Some(tag.into());
        self
    }
}

/// Result of relaying a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyResult {
    /// Bytes transferred from client to upstream
    pub client_to_upstream: u64,
    /// Bytes transferred from upstream to client
    pub upstream_to_client: u64,
}

impl CopyResult {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

enum Relayed {
    Upstream(usize),
    Downstream(usize),
}

/// Connection manager for bridging inbound connections to outbounds
pub struct ConnectionManager {
    /// Connect timeout for outbound dials
    connect_timeout: Duration,

    /// Idle timeout for UDP sessions
    udp_timeout: Duration,

    /// Connection statistics
    stats: Arc<ConnectionStats>,
}

impl ConnectionManager {
    /// Create a new connection manager
    #[must_use]
    pub fn new(config: &ConnectionConfig) -> Self {
        Self::with_timeouts(config.connect_timeout(), config.udp_timeout())
    }

    /// Create a connection manager with explicit timeouts
    #[must_use]
    pub fn with_timeouts(connect_timeout: Duration, udp_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            udp_timeout,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Dial the destination through `outbound` and relay the stream
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Dial` if the dial fails,
    /// `ConnectionError::Interrupted` if an outbound switch tore the
    /// connection down, or an I/O error from the relay.
    pub async fn new_connection(
        &self,
        outbound: &dyn Outbound,
        mut inbound: BoxedStream,
        metadata: &InboundContext,
        origin: ConnectionOrigin,
    ) -> Result<CopyResult, ConnectionError> {
        self.stats.record_accepted(origin);

        let mut upstream = match outbound
            .connect(metadata.destination, self.connect_timeout, origin)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.stats.record_failed();
                warn!(
                    "Dial {} via {} failed: {}",
                    metadata.destination,
                    outbound.tag(),
                    e
                );
                return Err(e.into());
            }
        };

        debug!(
            "Relaying connection to {} via {}",
            metadata.destination,
            outbound.tag()
        );

        match tokio::io::copy_bidirectional(&mut inbound, &mut upstream).await {
            Ok((client_to_upstream, upstream_to_client)) => {
                let result = CopyResult {
                    client_to_upstream,
                    upstream_to_client,
                };
                self.stats.record_completed(&result);
                Ok(result)
            }
            Err(e) => Err(self.relay_failed(&e, metadata, outbound)),
        }
    }

    /// Open a UDP session through `outbound` and relay datagrams
    ///
    /// The session ends when neither side has sent anything for the UDP
    /// idle timeout.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionManager::new_connection`].
    pub async fn new_packet_connection(
        &self,
        outbound: &dyn Outbound,
        inbound: Box<dyn DatagramSocket>,
        metadata: &InboundContext,
        origin: ConnectionOrigin,
    ) -> Result<CopyResult, ConnectionError> {
        self.stats.record_accepted(origin);

        let upstream = match outbound
            .connect_udp(metadata.destination, self.connect_timeout, origin)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.stats.record_failed();
                warn!(
                    "UDP dial {} via {} failed: {}",
                    metadata.destination,
                    outbound.tag(),
                    e
                );
                return Err(e.into());
            }
        };

        let mut up_buf = vec![0u8; UDP_BUFFER_SIZE];
        let mut down_buf = vec![0u8; UDP_BUFFER_SIZE];
        let mut result = CopyResult::default();

        loop {
            let step = tokio::time::timeout(self.udp_timeout, async {
                tokio::select! {
                    received = inbound.recv(&mut up_buf) => {
                        let n = received?;
                        upstream.send(&up_buf[..n]).await?;
                        Ok::<_, io::Error>(Relayed::Upstream(n))
                    }
                    received = upstream.recv(&mut down_buf) => {
                        let n = received?;
                        inbound.send(&down_buf[..n]).await?;
                        Ok(Relayed::Downstream(n))
                    }
                }
            })
            .await;

            match step {
                Err(_) => {
                    debug!(
                        "UDP session to {} via {} idle, closing",
                        metadata.destination,
                        outbound.tag()
                    );
                    break;
                }
                Ok(Ok(Relayed::Upstream(n))) => result.client_to_upstream += n as u64,
                Ok(Ok(Relayed::Downstream(n))) => result.upstream_to_client += n as u64,
                Ok(Err(e)) => return Err(self.relay_failed(&e, metadata, outbound)),
            }
        }

        self.stats.record_completed(&result);
        Ok(result)
    }

    fn relay_failed(
        &self,
        err: &io::Error,
        metadata: &InboundContext,
        outbound: &dyn Outbound,
    ) -> ConnectionError {
        if is_interrupted(err) {
            self.stats.record_interrupted();
            debug!(
                "Connection to {} via {} interrupted by outbound switch",
                metadata.destination,
                outbound.tag()
            );
            return ConnectionError::Interrupted;
        }
        self.stats.record_failed();
        debug!(
            "Relay to {} via {} failed: {}",
            metadata.destination,
            outbound.tag(),
            err
        );
        ConnectionError::transfer(err.to_string())
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get a snapshot of current statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Get the dial timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(&ConnectionConfig::default())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connect_timeout", &self.connect_timeout)
            .field("udp_timeout", &self.udp_timeout)
            .field("active", &self.stats.active())
            .finish()
    }
}
