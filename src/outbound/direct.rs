//! Direct outbound implementation
//!
//! `DirectOutbound` connects straight to the destination, optionally from a
//! specific local address or with a routing mark for policy routing.
//!
//! Supports both TCP and UDP.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::traits::{ConnectionOrigin, HealthStatus, Outbound, OutboundConnection, UdpOutboundHandle};
use crate::config::OutboundConfig;
use crate::connection::OutboundStats;
use crate::error::OutboundError;

const HEALTH_HEALTHY: u8 = 0;
const HEALTH_DEGRADED: u8 = 1;
const HEALTH_UNHEALTHY: u8 = 2;
const HEALTH_UNKNOWN: u8 = 3;

#[inline]
const fn u8_to_health(value: u8) -> HealthStatus {
    match value {
        HEALTH_HEALTHY => HealthStatus::Healthy,
        HEALTH_DEGRADED => HealthStatus::Degraded,
        HEALTH_UNHEALTHY => HealthStatus::Unhealthy,
        _ => HealthStatus::Unknown,
    }
}

/// Direct outbound - connects directly to the destination
///
/// Supports:
/// - `bind_address`: Bind to a specific local address
/// - `routing_mark`: Set routing mark for policy routing (`SO_MARK`)
pub struct DirectOutbound {
    config: OutboundConfig,
    stats: Arc<OutboundStats>,
    /// Health as an atomic u8, updated on every dial
    health: AtomicU8,
}

impl DirectOutbound {
    /// Create a new direct outbound from configuration
    pub fn new(config: OutboundConfig) -> Self {
        Self {
            config,
            stats: Arc::new(OutboundStats::new()),
            health: AtomicU8::new(HEALTH_UNKNOWN),
        }
    }

    /// Create a simple direct outbound with just a tag
    pub fn simple(tag: impl Into<String>) -> Self {
        Self::new(OutboundConfig::direct(tag))
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &OutboundConfig {
        &self.config
    }

    /// Create a socket for `target` with the configured options applied
    fn create_socket(
        &self,
        target: SocketAddr,
        ty: Type,
        protocol: Protocol,
    ) -> Result<Socket, OutboundError> {
        let socket = Socket::new(Domain::for_address(target), ty, Some(protocol))
            .map_err(|e| OutboundError::socket_option("create", e.to_string()))?;

        if let Some(mark) = self.config.routing_mark {
            set_routing_mark(&socket, mark)?;
        }

        if let Some(addr) = self.config.bind_address {
            socket.bind(&addr.into()).map_err(|e| {
                OutboundError::socket_option("bind", format!("Failed to bind to {addr}: {e}"))
            })?;
        }

        socket
            .set_nonblocking(true)
            .map_err(|e| OutboundError::socket_option("O_NONBLOCK", e.to_string()))?;

        Ok(socket)
    }

    /// Success resets to healthy; failures step Healthy -> Degraded -> Unhealthy
    fn update_health(&self, success: bool) {
        if success {
            self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
            return;
        }
        let _ = self
            .health
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(match current {
                    HEALTH_HEALTHY => HEALTH_DEGRADED,
                    _ => HEALTH_UNHEALTHY,
                })
            });
    }

    fn dial_failed(&self, err: OutboundError) -> OutboundError {
        self.update_health(false);
        self.stats.record_error();
        err
    }
}

/// Set `SO_MARK` for policy routing
fn set_routing_mark(socket: &Socket, mark: u32) -> Result<(), OutboundError> {
    let fd = socket.as_raw_fd();

    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_MARK,
            std::ptr::addr_of!(mark).cast::<libc::c_void>(),
            mem::size_of::<u32>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(OutboundError::socket_option(
            "SO_MARK",
            format!("Failed to set routing mark {mark}: {err}"),
        ));
    }

    debug!("Set routing mark: {}", mark);
    Ok(())
}

#[async_trait]
impl Outbound for DirectOutbound {
    async fn connect(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
        _origin: ConnectionOrigin,
    ) -> Result<OutboundConnection, OutboundError> {
        self.stats.record_connection();

        let socket = self
            .create_socket(addr, Type::STREAM, Protocol::TCP)
            .map_err(|e| self.dial_failed(e))?;

        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(15));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable TCP keepalive on {}: {}", self.config.tag, e);
        }

        // EINPROGRESS is expected for non-blocking sockets
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => {
                return Err(self.dial_failed(OutboundError::connection_failed(addr, e.to_string())))
            }
        }

        let std_stream: std::net::TcpStream = socket.into();
        let stream = TcpStream::from_std(std_stream)
            .map_err(|e| self.dial_failed(OutboundError::connection_failed(addr, e.to_string())))?;

        let connect_result = timeout(connect_timeout, async {
            stream
                .writable()
                .await
                .map_err(|e| OutboundError::connection_failed(addr, e.to_string()))?;

            match stream.take_error() {
                Ok(Some(e)) | Err(e) => Err(OutboundError::connection_failed(addr, e.to_string())),
                Ok(None) => Ok(()),
            }
        })
        .await;

        match connect_result {
            Ok(Ok(())) => {
                self.update_health(true);
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                debug!(
                    "Direct connection to {} via {} successful",
                    addr, self.config.tag
                );
                Ok(OutboundConnection::new(stream, addr))
            }
            Ok(Err(e)) => Err(self.dial_failed(e)),
            Err(_) => Err(self.dial_failed(OutboundError::Timeout {
                addr,
                timeout_ms: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })),
        }
    }

    async fn connect_udp(
        &self,
        addr: SocketAddr,
        _timeout: Duration,
        _origin: ConnectionOrigin,
    ) -> Result<UdpOutboundHandle, OutboundError> {
        self.stats.record_connection();

        let socket = self
            .create_socket(addr, Type::DGRAM, Protocol::UDP)
            .map_err(|e| self.dial_failed(e))?;

        if self.config.bind_address.is_none() {
            let unspecified: SocketAddr = if addr.is_ipv4() {
                SocketAddr::from(([0, 0, 0, 0], 0))
            } else {
                SocketAddr::from(([0u16; 8], 0))
            };
            socket.bind(&unspecified.into()).map_err(|e| {
                self.dial_failed(OutboundError::socket_option("bind", e.to_string()))
            })?;
        }

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| self.dial_failed(OutboundError::socket_option("from_std", e.to_string())))?;

        socket
            .connect(addr)
            .await
            .map_err(|e| self.dial_failed(OutboundError::connection_failed(addr, e.to_string())))?;

        self.update_health(true);
        debug!("Direct UDP session to {} via {}", addr, self.config.tag);
        Ok(UdpOutboundHandle::new(socket, addr))
    }

    fn tag(&self) -> &str {
        &self.config.tag
    }

    fn outbound_type(&self) -> &str {
        "direct"
    }

    fn health_status(&self) -> HealthStatus {
        u8_to_health(self.health.load(Ordering::Relaxed))
    }

    fn stats(&self) -> Arc<OutboundStats> {
        Arc::clone(&self.stats)
    }
}

impl std::fmt::Debug for DirectOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectOutbound")
            .field("tag", &self.config.tag)
            .field("bind_address", &self.config.bind_address)
            .field("routing_mark", &self.config.routing_mark)
            .field("health", &self.health_status())
            .finish()
    }
}
