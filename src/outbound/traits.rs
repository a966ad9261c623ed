//! Outbound trait definitions
//!
//! This module defines the core `Outbound` trait that all outbound types
//! implement, the connection handles they return, and the optional
//! capabilities (group, connection handler, provider listener) that callers
//! query at the call site.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

use crate::connection::{CopyResult, InboundContext, OutboundStats};
use crate::error::{ConnectionError, OutboundError, SelectorError};

/// Health status of an outbound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Outbound is healthy and accepting connections
    Healthy,
    /// Outbound is degraded (some failures)
    Degraded,
    /// Outbound is unhealthy (not accepting connections)
    Unhealthy,
    /// Health status is unknown
    Unknown,
}

impl HealthStatus {
    /// Check if the outbound is available for connections
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded | Self::Unknown)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Who initiated a connection
///
/// Inbound traffic handed to a group is `External`; dials issued by other
/// components (nested groups, resolvers, probes) are `Internal`. A group
/// switch always tears down internal connections and tears down external
/// ones only when configured to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionOrigin {
    /// Dial issued by the router itself
    #[default]
    Internal,
    /// Connection accepted from a client
    External,
}

impl ConnectionOrigin {
    /// Check if the connection was externally initiated
    #[must_use]
    pub const fn is_external(self) -> bool {
        matches!(self, Self::External)
    }
}

/// Byte stream usable on either side of a proxied connection
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Boxed byte stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// Represents an established outbound connection
pub struct OutboundConnection {
    /// The underlying stream
    stream: BoxedStream,
    /// Local address of the connection
    local_addr: Option<SocketAddr>,
    /// Remote address
    remote_addr: SocketAddr,
}

impl OutboundConnection {
    /// Create a new outbound connection over a TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        let local_addr = stream.local_addr().ok();
        Self {
            stream: Box::new(stream),
            local_addr,
            remote_addr,
        }
    }

    /// Create a connection over an arbitrary stream
    pub fn from_stream(
        stream: BoxedStream,
        local_addr: Option<SocketAddr>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            stream,
            local_addr,
            remote_addr,
        }
    }

    /// Replace the underlying stream with a wrapper around it
    #[must_use]
    pub fn map_stream<F>(self, f: F) -> Self
    where
        F: FnOnce(BoxedStream) -> BoxedStream,
    {
        Self {
            stream: f(self.stream),
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
        }
    }

    /// Consume and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> BoxedStream {
        self.stream
    }

    /// Get the local address
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get the remote address
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl AsyncRead for OutboundConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for OutboundConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for OutboundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundConnection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Connected datagram socket
///
/// Each call moves exactly one datagram.
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    /// Send one datagram to the connected peer
    async fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Receive one datagram from the connected peer
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf).await
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf).await
    }
}

/// Handle for an outbound UDP session
pub struct UdpOutboundHandle {
    socket: Box<dyn DatagramSocket>,
    remote_addr: SocketAddr,
}

impl UdpOutboundHandle {
    /// Create a handle over a connected tokio socket
    pub fn new(socket: UdpSocket, remote_addr: SocketAddr) -> Self {
        Self {
            socket: Box::new(socket),
            remote_addr,
        }
    }

    /// Create a handle over an arbitrary datagram socket
    pub fn from_socket(socket: Box<dyn DatagramSocket>, remote_addr: SocketAddr) -> Self {
        Self {
            socket,
            remote_addr,
        }
    }

    /// Replace the underlying socket with a wrapper around it
    #[must_use]
    pub fn map_socket<F>(self, f: F) -> Self
    where
        F: FnOnce(Box<dyn DatagramSocket>) -> Box<dyn DatagramSocket>,
    {
        Self {
            socket: f(self.socket),
            remote_addr: self.remote_addr,
        }
    }

    /// Get the remote address
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Send one datagram
    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf).await
    }

    /// Receive one datagram
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}

impl std::fmt::Debug for UdpOutboundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpOutboundHandle")
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Core trait for outbound implementations
///
/// All outbound types (Direct, Block, Selector, provider outbounds) must
/// implement this trait.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Connect to the target address through this outbound.
    ///
    /// # Arguments
    ///
    /// * `addr` - Target address to connect to
    /// * `timeout` - Connection timeout
    /// * `origin` - Who initiated the connection
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the connection fails.
    async fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
        origin: ConnectionOrigin,
    ) -> Result<OutboundConnection, OutboundError>;

    /// Open a UDP session to the target address through this outbound.
    ///
    /// # Errors
    ///
    /// Returns `OutboundError` if the session cannot be established.
    async fn connect_udp(
        &self,
        addr: SocketAddr,
        timeout: Duration,
        origin: ConnectionOrigin,
    ) -> Result<UdpOutboundHandle, OutboundError>;

    /// Get the unique tag for this outbound
    fn tag(&self) -> &str;

    /// Get the outbound type name
    fn outbound_type(&self) -> &str;

    /// Get the current health status
    fn health_status(&self) -> HealthStatus;

    /// Get connection statistics
    fn stats(&self) -> Arc<OutboundStats>;

    /// Check if this outbound carries UDP
    fn supports_udp(&self) -> bool {
        true
    }

    /// Tags of outbounds this outbound depends on
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Group capability
    fn as_group(&self) -> Option<&dyn OutboundGroup> {
        None
    }

    /// Extended connection-handling capability
    fn as_connection_handler(&self) -> Option<&dyn ConnectionHandler> {
        None
    }

    /// Provider-driven membership capability
    fn as_provider_listener(&self) -> Option<&dyn ProviderListener> {
        None
    }
}

/// An outbound composed of other outbounds
pub trait OutboundGroup: Send + Sync {
    /// Effective tag of the active member
    fn now(&self) -> String;

    /// All candidate member tags, in order
    fn all(&self) -> Vec<String>;
}

/// Outbounds that take over inbound connections themselves instead of
/// being bridged through a plain dial.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Handle an inbound stream until it closes
    async fn handle_connection(
        &self,
        stream: BoxedStream,
        metadata: InboundContext,
    ) -> Result<CopyResult, ConnectionError>;

    /// Handle an inbound datagram session until it goes idle
    async fn handle_packet_connection(
        &self,
        socket: Box<dyn DatagramSocket>,
        metadata: InboundContext,
    ) -> Result<CopyResult, ConnectionError>;
}

/// Outbounds whose membership follows one or more providers
pub trait ProviderListener: Send + Sync {
    /// Check if the provider feeds this outbound
    fn has_provider(&self, tag: &str) -> bool;

    /// Re-run membership after the provider's content changed
    ///
    /// # Errors
    ///
    /// Returns `SelectorError::ProviderNotBound` if the provider is not bound.
    fn update_outbounds(&self, provider_tag: &str) -> Result<(), SelectorError>;
}

/// Effective tag of an outbound, following nested groups
pub fn real_tag(outbound: &dyn Outbound) -> String {
    match outbound.as_group() {
        Some(group) => group.now(),
        None => outbound.tag().to_string(),
    }
}
