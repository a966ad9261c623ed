//! Connection interruption
//!
//! An [`InterruptGroup`] tracks the connections opened through a group
//! outbound so a switch of the active member can tear them down. Each
//! connection is tagged by [`ConnectionOrigin`]:
//!
//! - internal connections are always interrupted
//! - external connections are interrupted only when the caller asks for it
//!
//! Interruption cancels a token shared by every connection of that origin
//! and installs a fresh one, so connections opened afterwards are unaffected.
//! A blocked read or write on an interrupted stream wakes up and fails with
//! an error recognised by [`is_interrupted`].

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::outbound::{BoxedStream, ConnectionOrigin, DatagramSocket};

/// Error payload carried by I/O errors of interrupted connections
#[derive(Debug, Error)]
#[error("connection interrupted by outbound switch")]
pub struct Interrupted;

fn interrupted_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, Interrupted)
}

/// Check if an I/O error was caused by an interrupt
#[must_use]
pub fn is_interrupted(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Interrupted>())
}

struct Tokens {
    internal: CancellationToken,
    external: CancellationToken,
}

/// Set of connections that can be torn down together
pub struct InterruptGroup {
    tokens: Mutex<Tokens>,
}

impl InterruptGroup {
    /// Create an empty group
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                internal: CancellationToken::new(),
                external: CancellationToken::new(),
            }),
        }
    }

    /// Register a connection and get its handle
    #[must_use]
    pub fn handle(&self, origin: ConnectionOrigin) -> InterruptHandle {
        let tokens = self.tokens.lock();
        let token = match origin {
            ConnectionOrigin::Internal => tokens.internal.clone(),
            ConnectionOrigin::External => tokens.external.clone(),
        };
        InterruptHandle { token }
    }

    /// Tear down the tracked connections
    ///
    /// Internal connections are always interrupted; external ones only when
    /// `interrupt_external` is set.
    pub fn interrupt(&self, interrupt_external: bool) {
        let mut tokens = self.tokens.lock();
        tokens.internal.cancel();
        tokens.internal = CancellationToken::new();
        if interrupt_external {
            tokens.external.cancel();
            tokens.external = CancellationToken::new();
        }
        debug!(
            "Interrupted internal{} connections",
            if interrupt_external { " and external" } else { "" }
        );
    }

    /// Wrap a byte stream so it fails once interrupted
    #[must_use]
    pub fn wrap_stream(&self, stream: BoxedStream, origin: ConnectionOrigin) -> BoxedStream {
        Box::new(InterruptibleStream::new(stream, self.handle(origin)))
    }

    /// Wrap a datagram socket so it fails once interrupted
    #[must_use]
    pub fn wrap_packet(
        &self,
        socket: Box<dyn DatagramSocket>,
        origin: ConnectionOrigin,
    ) -> Box<dyn DatagramSocket> {
        Box::new(InterruptiblePacket {
            inner: socket,
            handle: self.handle(origin),
        })
    }
}

impl Default for InterruptGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptGroup").finish_non_exhaustive()
    }
}

/// Membership of one connection in an [`InterruptGroup`]
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    token: CancellationToken,
}

impl InterruptHandle {
    /// Check if the connection has been interrupted
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the connection is interrupted
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }
}

/// Byte stream that fails once its group interrupts it
pub struct InterruptibleStream {
    inner: BoxedStream,
    token: CancellationToken,
    read_cancel: Pin<Box<WaitForCancellationFutureOwned>>,
    write_cancel: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl InterruptibleStream {
    /// Wrap `inner` under `handle`
    #[must_use]
    pub fn new(inner: BoxedStream, handle: InterruptHandle) -> Self {
        let token = handle.token;
        Self {
            inner,
            read_cancel: Box::pin(token.clone().cancelled_owned()),
            write_cancel: Box::pin(token.clone().cancelled_owned()),
            token,
        }
    }

    fn check(
        token: &CancellationToken,
        cancel: &mut Pin<Box<WaitForCancellationFutureOwned>>,
        cx: &mut Context<'_>,
    ) -> io::Result<()> {
        if token.is_cancelled() || cancel.as_mut().poll(cx).is_ready() {
            return Err(interrupted_error());
        }
        Ok(())
    }
}

impl AsyncRead for InterruptibleStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = Self::check(&this.token, &mut this.read_cancel, cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for InterruptibleStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = Self::check(&this.token, &mut this.write_cancel, cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = Self::check(&this.token, &mut this.write_cancel, cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for InterruptibleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptibleStream")
            .field("interrupted", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Datagram socket that fails once its group interrupts it
pub struct InterruptiblePacket {
    inner: Box<dyn DatagramSocket>,
    handle: InterruptHandle,
}

#[async_trait]
impl DatagramSocket for InterruptiblePacket {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        if self.handle.is_interrupted() {
            return Err(interrupted_error());
        }
        tokio::select! {
            biased;
            () = self.handle.interrupted() => Err(interrupted_error()),
            sent = self.inner.send(buf) => sent,
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.handle.is_interrupted() {
            return Err(interrupted_error());
        }
        tokio::select! {
            biased;
            () = self.handle.interrupted() => Err(interrupted_error()),
            received = self.inner.recv(buf) => received,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_interrupt_internal_only() {
        let group = InterruptGroup::new();
        let (internal, _peer_a) = tokio::io::duplex(64);
        let (external, mut peer_b) = tokio::io::duplex(64);
        let mut internal = group.wrap_stream(Box::new(internal), ConnectionOrigin::Internal);
        let mut external = group.wrap_stream(Box::new(external), ConnectionOrigin::External);

        group.interrupt(false);

        let mut buf = [0u8; 4];
        let err = internal.read(&mut buf).await.unwrap_err();
        assert!(is_interrupted(&err));
        assert!(internal.write_all(b"x").await.is_err());

        peer_b.write_all(b"live").await.unwrap();
        external.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"live");
    }

    #[tokio::test]
    async fn test_interrupt_external() {
        let group = InterruptGroup::new();
        let (external, _peer) = tokio::io::duplex(64);
        let mut external = group.wrap_stream(Box::new(external), ConnectionOrigin::External);

        group.interrupt(true);

        let mut buf = [0u8; 4];
        let err = external.read(&mut buf).await.unwrap_err();
        assert!(is_interrupted(&err));
    }

    #[tokio::test]
    async fn test_interrupt_wakes_blocked_read() {
        let group = std::sync::Arc::new(InterruptGroup::new());
        let (stream, _peer) = tokio::io::duplex(64);
        let mut stream = group.wrap_stream(Box::new(stream), ConnectionOrigin::Internal);

        let trigger = std::sync::Arc::clone(&group);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.interrupt(false);
        });

        let mut buf = [0u8; 4];
        let result = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("read should wake on interrupt");
        assert!(is_interrupted(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn test_new_connections_survive_previous_interrupt() {
        let group = InterruptGroup::new();
        group.interrupt(true);

        let handle = group.handle(ConnectionOrigin::Internal);
        assert!(!handle.is_interrupted());

        let (stream, mut peer) = tokio::io::duplex(64);
        let mut stream = group.wrap_stream(Box::new(stream), ConnectionOrigin::Internal);
        peer.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn test_interrupt_packet() {
        let group = InterruptGroup::new();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(socket.local_addr().unwrap()).await.unwrap();
        let packet = group.wrap_packet(Box::new(socket), ConnectionOrigin::Internal);

        packet.send(b"a").await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(packet.recv(&mut buf).await.unwrap(), 1);

        group.interrupt(false);
        assert!(is_interrupted(&packet.send(b"b").await.unwrap_err()));
        assert!(is_interrupted(&packet.recv(&mut buf).await.unwrap_err()));
    }

    #[test]
    fn test_is_interrupted_rejects_other_errors() {
        let err = io::Error::new(io::ErrorKind::ConnectionAborted, "peer went away");
        assert!(!is_interrupted(&err));
        assert!(is_interrupted(&interrupted_error()));
    }
}
