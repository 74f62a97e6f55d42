//! Interrupt group: forcible eviction of live connections.
//!
//! Every connection the failover group hands out is registered here first.
//! When the selection moves (switch or recovery), the group triggers an
//! interrupt and all matching connections start failing with
//! `ConnectionReset` / [`FailoverError::Interrupted`], prompting callers to
//! re-dial against the new selection.
//!
//! Connections are tracked with an *external* flag derived from the call
//! context. An interrupt normally only evicts internal connections;
//! passing `include_external = true` (the `interrupt_exist_connections`
//! config option) evicts both kinds.
//!
//! Entries deregister themselves when the wrapped connection is dropped, so
//! the table only ever holds live connections.

use crate::error::FailoverError;
use crate::metrics;
use crate::outbound::{BoxFuture, BoxPacketConn, BoxStream, PacketConn, Target};
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct TrackedConn {
    token: CancellationToken,
    external: bool,
}

/// A set of live connections that can be forcibly closed together.
#[derive(Debug)]
pub struct InterruptGroup {
    conns: DashMap<u64, TrackedConn>,
    next_id: AtomicU64,
}

impl InterruptGroup {
    pub fn new() -> Self {
        Self {
            conns: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Wrap a stream connection so a later interrupt can evict it.
    pub fn track_stream(self: &Arc<Self>, conn: BoxStream, external: bool) -> BoxStream {
        let (id, token) = self.insert(external);
        Box::new(InterruptStream {
            inner: conn,
            read_interrupt: Box::pin(token.clone().cancelled_owned()),
            write_interrupt: Box::pin(token.clone().cancelled_owned()),
            token,
            group: Arc::clone(self),
            id,
        })
    }

    /// Wrap a packet connection so a later interrupt can evict it.
    pub fn track_packet(self: &Arc<Self>, conn: BoxPacketConn, external: bool) -> BoxPacketConn {
        let (id, token) = self.insert(external);
        Box::new(InterruptPacketConn {
            inner: conn,
            token,
            group: Arc::clone(self),
            id,
        })
    }

    fn insert(&self, external: bool) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.conns.insert(
            id,
            TrackedConn {
                token: token.clone(),
                external,
            },
        );
        (id, token)
    }

    fn untrack(&self, id: u64) {
        self.conns.remove(&id);
    }

    /// Evict tracked connections. Internal connections are always evicted;
    /// external ones only when `include_external` is set.
    pub fn interrupt(&self, include_external: bool) {
        let mut evicted = 0usize;
        for entry in self.conns.iter() {
            if include_external || !entry.external {
                entry.token.cancel();
                evicted += 1;
            }
        }
        metrics::record_interrupted(evicted);
    }

    /// Evict everything, external connections included. Called on close.
    pub fn close_all(&self) {
        self.interrupt(true);
    }

    /// Number of currently tracked connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl Default for InterruptGroup {
    fn default() -> Self {
        Self::new()
    }
}

fn interrupt_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "connection interrupted by failover")
}

struct InterruptStream {
    inner: BoxStream,
    token: CancellationToken,
    read_interrupt: Pin<Box<dyn Future<Output = ()> + Send>>,
    write_interrupt: Pin<Box<dyn Future<Output = ()> + Send>>,
    group: Arc<InterruptGroup>,
    id: u64,
}

impl fmt::Debug for InterruptStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptStream")
            .field("inner", &self.inner)
            .field("token", &self.token)
            .field("group", &self.group)
            .field("id", &self.id)
            .finish()
    }
}

impl AsyncRead for InterruptStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(interrupt_error()));
        }
        // Register for wakeup on interrupt so a blocked read is evicted too.
        if this.read_interrupt.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(interrupt_error()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for InterruptStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(interrupt_error()));
        }
        if this.write_interrupt.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(interrupt_error()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(interrupt_error()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl Drop for InterruptStream {
    fn drop(&mut self) {
        self.group.untrack(self.id);
    }
}

struct InterruptPacketConn {
    inner: BoxPacketConn,
    token: CancellationToken,
    group: Arc<InterruptGroup>,
    id: u64,
}

impl PacketConn for InterruptPacketConn {
    fn send_to<'a>(&'a self, buf: &'a [u8], destination: &'a Target) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(FailoverError::Interrupted),
                res = self.inner.send_to(buf, destination) => res,
            }
        })
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, (usize, SocketAddr)> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => Err(FailoverError::Interrupted),
                res = self.inner.recv_from(buf) => res,
            }
        })
    }
}

impl Drop for InterruptPacketConn {
    fn drop(&mut self) {
        self.group.untrack(self.id);
    }
}
