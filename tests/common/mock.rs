//! Scripted mock outbounds and a recording platform handler.
//!
//! `MockOutbound` answers dials according to a switchable behavior script,
//! records call counts for assertions, and honors call-context cancellation
//! (a hung dial resolves to `Canceled` once the context is canceled).

use failover_group::context::ConnContext;
use failover_group::error::FailoverError;
use failover_group::outbound::{
    BoxFuture, BoxPacketConn, BoxStream, InboundStreamHandler, Network, Outbound, PacketConn,
    Target,
};
use failover_group::platform::PlatformHandler;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How a mock outbound answers the next dial/listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialBehavior {
    /// Return a fresh in-memory stream.
    Succeed,
    /// Fail immediately with a connection error naming the tag.
    Fail,
    /// Block until the call context is canceled, then fail with `Canceled`.
    Hang,
}

/// A scripted candidate outbound.
pub struct MockOutbound {
    tag: String,
    behavior: Mutex<DialBehavior>,
    dials: AtomicUsize,
    listens: AtomicUsize,
    handled_streams: AtomicUsize,
    act_as_handler: bool,
}

impl MockOutbound {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            behavior: Mutex::new(DialBehavior::Succeed),
            dials: AtomicUsize::new(0),
            listens: AtomicUsize::new(0),
            handled_streams: AtomicUsize::new(0),
            act_as_handler: false,
        }
    }

    /// A mock that exposes the inbound stream-handler capability.
    pub fn with_handler_capability(tag: &str) -> Self {
        let mut mock = Self::new(tag);
        mock.act_as_handler = true;
        mock
    }

    pub fn set_behavior(&self, behavior: DialBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn behavior(&self) -> DialBehavior {
        *self.behavior.lock().unwrap()
    }

    /// Number of dial attempts observed.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Number of listen-packet attempts observed.
    pub fn listen_count(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    /// Number of inbound streams handled via the handler capability.
    pub fn handled_stream_count(&self) -> usize {
        self.handled_streams.load(Ordering::SeqCst)
    }
}

impl Outbound for MockOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn networks(&self) -> Vec<Network> {
        vec![Network::Tcp, Network::Udp]
    }

    fn dial<'a>(
        &'a self,
        ctx: &'a ConnContext,
        _network: Network,
        _destination: Target,
    ) -> BoxFuture<'a, BoxStream> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::SeqCst);
            match self.behavior() {
                DialBehavior::Succeed => {
                    let (near, far) = tokio::io::duplex(256);
                    // Keep the far end alive so the connection stays usable.
                    tokio::spawn(async move {
                        let mut far = far;
                        let mut sink = tokio::io::sink();
                        let _ = tokio::io::copy(&mut far, &mut sink).await;
                    });
                    Ok(Box::new(near) as BoxStream)
                }
                DialBehavior::Fail => Err(FailoverError::connection_msg(
                    &self.tag,
                    format!("{} refused the connection", self.tag),
                )),
                DialBehavior::Hang => {
                    ctx.cancelled().await;
                    Err(FailoverError::Canceled)
                }
            }
        })
    }

    fn listen_packet<'a>(
        &'a self,
        ctx: &'a ConnContext,
        _destination: Target,
    ) -> BoxFuture<'a, BoxPacketConn> {
        Box::pin(async move {
            self.listens.fetch_add(1, Ordering::SeqCst);
            match self.behavior() {
                DialBehavior::Succeed => Ok(Box::new(MockPacketConn) as BoxPacketConn),
                DialBehavior::Fail => Err(FailoverError::connection_msg(
                    &self.tag,
                    format!("{} refused the packet flow", self.tag),
                )),
                DialBehavior::Hang => {
                    ctx.cancelled().await;
                    Err(FailoverError::Canceled)
                }
            }
        })
    }

    fn stream_handler(&self) -> Option<&dyn InboundStreamHandler> {
        if self.act_as_handler {
            Some(self)
        } else {
            None
        }
    }
}

impl InboundStreamHandler for MockOutbound {
    fn handle_stream<'a>(
        &'a self,
        _ctx: ConnContext,
        _conn: BoxStream,
        _destination: Target,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.handled_streams.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Packet connection that swallows sends and never receives.
pub struct MockPacketConn;

impl PacketConn for MockPacketConn {
    fn send_to<'a>(&'a self, buf: &'a [u8], _destination: &'a Target) -> BoxFuture<'a, usize> {
        let len = buf.len();
        Box::pin(async move { Ok(len) })
    }

    fn recv_from<'a>(&'a self, _buf: &'a mut [u8]) -> BoxFuture<'a, (usize, SocketAddr)> {
        Box::pin(std::future::pending())
    }
}

/// Platform handler that records every callback for assertions.
#[derive(Default)]
pub struct RecordingPlatform {
    switches: Mutex<Vec<(String, String)>>,
    all_failed: AtomicUsize,
}

impl RecordingPlatform {
    pub fn switches(&self) -> Vec<(String, String)> {
        self.switches.lock().unwrap().clone()
    }

    pub fn all_failed_count(&self) -> usize {
        self.all_failed.load(Ordering::SeqCst)
    }
}

impl PlatformHandler for RecordingPlatform {
    fn on_node_switched(&self, from_tag: &str, to_tag: &str) {
        self.switches
            .lock()
            .unwrap()
            .push((from_tag.to_string(), to_tag.to_string()));
    }

    fn on_all_nodes_failed(&self) {
        self.all_failed.fetch_add(1, Ordering::SeqCst);
    }
}
