//! Outbound abstractions: the candidate interface and its registry.
//!
//! Every candidate the failover group can route through implements
//! [`Outbound`]. The trait is dyn-compatible; async operations are expressed
//! as [`BoxFuture`]-returning methods so candidates can live behind
//! `Arc<dyn Outbound>`.
//!
//! The optional connection-handler capabilities
//! ([`Outbound::stream_handler`] / [`Outbound::packet_handler`]) are
//! runtime-detected: a candidate that can terminate inbound connections
//! itself returns `Some`, and the group hands inbounds to it directly
//! instead of going through the generic [`ConnectionDispatcher`].
//!
//! # Example
//!
//! ```rust,no_run
//! use failover_group::outbound::{DirectOutbound, Outbound, OutboundRegistry, Target, Network};
//! use failover_group::context::ConnContext;
//! use std::sync::Arc;
//!
//! # async fn example() -> failover_group::Result<()> {
//! let registry = OutboundRegistry::new();
//! registry.register(Arc::new(DirectOutbound::new("direct")));
//!
//! let outbound = registry.get("direct").unwrap();
//! let ctx = ConnContext::new();
//! let conn = outbound.dial(&ctx, Network::Tcp, Target::new("example.com", 443)).await?;
//! # drop(conn);
//! # Ok(())
//! # }
//! ```

use crate::context::ConnContext;
use crate::error::{FailoverError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Transport network for a dial request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    /// Wire name of the network ("tcp" / "udp").
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection target: host (domain or IP literal) plus port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`. IPv6 literals use brackets: `[::1]:443`.
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| FailoverError::Config(format!("invalid target address: {s}")))?;
            let host = &rest[..end];
            let port = rest[end + 1..]
                .strip_prefix(':')
                .ok_or_else(|| FailoverError::Config(format!("invalid target address: {s}")))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| FailoverError::Config(format!("invalid target address: {s}")))?
        };
        let port = port
            .parse::<u16>()
            .map_err(|_| FailoverError::Config(format!("invalid port in target address: {s}")))?;
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Combined trait for async stream connections returned by `dial`.
pub trait OutboundStream: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {}

impl<T> OutboundStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {}

/// Boxed stream connection.
pub type BoxStream = Box<dyn OutboundStream>;

/// A datagram flow returned by `listen_packet`.
///
/// Implementations take `&self`; sockets with `&self` I/O (like
/// `tokio::net::UdpSocket`) map directly, others use interior mutability.
pub trait PacketConn: Send + Sync {
    /// Send one datagram to `destination`, returning the bytes written.
    fn send_to<'a>(&'a self, buf: &'a [u8], destination: &'a Target) -> BoxFuture<'a, usize>;

    /// Receive one datagram into `buf`, returning size and peer address.
    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, (usize, SocketAddr)>;
}

/// Boxed packet connection.
pub type BoxPacketConn = Box<dyn PacketConn>;

/// Capability: a candidate that can terminate inbound stream connections
/// itself (e.g. another group, or a protocol with its own connection
/// pipeline).
pub trait InboundStreamHandler: Send + Sync {
    fn handle_stream<'a>(
        &'a self,
        ctx: ConnContext,
        conn: BoxStream,
        destination: Target,
    ) -> BoxFuture<'a, ()>;
}

/// Capability: a candidate that can terminate inbound packet connections
/// itself.
pub trait InboundPacketHandler: Send + Sync {
    fn handle_packet<'a>(
        &'a self,
        ctx: ConnContext,
        conn: BoxPacketConn,
        destination: Target,
    ) -> BoxFuture<'a, ()>;
}

/// One upstream candidate the failover group can route through.
///
/// `dial` and `listen_packet` must honor cancellation via the supplied
/// context; the group counts any error they return (including
/// [`FailoverError::Canceled`]) toward the candidate's consecutive-failure
/// budget.
pub trait Outbound: Send + Sync {
    /// Unique tag of this outbound.
    fn tag(&self) -> &str;

    /// Networks this outbound supports.
    fn networks(&self) -> Vec<Network>;

    /// Establish a stream connection to `destination`.
    fn dial<'a>(
        &'a self,
        ctx: &'a ConnContext,
        network: Network,
        destination: Target,
    ) -> BoxFuture<'a, BoxStream>;

    /// Open a packet flow toward `destination`.
    fn listen_packet<'a>(
        &'a self,
        ctx: &'a ConnContext,
        destination: Target,
    ) -> BoxFuture<'a, BoxPacketConn>;

    /// Runtime-detected capability: terminate inbound streams directly.
    fn stream_handler(&self) -> Option<&dyn InboundStreamHandler> {
        None
    }

    /// Runtime-detected capability: terminate inbound packet flows directly.
    fn packet_handler(&self) -> Option<&dyn InboundPacketHandler> {
        None
    }
}

/// Generic connection pipeline for inbound handoff.
///
/// When the selected candidate has no handler capability of its own, the
/// group passes the inbound connection together with the candidate to this
/// dispatcher, which owns relaying bytes between the two sides.
pub trait ConnectionDispatcher: Send + Sync {
    fn dispatch_stream<'a>(
        &'a self,
        ctx: ConnContext,
        outbound: Arc<dyn Outbound>,
        conn: BoxStream,
        destination: Target,
    ) -> BoxFuture<'a, ()>;

    fn dispatch_packet<'a>(
        &'a self,
        ctx: ConnContext,
        outbound: Arc<dyn Outbound>,
        conn: BoxPacketConn,
        destination: Target,
    ) -> BoxFuture<'a, ()>;
}

/// Lookup interface the group uses to resolve tags at start.
pub trait OutboundManager: Send + Sync {
    /// Resolve a tag to a live outbound handle.
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>>;

    /// The process default outbound, if one is designated.
    fn default_outbound(&self) -> Option<Arc<dyn Outbound>>;
}

/// Concurrent tag-keyed registry of outbound handles.
pub struct OutboundRegistry {
    outbounds: DashMap<String, Arc<dyn Outbound>>,
    default_tag: std::sync::RwLock<Option<String>>,
}

impl OutboundRegistry {
    pub fn new() -> Self {
        Self {
            outbounds: DashMap::new(),
            default_tag: std::sync::RwLock::new(None),
        }
    }

    /// Register an outbound under its own tag. Replaces any previous entry.
    pub fn register(&self, outbound: Arc<dyn Outbound>) {
        self.outbounds.insert(outbound.tag().to_string(), outbound);
    }

    /// Look up an outbound by tag.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.outbounds.get(tag).map(|r| Arc::clone(r.value()))
    }

    /// Remove an outbound by tag.
    pub fn remove(&self, tag: &str) {
        self.outbounds.remove(tag);
    }

    /// Designate the default outbound by tag.
    pub fn set_default(&self, tag: impl Into<String>) {
        *self
            .default_tag
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(tag.into());
    }

    /// Number of registered outbounds.
    pub fn len(&self) -> usize {
        self.outbounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbounds.is_empty()
    }
}

impl Default for OutboundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundManager for OutboundRegistry {
    fn outbound(&self, tag: &str) -> Option<Arc<dyn Outbound>> {
        self.get(tag)
    }

    fn default_outbound(&self) -> Option<Arc<dyn Outbound>> {
        let tag = self
            .default_tag
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        self.get(&tag)
    }
}

/// Plain direct dialer: TCP streams and UDP sockets with no proxying.
pub struct DirectOutbound {
    tag: String,
}

impl DirectOutbound {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl Outbound for DirectOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn networks(&self) -> Vec<Network> {
        vec![Network::Tcp, Network::Udp]
    }

    fn dial<'a>(
        &'a self,
        ctx: &'a ConnContext,
        network: Network,
        destination: Target,
    ) -> BoxFuture<'a, BoxStream> {
        Box::pin(async move {
            if network != Network::Tcp {
                return Err(FailoverError::connection_msg(
                    &self.tag,
                    format!("direct outbound does not dial {network} streams"),
                ));
            }
            let stream = tokio::select! {
                _ = ctx.cancelled() => return Err(FailoverError::Canceled),
                res = TcpStream::connect((destination.host.as_str(), destination.port)) => {
                    res.map_err(|e| FailoverError::connection(&self.tag, e))?
                }
            };
            Ok(Box::new(stream) as BoxStream)
        })
    }

    fn listen_packet<'a>(
        &'a self,
        ctx: &'a ConnContext,
        _destination: Target,
    ) -> BoxFuture<'a, BoxPacketConn> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(FailoverError::Canceled);
            }
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| FailoverError::connection(&self.tag, e))?;
            Ok(Box::new(DirectPacketConn {
                tag: self.tag.clone(),
                socket,
            }) as BoxPacketConn)
        })
    }
}

struct DirectPacketConn {
    tag: String,
    socket: UdpSocket,
}

impl PacketConn for DirectPacketConn {
    fn send_to<'a>(&'a self, buf: &'a [u8], destination: &'a Target) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            self.socket
                .send_to(buf, (destination.host.as_str(), destination.port))
                .await
                .map_err(|e| FailoverError::connection(&self.tag, e))
        })
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> BoxFuture<'a, (usize, SocketAddr)> {
        Box::pin(async move {
            self.socket
                .recv_from(buf)
                .await
                .map_err(|e| FailoverError::connection(&self.tag, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_as_str() {
        assert_eq!(Network::Tcp.as_str(), "tcp");
        assert_eq!(Network::Udp.as_str(), "udp");
        assert_eq!(Network::Tcp.to_string(), "tcp");
    }

    #[test]
    fn test_target_parse_host_port() {
        let target = Target::parse("example.com:443").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.to_string(), "example.com:443");
    }

    #[test]
    fn test_target_parse_ipv6() {
        let target = Target::parse("[::1]:8080").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.to_string(), "[::1]:8080");
    }

    #[test]
    fn test_target_parse_invalid() {
        assert!(Target::parse("no-port").is_err());
        assert!(Target::parse("host:notaport").is_err());
        assert!(Target::parse("[::1]8080").is_err());
    }

    #[test]
    fn test_registry_register_and_get() {
        let registry = OutboundRegistry::new();
        registry.register(Arc::new(DirectOutbound::new("direct")));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("direct").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_remove() {
        let registry = OutboundRegistry::new();
        registry.register(Arc::new(DirectOutbound::new("direct")));
        registry.remove("direct");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_default_outbound() {
        let registry = OutboundRegistry::new();
        assert!(registry.default_outbound().is_none());

        registry.register(Arc::new(DirectOutbound::new("direct")));
        registry.set_default("direct");
        let default = registry.default_outbound().unwrap();
        assert_eq!(default.tag(), "direct");
    }

    #[tokio::test]
    async fn test_direct_outbound_dial_local() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let outbound = DirectOutbound::new("direct");
        let ctx = ConnContext::new();
        let conn = outbound
            .dial(&ctx, Network::Tcp, Target::new("127.0.0.1", addr.port()))
            .await;
        assert!(conn.is_ok());
    }

    #[tokio::test]
    async fn test_direct_outbound_dial_canceled() {
        let outbound = DirectOutbound::new("direct");
        let ctx = ConnContext::new();
        ctx.cancel();
        // A canceled context aborts the dial even if the target would accept.
        let result = outbound
            .dial(&ctx, Network::Tcp, Target::new("127.0.0.1", 1))
            .await;
        assert!(matches!(
            result,
            Err(FailoverError::Canceled) | Err(FailoverError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_direct_outbound_rejects_udp_stream() {
        let outbound = DirectOutbound::new("direct");
        let ctx = ConnContext::new();
        let result = outbound
            .dial(&ctx, Network::Udp, Target::new("127.0.0.1", 53))
            .await;
        assert!(matches!(result, Err(FailoverError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_direct_outbound_packet_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        let outbound = DirectOutbound::new("direct");
        let ctx = ConnContext::new();
        let conn = outbound
            .listen_packet(&ctx, Target::new("127.0.0.1", server_addr.port()))
            .await
            .unwrap();

        let destination = Target::new("127.0.0.1", server_addr.port());
        let sent = conn.send_to(b"ping", &destination).await.unwrap();
        assert_eq!(sent, 4);

        let mut buf = [0u8; 16];
        let (len, peer) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");

        server.send_to(b"pong", peer).await.unwrap();
        let (len, _) = conn.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"pong");
    }
}
