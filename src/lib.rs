//! # Failover Outbound Group
//!
//! A network-dispatch component that routes outbound connection attempts
//! (TCP streams and UDP packet flows) through an ordered list of candidate
//! upstream outbounds, automatically switching when the active candidate
//! accumulates consecutive real-traffic failures, and automatically
//! reverting to the preferred primary once it has demonstrably recovered.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           failover-group                             │
//! │                                                                      │
//! │  ┌───────────────┐   selects    ┌──────────────────────────────────┐ │
//! │  │ FailoverGroup │─────────────►│ [O_0 primary, O_1, ..., O_n-1]   │ │
//! │  │ dial/listen   │              │ (Outbound trait objects)         │ │
//! │  └───────┬───────┘              └──────────────────────────────────┘ │
//! │          │ wraps connections                                         │
//! │          ▼                                                           │
//! │  ┌───────────────┐   evicts on switch/recovery                       │
//! │  │ InterruptGroup│◄──────────────────────────────┐                   │
//! │  └───────────────┘                               │                   │
//! │  ┌───────────────┐   probes primary    ┌─────────┴────────┐          │
//! │  │ Recovery task │────────────────────►│ switch decisions │          │
//! │  └───────────────┘                     └──────────────────┘          │
//! │                                                                      │
//! │  ┌───────────────┐  per-tag success/failure statistics               │
//! │  │OutboundTracker│  (consumed by external status reporting)          │
//! │  └───────────────┘                                                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use failover_group::{ConnContext, FailoverConfig, FailoverGroup, OutboundRegistry};
//! use failover_group::outbound::{DirectOutbound, Network, Target};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> failover_group::Result<()> {
//!     let registry = Arc::new(OutboundRegistry::new());
//!     registry.register(Arc::new(DirectOutbound::new("proxy-a")));
//!     registry.register(Arc::new(DirectOutbound::new("proxy-b")));
//!
//!     let config = FailoverConfig {
//!         outbounds: vec!["proxy-a".into(), "proxy-b".into()],
//!         ..Default::default()
//!     };
//!     let group = Arc::new(FailoverGroup::new("failover", config, registry)?);
//!     group.start()?;
//!
//!     let ctx = ConnContext::with_parent(group.cancel_token());
//!     let conn = group.dial(&ctx, Network::Tcp, Target::new("example.com", 443)).await?;
//!     drop(conn);
//!
//!     group.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod interrupt;
pub mod metrics;
pub mod outbound;
pub mod platform;
pub mod probe;
pub mod tracker;

// Re-exports for convenience
pub use config::FailoverConfig;
pub use context::ConnContext;
pub use error::{FailoverError, Result};
pub use group::{FailoverGroup, GroupState};
pub use interrupt::InterruptGroup;
pub use outbound::{
    BoxPacketConn, BoxStream, DirectOutbound, Network, Outbound, OutboundManager,
    OutboundRegistry, Target,
};
pub use platform::PlatformHandler;
pub use tracker::{OutboundStatus, OutboundTracker};
