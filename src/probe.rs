// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reachability probes used by the recovery loop.
//!
//! A probe dials *through* a candidate outbound and measures whether the
//! handshake completes. Two flavors:
//!
//! - [`url_probe`]: extracts host/port from a configured URL and dials it.
//! - [`tcp_probe`]: plain TCP handshake to a literal address; used with
//!   [`DEFAULT_PROBE_ADDR`] when no URL is configured.
//!
//! Probes only measure connectivity; any resulting connection is dropped
//! immediately. Timeouts are imposed by the caller.

use crate::context::ConnContext;
use crate::error::{FailoverError, Result};
use crate::outbound::{Network, Outbound, Target};
use std::time::{Duration, Instant};

/// Fallback probe target when no recovery URL is configured.
pub const DEFAULT_PROBE_ADDR: &str = "1.1.1.1:443";

/// Probe an outbound, preferring the configured URL over the fallback
/// address. Returns the handshake round-trip time.
pub async fn probe_outbound(
    ctx: &ConnContext,
    outbound: &dyn Outbound,
    recovery_url: Option<&str>,
) -> Result<Duration> {
    match recovery_url {
        Some(url) if !url.is_empty() => url_probe(ctx, outbound, url).await,
        _ => tcp_probe(ctx, outbound, Target::parse(DEFAULT_PROBE_ADDR)?).await,
    }
}

/// Dial the host/port named by `url` through `outbound`.
pub async fn url_probe(ctx: &ConnContext, outbound: &dyn Outbound, url: &str) -> Result<Duration> {
    let target = parse_probe_target(url)?;
    tcp_probe(ctx, outbound, target).await
}

/// TCP handshake to `target` through `outbound`; the connection is dropped
/// as soon as it is established.
pub async fn tcp_probe(
    ctx: &ConnContext,
    outbound: &dyn Outbound,
    target: Target,
) -> Result<Duration> {
    let start = Instant::now();
    let conn = outbound.dial(ctx, Network::Tcp, target).await?;
    drop(conn);
    Ok(start.elapsed())
}

/// Extract a dialable target from a probe URL.
///
/// Accepts `http://` / `https://` URLs (default ports 80 / 443) and bare
/// `host:port` strings.
pub fn parse_probe_target(url: &str) -> Result<Target> {
    let (default_port, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (Some(443), rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (Some(80), rest)
    } else if url.contains("://") {
        return Err(FailoverError::Probe(format!(
            "unsupported probe URL scheme: {url}"
        )));
    } else {
        (None, url)
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(FailoverError::Probe(format!("probe URL has no host: {url}")));
    }

    match Target::parse(authority) {
        Ok(target) => Ok(target),
        Err(_) => match default_port {
            Some(port) => Ok(Target::new(authority, port)),
            None => Err(FailoverError::Probe(format!(
                "probe target has no port: {url}"
            ))),
        },
    }
}
