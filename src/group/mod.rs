// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failover outbound group.
//!
//! Routes outbound connection attempts through an ordered list of candidate
//! outbounds, switching away from the active candidate once it accumulates
//! `max_failures` consecutive real-traffic failures and reverting to the
//! primary once the recovery probe sees it answer again.
//!
//! # Architecture
//!
//! ```text
//!                 dial / listen_packet
//!  callers ────────────────┐
//!                          ▼
//!                ┌──────────────────┐   delegates   ┌───────────────┐
//!                │  FailoverGroup   │──────────────►│ outbounds[i]  │
//!                │  selection: i    │               └───────────────┘
//!                │  failures: [n]   │   wraps conns ┌───────────────┐
//!                │                  │──────────────►│ InterruptGroup│
//!                └──────────────────┘               └───────────────┘
//!                          │ switch / all-failed
//!                          ▼
//!                ┌──────────────────┐
//!                │ PlatformHandler  │  (on_node_switched / on_all_nodes_failed)
//!                └──────────────────┘
//! ```
//!
//! A single background task (see [`recovery`]) periodically probes the
//! primary while a non-primary candidate is active and restores selection to
//! index 0 on success.
//!
//! # Failure counting
//!
//! Failures are counted only where the upstream is actually established:
//! `dial` and `listen_packet`. The two operations share one
//! consecutive-failure vector. Per-call cancellation counts as a failure of
//! the selected candidate; inbound handoff does not count at all.

mod recovery;
mod types;

pub use types::GroupState;

use crate::config::FailoverConfig;
use crate::context::ConnContext;
use crate::error::{FailoverError, Result};
use crate::interrupt::InterruptGroup;
use crate::metrics;
use crate::outbound::{
    BoxPacketConn, BoxStream, ConnectionDispatcher, Network, Outbound, OutboundManager, Target,
};
use crate::platform::PlatformHandler;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long `close()` waits for the recovery task before giving up.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Pick the switch successor for `current_idx`.
///
/// Walks the candidate list round-robin starting after `current_idx`,
/// skipping candidates whose consecutive-failure count already reached
/// `max_failures`. Returns `None` when every other candidate is saturated
/// (the all-failed case).
pub fn next_candidate(current_idx: usize, failures: &[u32], max_failures: u32) -> Option<usize> {
    let n = failures.len();
    for k in 1..n {
        let next_idx = (current_idx + k) % n;
        if failures[next_idx] >= max_failures {
            continue;
        }
        return Some(next_idx);
    }
    None
}

/// A failover outbound group.
///
/// Construct with [`new`](Self::new), optionally attach collaborators with
/// the `with_*` builders, then [`start`](Self::start) through an `Arc`.
/// All dispatch methods take `&self` and are safe to call concurrently.
pub struct FailoverGroup {
    tag: String,
    tags: Vec<String>,
    max_failures: u32,
    recovery_interval: Duration,
    recovery_url: Option<String>,
    interrupt_external: bool,

    manager: Arc<dyn OutboundManager>,
    platform: Option<Arc<dyn PlatformHandler>>,
    dispatcher: Option<Arc<dyn ConnectionDispatcher>>,

    /// Engine context; canceled exactly once, at close.
    cancel: CancellationToken,
    /// Written once during start, read-only thereafter.
    outbounds: OnceLock<Vec<Arc<dyn Outbound>>>,
    /// Index of the active candidate.
    selected: AtomicUsize,
    /// One consecutive-failure counter per candidate.
    consecutive_failures: Vec<AtomicU32>,
    /// Serializes switch decisions and recovery-success updates.
    access: Mutex<()>,
    interrupt_group: Arc<InterruptGroup>,

    state_tx: watch::Sender<GroupState>,
    state_rx: watch::Receiver<GroupState>,
    /// Redundant wakeup path for the recovery task alongside `cancel`.
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    probe_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for FailoverGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverGroup")
            .field("tag", &self.tag)
            .field("tags", &self.tags)
            .field("max_failures", &self.max_failures)
            .field("recovery_interval", &self.recovery_interval)
            .field("recovery_url", &self.recovery_url)
            .field("interrupt_external", &self.interrupt_external)
            .field("selected", &self.selected)
            .field("closed", &self.closed)
            .finish()
    }
}

impl FailoverGroup {
    /// Create a new group from configuration.
    ///
    /// Validates the candidate list, applies defaults to `max_failures` and
    /// the recovery interval, and zeroes the failure counters. Tags are
    /// resolved against `manager` later, at [`start`](Self::start).
    pub fn new(
        tag: impl Into<String>,
        config: FailoverConfig,
        manager: Arc<dyn OutboundManager>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(GroupState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consecutive_failures = (0..config.outbounds.len())
            .map(|_| AtomicU32::new(0))
            .collect();

        Ok(Self {
            tag: tag.into(),
            tags: config.outbounds.clone(),
            max_failures: config.max_failures(),
            recovery_interval: config.recovery_interval(),
            recovery_url: config.recovery_url().map(|url| url.to_string()),
            interrupt_external: config.interrupt_exist_connections,
            manager,
            platform: None,
            dispatcher: None,
            cancel: CancellationToken::new(),
            outbounds: OnceLock::new(),
            selected: AtomicUsize::new(0),
            consecutive_failures,
            access: Mutex::new(()),
            interrupt_group: Arc::new(InterruptGroup::new()),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            probe_handle: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Attach the platform callback handler.
    pub fn with_platform(mut self, platform: Arc<dyn PlatformHandler>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Attach the generic connection dispatcher used for inbound handoff.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ConnectionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Derive the engine context from a caller-supplied parent token.
    ///
    /// Canceling the parent closes in-flight work exactly as `close()` does.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Resolve candidate tags and launch the recovery probe task.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() != GroupState::Created {
            return Err(FailoverError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        let mut resolved: Vec<Arc<dyn Outbound>> = Vec::with_capacity(self.tags.len());
        for (index, tag) in self.tags.iter().enumerate() {
            let outbound =
                self.manager
                    .outbound(tag)
                    .ok_or_else(|| FailoverError::OutboundNotFound {
                        index,
                        tag: tag.clone(),
                    })?;
            resolved.push(outbound);
        }

        self.outbounds
            .set(resolved)
            .map_err(|_| FailoverError::InvalidState {
                expected: "Created".to_string(),
                actual: "started".to_string(),
            })?;
        self.selected.store(0, Ordering::Release);

        let group = Arc::clone(self);
        let handle = tokio::spawn(async move { recovery::run(group).await });
        *self
            .probe_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let _ = self.state_tx.send(GroupState::Running);
        metrics::set_group_state("Running");
        info!(
            group = %self.tag,
            outbounds = self.tags.len(),
            primary = %self.tags[0],
            "failover started"
        );
        Ok(())
    }

    /// Establish a stream connection through the active candidate.
    ///
    /// On success the candidate's failure streak resets and the returned
    /// connection is registered with the interrupt group. On failure the
    /// streak grows; reaching `max_failures` triggers a switch and a single
    /// retry against the new selection. If that retry fails too, the
    /// *original* error is returned.
    pub async fn dial(
        &self,
        ctx: &ConnContext,
        network: Network,
        destination: Target,
    ) -> Result<BoxStream> {
        let outbounds = self
            .outbounds
            .get()
            .ok_or(FailoverError::NoAvailableOutbound)?;
        let idx = self.selected.load(Ordering::Acquire);
        if idx >= outbounds.len() {
            return Err(FailoverError::NoAvailableOutbound);
        }
        let selected = &outbounds[idx];

        match selected.dial(ctx, network, destination.clone()).await {
            Ok(conn) => {
                self.consecutive_failures[idx].store(0, Ordering::Release);
                metrics::record_dial(selected.tag(), true);
                Ok(self.interrupt_group.track_stream(conn, ctx.is_external()))
            }
            Err(err) => {
                let failures = self.record_delegate_failure(idx, selected.tag(), "dial", &err);
                if let Some(retry_idx) = self.switch_if_saturated(idx, failures, outbounds.len())
                {
                    let retry = &outbounds[retry_idx];
                    match retry.dial(ctx, network, destination).await {
                        Ok(conn) => {
                            self.consecutive_failures[retry_idx].store(0, Ordering::Release);
                            metrics::record_dial(retry.tag(), true);
                            return Ok(self
                                .interrupt_group
                                .track_stream(conn, ctx.is_external()));
                        }
                        Err(retry_err) => {
                            self.consecutive_failures[retry_idx].fetch_add(1, Ordering::AcqRel);
                            metrics::record_dial(retry.tag(), false);
                            debug!(
                                outbound = retry.tag(),
                                error = %retry_err,
                                "retry after switch failed"
                            );
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Open a packet flow through the active candidate.
    ///
    /// Semantically identical to [`dial`](Self::dial); both operations share
    /// the same consecutive-failure vector.
    pub async fn listen_packet(
        &self,
        ctx: &ConnContext,
        destination: Target,
    ) -> Result<BoxPacketConn> {
        let outbounds = self
            .outbounds
            .get()
            .ok_or(FailoverError::NoAvailableOutbound)?;
        let idx = self.selected.load(Ordering::Acquire);
        if idx >= outbounds.len() {
            return Err(FailoverError::NoAvailableOutbound);
        }
        let selected = &outbounds[idx];

        match selected.listen_packet(ctx, destination.clone()).await {
            Ok(conn) => {
                self.consecutive_failures[idx].store(0, Ordering::Release);
                metrics::record_dial(selected.tag(), true);
                Ok(self.interrupt_group.track_packet(conn, ctx.is_external()))
            }
            Err(err) => {
                let failures =
                    self.record_delegate_failure(idx, selected.tag(), "listen packet", &err);
                if let Some(retry_idx) = self.switch_if_saturated(idx, failures, outbounds.len())
                {
                    let retry = &outbounds[retry_idx];
                    match retry.listen_packet(ctx, destination).await {
                        Ok(conn) => {
                            self.consecutive_failures[retry_idx].store(0, Ordering::Release);
                            metrics::record_dial(retry.tag(), true);
                            return Ok(self
                                .interrupt_group
                                .track_packet(conn, ctx.is_external()));
                        }
                        Err(retry_err) => {
                            self.consecutive_failures[retry_idx].fetch_add(1, Ordering::AcqRel);
                            metrics::record_dial(retry.tag(), false);
                            debug!(
                                outbound = retry.tag(),
                                error = %retry_err,
                                "retry after switch failed"
                            );
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Count a delegate failure and log it; returns the new streak value.
    fn record_delegate_failure(
        &self,
        idx: usize,
        tag: &str,
        operation: &str,
        err: &FailoverError,
    ) -> u32 {
        let failures = self.consecutive_failures[idx].fetch_add(1, Ordering::AcqRel) + 1;
        metrics::record_dial(tag, false);
        warn!(
            outbound = tag,
            failures,
            max_failures = self.max_failures,
            error = %err,
            "outbound {operation} failed"
        );
        failures
    }

    /// If `failures` reached the threshold, switch away from `idx` and
    /// report the index to retry against (when it differs from `idx` and is
    /// in range).
    fn switch_if_saturated(&self, idx: usize, failures: u32, len: usize) -> Option<usize> {
        if failures < self.max_failures {
            return None;
        }
        self.switch_to_next(idx);
        let new_idx = self.selected.load(Ordering::Acquire);
        (new_idx != idx && new_idx < len).then_some(new_idx)
    }

    /// Move selection off `current_idx`.
    ///
    /// Walks the list round-robin, skipping candidates whose streak already
    /// reached the threshold. When no successor remains, every counter is
    /// reset, selection returns to the primary, and the all-failed callback
    /// fires. Either way the selection store happens before the interrupt
    /// trigger, and the platform callback fires exactly once per event,
    /// under the lock, after the store.
    fn switch_to_next(&self, current_idx: usize) {
        let _guard = self.access.lock().unwrap_or_else(|e| e.into_inner());

        let from_tag = &self.tags[current_idx];
        let failures: Vec<u32> = self
            .consecutive_failures
            .iter()
            .map(|counter| counter.load(Ordering::Acquire))
            .collect();

        match next_candidate(current_idx, &failures, self.max_failures) {
            Some(next_idx) => {
                let to_tag = &self.tags[next_idx];
                self.selected.store(next_idx, Ordering::Release);
                warn!(from = %from_tag, to = %to_tag, "switched outbound");
                metrics::record_switch(from_tag, to_tag);
                self.interrupt_group.interrupt(self.interrupt_external);
                match &self.platform {
                    Some(platform) => platform.on_node_switched(from_tag, to_tag),
                    None => error!(
                        from = %from_tag,
                        to = %to_tag,
                        "no platform handler registered, node switch not delivered"
                    ),
                }
            }
            None => {
                error!("all outbounds failed, resetting and retrying from primary");
                for counter in &self.consecutive_failures {
                    counter.store(0, Ordering::Release);
                }
                self.selected.store(0, Ordering::Release);
                metrics::record_all_failed();
                self.interrupt_group.interrupt(self.interrupt_external);
                match &self.platform {
                    Some(platform) => platform.on_all_nodes_failed(),
                    None => {
                        error!("no platform handler registered, all-nodes-failed not delivered")
                    }
                }
            }
        }
    }

    /// Restore selection to the primary after a successful recovery probe.
    ///
    /// Deliberately does not fire `on_node_switched`: recovery is an
    /// expected transition and is signaled only in logs.
    pub(crate) fn restore_primary(&self) {
        {
            let _guard = self.access.lock().unwrap_or_else(|e| e.into_inner());
            self.selected.store(0, Ordering::Release);
            self.consecutive_failures[0].store(0, Ordering::Release);
        }
        info!(outbound = %self.tags[0], "primary outbound recovered, switching back");
        metrics::record_recovery(&self.tags[0]);
        self.interrupt_group.interrupt(self.interrupt_external);
    }

    /// Hand an inbound stream to the active candidate.
    ///
    /// The context is flagged external first, so a later switch only evicts
    /// this connection when `interrupt_exist_connections` is set. Handoff
    /// does not participate in failure counting.
    pub async fn handle_inbound_stream(
        &self,
        ctx: &ConnContext,
        conn: BoxStream,
        destination: Target,
    ) -> Result<()> {
        let ctx = ctx.as_external();
        let Some(selected) = self.selected_outbound() else {
            // Dropping the inbound closes it.
            return Err(FailoverError::NoAvailableOutbound);
        };
        if let Some(handler) = selected.stream_handler() {
            return handler.handle_stream(ctx, conn, destination).await;
        }
        match &self.dispatcher {
            Some(dispatcher) => {
                dispatcher
                    .dispatch_stream(ctx, Arc::clone(&selected), conn, destination)
                    .await
            }
            None => Err(FailoverError::Internal(
                "no connection dispatcher registered".to_string(),
            )),
        }
    }

    /// Hand an inbound packet connection to the active candidate.
    pub async fn handle_inbound_packet(
        &self,
        ctx: &ConnContext,
        conn: BoxPacketConn,
        destination: Target,
    ) -> Result<()> {
        let ctx = ctx.as_external();
        let Some(selected) = self.selected_outbound() else {
            return Err(FailoverError::NoAvailableOutbound);
        };
        if let Some(handler) = selected.packet_handler() {
            return handler.handle_packet(ctx, conn, destination).await;
        }
        match &self.dispatcher {
            Some(dispatcher) => {
                dispatcher
                    .dispatch_packet(ctx, Arc::clone(&selected), conn, destination)
                    .await
            }
            None => Err(FailoverError::Internal(
                "no connection dispatcher registered".to_string(),
            )),
        }
    }

    /// Close the group.
    ///
    /// Idempotent: the first call cancels the engine context, signals the
    /// recovery task over the close channel, waits up to 3 seconds for it to
    /// drain, then evicts every tracked connection. Repeat calls return
    /// immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.state_tx.send(GroupState::ShuttingDown);
        metrics::set_group_state("ShuttingDown");

        self.cancel.cancel();
        let _ = self.shutdown_tx.send(true);

        let handle = self
            .probe_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            match tokio::time::timeout(CLOSE_GRACE, handle).await {
                Ok(Ok(())) => debug!(group = %self.tag, "recovery task exited cleanly"),
                Ok(Err(e)) => warn!(group = %self.tag, error = %e, "recovery task panicked"),
                Err(_) => warn!(group = %self.tag, "recovery task exit timeout"),
            }
        }

        self.interrupt_group.close_all();
        let _ = self.state_tx.send(GroupState::Stopped);
        metrics::set_group_state("Stopped");
        info!(group = %self.tag, "failover group closed");
    }

    /// This group's own tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Tag of the active candidate (the primary's tag before start).
    pub fn now(&self) -> &str {
        let idx = self.selected.load(Ordering::Acquire);
        if self.outbounds.get().is_some() && idx < self.tags.len() {
            &self.tags[idx]
        } else {
            &self.tags[0]
        }
    }

    /// All candidate tags in order.
    pub fn all(&self) -> &[String] {
        &self.tags
    }

    /// Networks supported by the active candidate (both before start).
    pub fn networks(&self) -> Vec<Network> {
        match self.selected_outbound() {
            Some(outbound) => outbound.networks(),
            None => vec![Network::Tcp, Network::Udp],
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> GroupState {
        *self.state_rx.borrow()
    }

    /// Whether the group is accepting traffic.
    pub fn is_running(&self) -> bool {
        self.state() == GroupState::Running
    }

    /// Current selection index.
    pub fn selected_index(&self) -> usize {
        self.selected.load(Ordering::Acquire)
    }

    /// Consecutive-failure streak for the candidate at `idx`.
    pub fn failure_streak(&self, idx: usize) -> u32 {
        self.consecutive_failures[idx].load(Ordering::Acquire)
    }

    /// The engine cancellation token. Callers derive per-call contexts from
    /// it when in-flight dials should abort on close.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Interrupt group tracking this group's live connections.
    pub fn interrupt_group(&self) -> &Arc<InterruptGroup> {
        &self.interrupt_group
    }

    fn selected_outbound(&self) -> Option<Arc<dyn Outbound>> {
        let outbounds = self.outbounds.get()?;
        let idx = self.selected.load(Ordering::Acquire);
        outbounds.get(idx).map(Arc::clone)
    }

    pub(crate) fn resolved_outbounds(&self) -> Option<&[Arc<dyn Outbound>]> {
        self.outbounds.get().map(|v| v.as_slice())
    }

    pub(crate) fn recovery_interval(&self) -> Duration {
        self.recovery_interval
    }

    pub(crate) fn recovery_url(&self) -> Option<&str> {
        self.recovery_url.as_deref()
    }

    pub(crate) fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::OutboundRegistry;

    fn registry() -> Arc<OutboundRegistry> {
        Arc::new(OutboundRegistry::new())
    }

    #[test]
    fn test_new_rejects_empty_outbounds() {
        let config = FailoverConfig::default();
        let err = FailoverGroup::new("failover", config, registry()).unwrap_err();
        assert!(matches!(err, FailoverError::Config(_)));
        assert!(err.to_string().contains("missing outbounds"));
    }

    #[test]
    fn test_new_applies_defaults() {
        let config = FailoverConfig {
            outbounds: vec!["a".into(), "b".into()],
            max_failures: 0,
            recovery_interval: String::new(),
            ..Default::default()
        };
        let group = FailoverGroup::new("failover", config, registry()).unwrap();
        assert_eq!(group.max_failures, 3);
        assert_eq!(group.recovery_interval(), Duration::from_secs(300));
        assert_eq!(group.state(), GroupState::Created);
        assert_eq!(group.selected_index(), 0);
    }

    #[test]
    fn test_accessors_before_start() {
        let config = FailoverConfig::for_testing(&["a", "b"]);
        let group = FailoverGroup::new("failover", config, registry()).unwrap();
        assert_eq!(group.now(), "a");
        assert_eq!(group.all(), &["a".to_string(), "b".to_string()]);
        assert_eq!(group.networks(), vec![Network::Tcp, Network::Udp]);
        assert!(!group.is_running());
    }

    #[tokio::test]
    async fn test_start_unknown_tag_fails() {
        let config = FailoverConfig::for_testing(&["a", "ghost"]);
        let registry = registry();
        registry.register(Arc::new(crate::outbound::DirectOutbound::new("a")));

        let group = Arc::new(FailoverGroup::new("failover", config, registry).unwrap());
        let err = group.start().unwrap_err();
        assert_eq!(err.to_string(), "outbound 1 not found: ghost");
    }

    #[tokio::test]
    async fn test_dial_before_start_is_rejected() {
        let config = FailoverConfig::for_testing(&["a"]);
        let group = FailoverGroup::new("failover", config, registry()).unwrap();
        let result = group
            .dial(&ConnContext::new(), Network::Tcp, Target::new("h", 80))
            .await;
        assert!(matches!(result, Err(FailoverError::NoAvailableOutbound)));
    }

    #[tokio::test]
    async fn test_close_before_start_is_noop() {
        let config = FailoverConfig::for_testing(&["a"]);
        let group = FailoverGroup::new("failover", config, registry()).unwrap();
        group.close().await;
        group.close().await;
        assert_eq!(group.state(), GroupState::Stopped);
    }

    #[test]
    fn test_next_candidate_skips_saturated() {
        // Candidate 1 is saturated, candidate 2 is the successor.
        assert_eq!(next_candidate(0, &[3, 3, 0], 3), Some(2));
        // Immediate neighbor is fine.
        assert_eq!(next_candidate(0, &[3, 0, 0], 3), Some(1));
        // Wraps around past the end.
        assert_eq!(next_candidate(2, &[0, 3, 3], 3), Some(0));
    }

    #[test]
    fn test_next_candidate_all_saturated() {
        assert_eq!(next_candidate(0, &[3, 3, 3], 3), None);
        assert_eq!(next_candidate(1, &[5, 5], 3), None);
    }

    #[test]
    fn test_next_candidate_single_entry() {
        // With one candidate there is no successor to walk to.
        assert_eq!(next_candidate(0, &[2], 3), None);
    }
}
