//! Primary recovery probe.
//!
//! A single task launched at start and running until close. Each tick it
//! checks whether a non-primary candidate is active, and if so probes the
//! primary through its own outbound with a short timeout. On success the
//! selection reverts to index 0 and existing non-primary connections are
//! interrupted.
//!
//! The probe timeout (3 s) is short compared to the default 5 minute
//! interval: probes are cheap but bounded, never starving real traffic.
//! Probe failures are swallowed (logged at debug) and leave selection
//! unchanged. Recovery never fires `on_node_switched`.

use super::FailoverGroup;
use crate::context::ConnContext;
use crate::metrics;
use crate::probe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Per-probe deadline.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Recovery loop body; exits on close or engine-context cancellation.
pub(crate) async fn run(group: Arc<FailoverGroup>) {
    let period = group.recovery_interval();
    let mut shutdown_rx = group.shutdown_receiver();
    // First tick one full period from now, not immediately.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = group.cancel_token().cancelled() => {
                debug!(group = %group.tag(), "recovery loop exiting (context canceled)");
                return;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!(group = %group.tag(), "recovery loop exiting (close signal)");
                    return;
                }
            }
            _ = ticker.tick() => {
                if group.cancel_token().is_cancelled() {
                    return;
                }
                probe_primary(&group).await;
            }
        }
    }
}

/// One probe round: test the primary and restore it on success.
async fn probe_primary(group: &FailoverGroup) {
    if group.selected_index() == 0 {
        return;
    }
    let Some(outbounds) = group.resolved_outbounds() else {
        return;
    };
    let Some(primary) = outbounds.first() else {
        return;
    };

    let ctx = ConnContext::with_parent(group.cancel_token());
    let result = tokio::time::timeout(
        PROBE_TIMEOUT,
        probe::probe_outbound(&ctx, primary.as_ref(), group.recovery_url()),
    )
    .await;

    // The group may have closed while the probe was in flight; in that case
    // abandon without touching selection.
    if group.cancel_token().is_cancelled() {
        return;
    }

    match result {
        Ok(Ok(latency)) => {
            metrics::record_probe(primary.tag(), true);
            metrics::record_probe_latency(primary.tag(), latency);
            group.restore_primary();
        }
        Ok(Err(err)) => {
            metrics::record_probe(primary.tag(), false);
            debug!(outbound = primary.tag(), error = %err, "primary probe failed");
        }
        Err(_) => {
            metrics::record_probe(primary.tag(), false);
            debug!(
                outbound = primary.tag(),
                timeout_ms = PROBE_TIMEOUT.as_millis() as u64,
                "primary probe timed out"
            );
        }
    }
}
