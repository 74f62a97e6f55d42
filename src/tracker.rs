// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-outbound health statistics.
//!
//! The tracker keeps one [`OutboundStats`] record per tag: attempt totals,
//! last success/failure timestamps, the last error message, and the
//! consecutive-failure streak. External status reporting reads these to
//! derive a coarse [`OutboundStatus`].
//!
//! Records are created lazily on first reference and never deleted. Counter
//! fields are lock-free atomics; a slightly stale composite read is
//! acceptable (no cross-field consistency is required), but at any quiescent
//! moment `total == success + failure` holds.
//!
//! The status derivation trades tolerance for detection latency: a single
//! consecutive failure already reports **Failed**, because the consuming UI
//! values fast negative signal over false positives.
//!
//! # Usage
//!
//! The host process records through the free functions, which operate on a
//! lazily-initialized process-wide tracker:
//!
//! ```rust
//! use failover_group::tracker;
//!
//! tracker::record_outbound_success("proxy-a");
//! let status = tracker::get_outbound_status("proxy-a");
//! assert_eq!(status.as_i32(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::debug;

/// A success within this window reports Healthy.
const HEALTHY_WINDOW_SECS: i64 = 30;

/// Coarse health status derived from a stats record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OutboundStatus {
    /// No recent signal either way.
    Unknown = 0,
    /// A success was recorded within the last 30 seconds.
    Healthy = 1,
    /// At least one consecutive failure is outstanding.
    Failed = 2,
}

impl OutboundStatus {
    /// Numeric form used by the status wire protocol (0/1/2).
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl std::fmt::Display for OutboundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Derive a status from raw record fields at time `now` (epoch seconds).
///
/// Any outstanding consecutive failure wins, even over a success recorded
/// moments ago; a recent failure without a streak (the record was reset
/// mid-window) is not enough positive signal and stays Unknown.
pub fn derive_status(
    consecutive_failures: u32,
    last_success: i64,
    now: i64,
) -> OutboundStatus {
    if consecutive_failures >= 1 {
        return OutboundStatus::Failed;
    }
    if last_success > 0 && now - last_success < HEALTHY_WINDOW_SECS {
        return OutboundStatus::Healthy;
    }
    OutboundStatus::Unknown
}

/// Statistics for a single outbound tag.
pub struct OutboundStats {
    tag: String,
    total_attempts: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_success: AtomicI64,
    last_failure: AtomicI64,
    consecutive_failures: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl OutboundStats {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            total_attempts: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_success: AtomicI64::new(0),
            last_failure: AtomicI64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// The tag this record belongs to.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Record a successful connection.
    pub fn record_success(&self) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.last_success.store(epoch_seconds(), Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failed connection with an optional error message.
    pub fn record_failure(&self, error: Option<&str>) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(epoch_seconds(), Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = error {
            *self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(error.to_string());
        }
    }

    /// Current derived status.
    pub fn status(&self) -> OutboundStatus {
        derive_status(
            self.consecutive_failures.load(Ordering::Relaxed),
            self.last_success.load(Ordering::Relaxed),
            epoch_seconds(),
        )
    }

    /// Current consecutive-failure streak.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// `(total, success, failure)` attempt counters.
    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.total_attempts.load(Ordering::Relaxed),
            self.success_count.load(Ordering::Relaxed),
            self.failure_count.load(Ordering::Relaxed),
        )
    }

    /// The most recently recorded error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Epoch seconds of the last recorded success (0 = never).
    pub fn last_success_epoch(&self) -> i64 {
        self.last_success.load(Ordering::Relaxed)
    }

    /// Epoch seconds of the last recorded failure (0 = never).
    pub fn last_failure_epoch(&self) -> i64 {
        self.last_failure.load(Ordering::Relaxed)
    }
}

/// Thread-safe map of tag → statistics record.
pub struct OutboundTracker {
    stats: RwLock<HashMap<String, Arc<OutboundStats>>>,
}

impl OutboundTracker {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide tracker, initialized lazily on first use.
    pub fn global() -> &'static OutboundTracker {
        static GLOBAL: OnceLock<OutboundTracker> = OnceLock::new();
        GLOBAL.get_or_init(OutboundTracker::new)
    }

    /// Get or create the record for `tag`.
    ///
    /// Two callers may race on first use of a tag, so the writer path
    /// re-checks under the write lock before inserting.
    pub fn stats(&self, tag: &str) -> Arc<OutboundStats> {
        if let Some(stats) = self
            .stats
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tag)
        {
            return Arc::clone(stats);
        }

        let mut map = self.stats.write().unwrap_or_else(|e| e.into_inner());
        if let Some(stats) = map.get(tag) {
            return Arc::clone(stats);
        }
        let stats = Arc::new(OutboundStats::new(tag));
        map.insert(tag.to_string(), Arc::clone(&stats));
        stats
    }

    /// Number of tracked tags.
    pub fn len(&self) -> usize {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutboundTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Record a successful connection for `tag` on the process-wide tracker.
pub fn record_outbound_success(tag: &str) {
    OutboundTracker::global().stats(tag).record_success();
    debug!(outbound = tag, "connection succeeded");
}

/// Record a failed connection for `tag` on the process-wide tracker.
pub fn record_outbound_failure(tag: &str, error: &dyn std::fmt::Display) {
    let stats = OutboundTracker::global().stats(tag);
    let message = error.to_string();
    stats.record_failure(Some(&message));
    debug!(
        outbound = tag,
        consecutive = stats.consecutive_failures(),
        error = %message,
        "connection failed"
    );
}

/// Current derived status for `tag`.
pub fn get_outbound_status(tag: &str) -> OutboundStatus {
    OutboundTracker::global().stats(tag).status()
}

/// Current consecutive-failure streak for `tag`.
pub fn get_consecutive_failures(tag: &str) -> u32 {
    OutboundTracker::global().stats(tag).consecutive_failures()
}

/// `(total, success, failure)` counters for `tag`.
pub fn get_outbound_stats(tag: &str) -> (u64, u64, u64) {
    OutboundTracker::global().stats(tag).totals()
}

fn epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
