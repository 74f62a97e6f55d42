//! Group lifecycle types.
//!
//! # State Transitions
//!
//! ```text
//!              start()              close()
//! Created ──────────────→ Running ──────────→ ShuttingDown
//!    │                                              │
//!    │ close() before start                         │ (probe task drained,
//!    │                                              │  connections evicted)
//!    └──────────────────────→ Stopped ←─────────────┘
//! ```
//!
//! - **Created**: configuration validated, counters zeroed, selection at the
//!   primary; not yet accepting traffic.
//! - **Running**: candidate handles resolved, recovery probe running;
//!   accepts dial/listen calls.
//! - **ShuttingDown**: close in progress; the recovery probe is being
//!   drained with a bounded grace period.
//! - **Stopped**: no further operations accepted; repeated close is a no-op.

/// Lifecycle state of a failover group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Constructed but not started.
    Created,
    /// Started and dispatching traffic.
    Running,
    /// Close in progress.
    ShuttingDown,
    /// Closed; terminal.
    Stopped,
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupState::Created => write!(f, "Created"),
            GroupState::Running => write!(f, "Running"),
            GroupState::ShuttingDown => write!(f, "ShuttingDown"),
            GroupState::Stopped => write!(f, "Stopped"),
        }
    }
}
