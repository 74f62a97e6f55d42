//! Platform callback interface.
//!
//! Hosts embedding the failover group (typically a UI frontend) register a
//! [`PlatformHandler`] to be told about selection changes:
//!
//! - [`on_node_switched`](PlatformHandler::on_node_switched) fires after
//!   every switch to a *different* candidate, exactly once per switch event
//!   and only after the new selection is globally visible.
//! - [`on_all_nodes_failed`](PlatformHandler::on_all_nodes_failed) fires
//!   when no candidate has remaining failure budget and the group resets to
//!   the primary. This is the host's cue to surface a blocking alert.
//!
//! Recovery of the primary is an expected transition and is signaled only in
//! logs, never through `on_node_switched`.
//!
//! Callbacks are invoked synchronously under the group's switch lock; keep
//! implementations short and non-blocking (enqueue and return).

/// Callbacks delivered to the embedding host on selection changes.
pub trait PlatformHandler: Send + Sync {
    /// The active candidate changed from `from_tag` to `to_tag`.
    fn on_node_switched(&self, from_tag: &str, to_tag: &str);

    /// Every candidate exhausted its failure budget; selection was reset to
    /// the primary.
    fn on_all_nodes_failed(&self);
}
