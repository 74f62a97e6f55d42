//! Call context: cancellation plus the "external connection" marker.
//!
//! Every operation that touches an upstream outbound takes a [`ConnContext`]
//! as its first parameter. The context carries:
//!
//! - A [`CancellationToken`] honored by delegated dials and the recovery
//!   probe. Tokens form a tree: canceling a parent cancels every child, so
//!   closing the group aborts all in-flight work derived from it.
//! - The *external connection* marker consulted when a new connection is
//!   registered with the interrupt group. Connections handed in from an
//!   inbound are flagged external; by default a switch only evicts internal
//!   connections unless the group is configured to interrupt external ones
//!   as well.
//!
//! Deadlines are the caller's business: wrap the call in
//! `tokio::time::timeout` as usual.

use tokio_util::sync::CancellationToken;

/// Context passed to dial/listen operations.
///
/// Cloning is cheap; clones share the same cancellation state.
#[derive(Debug, Clone, Default)]
pub struct ConnContext {
    token: CancellationToken,
    is_external: bool,
}

impl ConnContext {
    /// Create a root context with its own cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose token is a child of `parent`.
    ///
    /// Canceling `parent` cancels this context too; canceling this context
    /// leaves the parent untouched.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            is_external: false,
        }
    }

    /// Derive a child context sharing the external marker.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            is_external: self.is_external,
        }
    }

    /// Return a copy of this context flagged as carrying an external
    /// connection.
    pub fn as_external(&self) -> Self {
        Self {
            token: self.token.clone(),
            is_external: true,
        }
    }

    /// Whether the connection established under this context came from an
    /// inbound (external) handoff.
    pub fn is_external(&self) -> bool {
        self.is_external
    }

    /// Cancel this context and all children derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check cancellation without suspending.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Suspend until this context is canceled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
