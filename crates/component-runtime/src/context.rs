//! Cancellation context threaded through lifecycle and execution calls.
//!
//! The runtime never inspects the context between lifecycle steps; it only hands
//! it on. Operations and services that do long-running work are expected to
//! watch [`Context::cancelled`] themselves.

use tokio_util::sync::CancellationToken;

/// Cooperative cancellation handle passed to every `initialize`/`start`/`stop`/
/// `execute` call.
///
/// Cloning is cheap and clones share the same cancellation state. Use
/// [`Context::child`] to derive a context that can be cancelled on its own
/// without affecting the parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that is never cancelled unless someone calls [`Context::cancel`]
    /// on it.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that is cancelled when `self` is, but can also be
    /// cancelled independently.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let ctx = Context::new();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        ctx.cancel();
        handle.await.unwrap();
    }
}
