//! Cooperative cancellation tokens.
//!
//! The orchestrator owns one root token per client plus a child token per
//! active channel and per in-flight fetch. Closing the client cancels the
//! root and every child it handed out, so a cancelled parent transitively
//! stops all I/O without per-call bookkeeping.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation token.
///
/// All clones observe the same flag. Cancellation is one-way and permanent.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Create a child token that is cancelled when either it or this token
    /// is cancelled.
    ///
    /// The linking task ends as soon as either side cancels, so short-lived
    /// children do not pin the parent for its whole lifetime.
    pub fn child(&self) -> Self {
        let child = CancelToken::new();
        let parent = self.clone();
        let linked = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        child
    }

    /// Cancel this token (and all clones).
    ///
    /// Takes effect even when no task is currently waiting on the token;
    /// `send_replace` updates the flag regardless of receiver count.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled. Pends forever otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            // The sender lives in self, so changed() cannot error while we
            // are borrowed from it.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
