//! Replicated Values
//!
//! State with exactly one writer (its authority) and any number of
//! read-only replicas. The write half is never cloned out to
//! non-authoritative participants, so "only the authority mutates"
//! holds by construction.

use std::sync::Arc;
use tokio::sync::watch;

use crate::core::cancel::CancelSignal;

/// Why a wait on a replicated value ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// The wait was cancelled (session ended).
    #[error("wait cancelled")]
    Cancelled,
    /// The authoritative copy was dropped; the value can never change again.
    #[error("authority gone")]
    AuthorityGone,
}

/// Write half of a replicated value.
#[derive(Debug)]
pub struct Authoritative<T> {
    tx: Arc<watch::Sender<T>>,
}

/// Read half of a replicated value.
#[derive(Debug)]
pub struct Replica<T> {
    rx: watch::Receiver<T>,
}

/// Create a replicated value.
pub fn replicated<T>(initial: T) -> (Authoritative<T>, Replica<T>) {
    let (tx, rx) = watch::channel(initial);
    (Authoritative { tx: Arc::new(tx) }, Replica { rx })
}

impl<T> Authoritative<T> {
    /// Replace the value and notify replicas.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate in place. Replicas are notified only if `f` returns true.
    pub fn modify<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.tx.send_if_modified(f)
    }

    /// New read half.
    pub fn replica(&self) -> Replica<T> {
        Replica { rx: self.tx.subscribe() }
    }

    /// Share the write half with another owner inside the same authority.
    pub(crate) fn share(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Clone> Authoritative<T> {
    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T> Clone for Replica<T> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<T: Clone + Send + Sync> Replica<T> {
    /// Current value.
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait until `predicate` holds for the replicated value.
    ///
    /// Change-notified, never spins. Returns immediately if the predicate
    /// already holds.
    pub async fn wait_for<P>(
        &mut self,
        mut predicate: P,
        cancel: &mut CancelSignal,
    ) -> Result<T, WaitError>
    where
        P: FnMut(&T) -> bool + Send,
    {
        let rx = &mut self.rx;
        let wait = async move {
            rx.wait_for(|value| predicate(value))
                .await
                .map(|value| value.clone())
        };
        tokio::select! {
            res = wait => res.map_err(|_| WaitError::AuthorityGone),
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
        }
    }
}
