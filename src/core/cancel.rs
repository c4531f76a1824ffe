//! Cancellation
//!
//! A `CancelTrigger` / `CancelSignal` pair backed by a watch channel.
//! Every wait in the crate selects on a signal so that ending a session
//! unblocks it. Dropping the trigger counts as cancellation.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Fires a cancellation. Held by the owner of a lifetime (one session run).
#[derive(Debug)]
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

/// Observes a cancellation. Cheap to clone; hand one to every waiter.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// Create a linked trigger and signal.
pub fn cancel_pair() -> (CancelTrigger, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelSignal { rx })
}

impl CancelTrigger {
    /// Cancel every linked signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Create another signal linked to this trigger.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal { rx: self.tx.subscribe() }
    }
}

impl CancelSignal {
    /// A signal that is already cancelled.
    pub fn cancelled_now() -> Self {
        let (tx, rx) = watch::channel(true);
        drop(tx);
        Self { rx }
    }

    /// Check without waiting.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once cancelled (or once the trigger is gone).
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` to completion unless cancelled first.
    pub async fn run_until_cancelled<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            out = fut => Some(out),
            _ = self.cancelled() => None,
        }
    }
}

/// Cooperatively poll `predicate` every `interval` until it holds.
///
/// Returns `false` if cancelled first. Used where no change notification
/// exists (e.g. waiting for remote objects to be spawned).
pub async fn poll_until<P>(
    mut predicate: P,
    interval: Duration,
    cancel: &mut CancelSignal,
) -> bool
where
    P: FnMut() -> bool,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        if predicate() {
            return true;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (trigger, mut signal) = cancel_pair();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });
        trigger.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_cancels() {
        let (trigger, mut signal) = cancel_pair();
        drop(trigger);
        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let (trigger, mut signal) = cancel_pair();
        assert_eq!(signal.run_until_cancelled(async { 7 }).await, Some(7));

        trigger.cancel();
        let out = signal.run_until_cancelled(std::future::pending::<()>()).await;
        assert!(out.is_none());
        assert!(CancelSignal::cancelled_now().is_cancelled());
    }

    #[tokio::test]
    async fn test_poll_until() {
        let (_trigger, mut signal) = cancel_pair();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let done = poll_until(
            move || counter.fetch_add(1, Ordering::SeqCst) >= 2,
            Duration::from_millis(1),
            &mut signal,
        )
        .await;
        assert!(done);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let mut cancelled = CancelSignal::cancelled_now();
        assert!(!poll_until(|| false, Duration::from_millis(1), &mut cancelled).await);
    }
}
