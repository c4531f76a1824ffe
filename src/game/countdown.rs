//! Synchronized Race Countdown
//!
//! Every participant runs the same coordinator against the shared clock:
//!
//! 1. The authority anchors the race start instant at the current clock value.
//! 2. Everyone waits until the start instant is observable.
//! 3. Everyone waits until `clock >= start`.
//! 4. For `count = N..=1`: emit `Tick(count)`, then wait until
//!    `clock >= start + (N - count + 1)`.
//! 5. Emit `Go` once.
//!
//! Progression depends only on clock values, never on local wall time, so
//! all participants emit the same ticks at the same simulated instants.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelSignal;
use crate::core::clock::{ClockHandle, SimTime, StartError, StartObserver, StartPublisher};
use crate::core::replicated::WaitError;
use crate::game::events::CountdownEvent;

/// Countdown failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CountdownError {
    /// The session ended while waiting.
    #[error("countdown cancelled")]
    Cancelled,
    /// The start instant did not appear within the configured timeout.
    #[error("race start instant not published in time")]
    StartTimedOut,
    /// The authority dropped the clock or start instant.
    #[error("authority stopped publishing the clock")]
    ClockStopped,
}

impl From<WaitError> for CountdownError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Cancelled => CountdownError::Cancelled,
            WaitError::AuthorityGone => CountdownError::ClockStopped,
        }
    }
}

/// Drives one countdown for one participant.
#[derive(Debug)]
pub struct CountdownCoordinator {
    clock: ClockHandle,
    start: StartObserver,
    publisher: Option<StartPublisher>,
    countdown_seconds: u32,
    start_timeout: Option<Duration>,
    events: broadcast::Sender<CountdownEvent>,
}

impl CountdownCoordinator {
    /// Observer-side coordinator emitting on `events`.
    pub fn new(
        clock: ClockHandle,
        start: StartObserver,
        countdown_seconds: u32,
        events: broadcast::Sender<CountdownEvent>,
    ) -> Self {
        Self {
            clock,
            start,
            publisher: None,
            countdown_seconds,
            start_timeout: None,
            events,
        }
    }

    /// Make this the authority's coordinator, which anchors the start instant.
    pub fn with_publisher(mut self, publisher: StartPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Give up waiting for the start instant after `timeout`.
    pub fn with_start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Subscribe to countdown events.
    pub fn subscribe(&self) -> broadcast::Receiver<CountdownEvent> {
        self.events.subscribe()
    }

    /// Run the countdown. Returns the go instant (`start + countdown_seconds`).
    pub async fn run(&self, cancel: &mut CancelSignal) -> Result<SimTime, CountdownError> {
        if let Some(publisher) = &self.publisher {
            let now = self.clock.now();
            match publisher.publish(now) {
                Ok(()) => info!(start = now, "race start instant published"),
                Err(StartError::AlreadySet(existing)) => {
                    debug!(start = existing, "race start instant already set");
                }
            }
        }

        let start = self.wait_for_start(cancel).await?;
        let mut clock = self.clock.clone();
        clock.wait_until(start, cancel).await?;

        let total = self.countdown_seconds;
        for count in (1..=total).rev() {
            self.emit(CountdownEvent::Tick(count));
            let threshold = start + SimTime::from(total - count + 1);
            clock.wait_until(threshold, cancel).await?;
        }

        self.emit(CountdownEvent::Go);
        Ok(start + SimTime::from(total))
    }

    async fn wait_for_start(&self, cancel: &mut CancelSignal) -> Result<SimTime, CountdownError> {
        let mut observer = self.start.clone();
        let wait = observer.wait(cancel);
        let result = match self.start_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    let timeout_ms = limit.as_millis() as u64;
                    warn!(timeout_ms, "race start instant never arrived");
                    return Err(CountdownError::StartTimedOut);
                }
            },
            None => wait.await,
        };
        Ok(result?)
    }

    fn emit(&self, event: CountdownEvent) {
        info!(?event, now = self.clock.now(), "countdown");
        let _ = self.events.send(event);
    }
}
