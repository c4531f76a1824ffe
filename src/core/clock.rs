//! Simulation Clock
//!
//! The shared, monotonic time reference of a session and the race start
//! instant anchored on it. Both are single-writer: the authority holds
//! `ClockWriter` / `StartPublisher`, everyone else reads through
//! `ClockHandle` / `StartObserver`.
//!
//! Progression is gated on clock *values*, never on local wall time, so
//! every participant crosses the same thresholds at the same simulated
//! instant regardless of frame rate or delivery jitter.

use crate::core::cancel::CancelSignal;
use crate::core::replicated::{replicated, Authoritative, Replica, WaitError};

/// Simulation time in seconds.
pub type SimTime = f64;

/// Create a session clock starting at `start`.
pub fn sim_clock(start: SimTime) -> (ClockWriter, ClockHandle) {
    let (writer, replica) = replicated(start);
    (ClockWriter { inner: writer }, ClockHandle { inner: replica })
}

/// Create an unset race start cell.
pub fn race_start_cell() -> (StartPublisher, StartObserver) {
    let (writer, replica) = replicated(None);
    (StartPublisher { inner: writer }, StartObserver { inner: replica })
}

// =============================================================================
// CLOCK
// =============================================================================

/// Authoritative write half of the simulation clock.
#[derive(Debug)]
pub struct ClockWriter {
    inner: Authoritative<SimTime>,
}

impl ClockWriter {
    /// Move the clock to `t`. Values at or before the current time are ignored.
    pub fn set(&self, t: SimTime) -> bool {
        self.inner.modify(|now| {
            if t > *now {
                *now = t;
                true
            } else {
                false
            }
        })
    }

    /// Advance by `dt` seconds. Non-positive steps are ignored.
    pub fn advance(&self, dt: SimTime) -> SimTime {
        self.inner.modify(|now| {
            if dt > 0.0 {
                *now += dt;
                true
            } else {
                false
            }
        });
        self.now()
    }

    /// Current time.
    pub fn now(&self) -> SimTime {
        self.inner.get()
    }

    /// Read handle for this clock.
    pub fn handle(&self) -> ClockHandle {
        ClockHandle { inner: self.inner.replica() }
    }

    pub(crate) fn share(&self) -> Self {
        Self { inner: self.inner.share() }
    }
}

/// Read-only view of the simulation clock.
#[derive(Debug, Clone)]
pub struct ClockHandle {
    inner: Replica<SimTime>,
}

impl ClockHandle {
    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.inner.get()
    }

    /// Wait until `clock() >= target`. Returns the observed time.
    pub async fn wait_until(
        &mut self,
        target: SimTime,
        cancel: &mut CancelSignal,
    ) -> Result<SimTime, WaitError> {
        self.inner.wait_for(|now| *now >= target, cancel).await
    }
}

// =============================================================================
// RACE START INSTANT
// =============================================================================

/// Start instant publication errors.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum StartError {
    /// The start instant is immutable once set.
    #[error("race start already set to {0}")]
    AlreadySet(SimTime),
}

/// Authoritative write half of the race start instant.
#[derive(Debug)]
pub struct StartPublisher {
    inner: Authoritative<Option<SimTime>>,
}

impl StartPublisher {
    /// Set the start instant. Succeeds exactly once.
    pub fn publish(&self, t: SimTime) -> Result<(), StartError> {
        let mut existing = None;
        let set = self.inner.modify(|slot| match slot {
            Some(current) => {
                existing = Some(*current);
                false
            }
            None => {
                *slot = Some(t);
                true
            }
        });
        match (set, existing) {
            (true, _) => Ok(()),
            (false, Some(current)) => Err(StartError::AlreadySet(current)),
            (false, None) => Err(StartError::AlreadySet(t)),
        }
    }

    /// Read handle for this cell.
    pub fn observer(&self) -> StartObserver {
        StartObserver { inner: self.inner.replica() }
    }

    pub(crate) fn share(&self) -> Self {
        Self { inner: self.inner.share() }
    }
}

/// Read-only view of the race start instant.
#[derive(Debug, Clone)]
pub struct StartObserver {
    inner: Replica<Option<SimTime>>,
}

impl StartObserver {
    /// The start instant, if already observable.
    pub fn get(&self) -> Option<SimTime> {
        self.inner.get()
    }

    /// Wait until the start instant becomes observable.
    ///
    /// Absence is not an error, only "not yet".
    pub async fn wait(&mut self, cancel: &mut CancelSignal) -> Result<SimTime, WaitError> {
        let value = self.inner.wait_for(|slot| slot.is_some(), cancel).await?;
        value.ok_or(WaitError::AuthorityGone)
    }
}
