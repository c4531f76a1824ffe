//! Authoritative Simulation Tick
//!
//! The state authority advances the shared clock by a fixed step, drives
//! every vehicle it owns and reports finish-line crossings stamped with the
//! clock value of the tick they happened on.
//!
//! Input is ignored until the go instant (`start + countdown_seconds`), so
//! nobody leaves the grid early.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::core::cancel::CancelSignal;
use crate::core::clock::{ClockWriter, SimTime, StartObserver};
use crate::core::vec2::Vec2;
use crate::game::state::ParticipantId;
use crate::game::track::Track;
use crate::game::vehicle::{TickOutcome, VehicleAuthorityController};
use crate::network::runtime::NetworkRuntime;

// =============================================================================
// CROSSINGS
// =============================================================================

/// A vehicle crossed the finish line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Input authority of the vehicle
    pub participant: ParticipantId,
    /// Clock value of the tick the crossing was detected on
    pub at: SimTime,
}

/// Sending half of the crossing stream consumed by the finish tracker.
#[derive(Debug, Clone)]
pub struct FinishSignal {
    tx: mpsc::UnboundedSender<Crossing>,
}

/// Receiving half of the crossing stream.
pub type CrossingReceiver = mpsc::UnboundedReceiver<Crossing>;

/// Create a crossing stream.
pub fn finish_channel() -> (FinishSignal, CrossingReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FinishSignal { tx }, rx)
}

impl FinishSignal {
    /// Report a crossing. Dropped silently once the tracker is gone.
    pub fn crossed(&self, participant: ParticipantId, at: SimTime) {
        if self.tx.send(Crossing { participant, at }).is_err() {
            trace!(%participant, "crossing after tracker stopped");
        }
    }
}

// =============================================================================
// SIMULATION
// =============================================================================

/// Result of one simulation step.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Vehicles that received input this step
    pub driven: usize,
    /// Owners of vehicles that crossed the finish line this step
    pub crossings: Vec<ParticipantId>,
}

/// Every vehicle controller of one race plus the track they run on.
#[derive(Debug)]
pub struct Simulation {
    controllers: Vec<VehicleAuthorityController>,
    track: Track,
}

impl Simulation {
    /// Create a simulation over activated controllers.
    pub fn new(controllers: Vec<VehicleAuthorityController>, track: Track) -> Self {
        Self { controllers, track }
    }

    /// Advance every owned vehicle by `dt`.
    ///
    /// Inputs are only read while `racing`; before that vehicles coast (at
    /// rest on the grid). Observed and destroyed vehicles are skipped.
    pub fn step(&mut self, runtime: &dyn NetworkRuntime, racing: bool, dt: f32) -> TickResult {
        let mut result = TickResult::default();

        for controller in &mut self.controllers {
            if !controller.is_state_authority() {
                continue;
            }
            let prev = controller.body().position;
            let input = if racing { runtime.input_for(controller.owner()) } else { None };

            match controller.on_tick(input, dt) {
                TickOutcome::Driven => result.driven += 1,
                TickOutcome::Coasting => {}
                TickOutcome::Observed | TickOutcome::Inactive => continue,
            }

            let next = controller.body().position;
            if self.track.finish.crossed(prev, next) {
                result.crossings.push(controller.owner());
            }
        }

        result
    }

    /// Destroy the vehicle driven by `participant`.
    pub fn remove_participant(&mut self, participant: ParticipantId) {
        for controller in &mut self.controllers {
            if controller.owner() == participant {
                controller.on_destroy();
            }
        }
    }

    /// Latest replicated position of every active vehicle, by owner.
    pub fn positions(&self) -> BTreeMap<ParticipantId, Vec2> {
        self.controllers
            .iter()
            .filter(|c| c.is_active())
            .map(|c| (c.owner(), c.body().position))
            .collect()
    }

    /// Live standings, closest to the finish first.
    pub fn standings(&self) -> Vec<ParticipantId> {
        self.track
            .standings(self.positions().into_iter().map(|(id, pos)| (id, Some(pos))))
    }

    /// Controllers, in spawn order.
    pub fn controllers(&self) -> &[VehicleAuthorityController] {
        &self.controllers
    }

    /// Track.
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Destroy every vehicle.
    pub fn destroy_all(&mut self) {
        for controller in &mut self.controllers {
            controller.on_destroy();
        }
    }
}

// =============================================================================
// TICK LOOP
// =============================================================================

/// Host-side fixed-rate loop driving the clock and the simulation.
pub struct TickLoop {
    /// Clock writer, advanced by one step per tick
    pub clock: ClockWriter,
    /// Runtime to read inputs from
    pub runtime: Arc<dyn NetworkRuntime>,
    /// Race start instant
    pub start: StartObserver,
    /// Countdown length; input opens at `start + countdown_seconds`
    pub countdown_seconds: u32,
    /// Ticks per second
    pub tick_rate: u32,
    /// Where crossings go
    pub finish: FinishSignal,
}

impl TickLoop {
    /// Run until cancelled, then hand the simulation back.
    pub async fn run(self, mut sim: Simulation, mut cancel: CancelSignal) -> Simulation {
        let tick_rate = self.tick_rate.max(1);
        let dt = 1.0 / tick_rate as f64;
        let mut ticker = interval(Duration::from_micros(1_000_000 / tick_rate as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_rate, "tick loop started");
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            let now = self.clock.advance(dt);
            let racing = self
                .start
                .get()
                .is_some_and(|start| now >= start + SimTime::from(self.countdown_seconds));

            let result = sim.step(self.runtime.as_ref(), racing, dt as f32);
            for participant in result.crossings {
                debug!(%participant, at = now, "finish line crossed");
                self.finish.crossed(participant, now);
            }
            ticks += 1;
            if ticks % u64::from(tick_rate) == 0 {
                debug!(at = now, standings = ?sim.standings(), "standings");
            }
        }

        info!(ticks, now = self.clock.now(), "tick loop stopped");
        sim
    }
}
