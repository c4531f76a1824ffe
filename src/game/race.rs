//! Race Orchestration
//!
//! Runs one race on top of a running `NetworkSession`:
//!
//! ```text
//! prepare      authority spawns the grid, everyone waits for every vehicle
//!    │         and activates one controller per vehicle
//!    ▼
//! countdown    synchronized ticks on the shared clock, then Go
//!    │         (authority runs the tick loop from here on)
//!    ▼
//! results      authority: crossings -> FinishTracker -> broadcast + replicate
//!              observers: replicated payloads -> ResultsMirror -> broadcast
//! ```

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::RaceConfig;
use crate::core::cancel::{cancel_pair, poll_until};
use crate::core::clock::SimTime;
use crate::game::countdown::{CountdownCoordinator, CountdownError};
use crate::game::events::{CountdownEvent, FinishRecord, RaceEvent};
use crate::game::finish::{FinishTracker, ResultsMirror};
use crate::game::spawn::VehicleSpawner;
use crate::game::state::ParticipantId;
use crate::game::tick::{finish_channel, CrossingReceiver, FinishSignal, Simulation, TickLoop};
use crate::game::track::Track;
use crate::game::vehicle::{Ownership, OwnershipTable, VehicleAuthorityController};
use crate::network::protocol::{ProtocolError, RaceMessage};
use crate::network::runtime::{EndReason, RuntimeError};
use crate::network::session::{NetworkSession, SessionEvent};

/// Event buffer size.
const EVENT_CAPACITY: usize = 64;

/// Race errors.
#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    /// Countdown failed.
    #[error("countdown failed: {0}")]
    Countdown(#[from] CountdownError),

    /// Runtime call failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Result replication failed to encode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session is not running.
    #[error("session not running")]
    NotRunning,

    /// The session ended mid-race.
    #[error("race cancelled")]
    Cancelled,

    /// `track_results` was already called on this race.
    #[error("results already being tracked")]
    AlreadyTracking,
}

/// One race over a running session.
pub struct RaceSystem {
    session: NetworkSession,
    config: RaceConfig,
    track: Track,
    countdown_events: broadcast::Sender<CountdownEvent>,
    race_events: broadcast::Sender<RaceEvent>,
    finish: FinishSignal,
    crossings: Mutex<Option<CrossingReceiver>>,
    /// Replicated results, subscribed up front so nothing sent early is lost
    inbox: Mutex<Option<broadcast::Receiver<Vec<u8>>>>,
    /// Drivers of the prepared grid; only they are waited for at the finish
    grid: Mutex<Option<Vec<ParticipantId>>>,
}

impl RaceSystem {
    /// Create a race over `session`.
    pub fn new(session: &NetworkSession, config: RaceConfig, track: Track) -> Self {
        let (countdown_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (race_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (finish, crossings) = finish_channel();
        let inbox = session.runtime().subscribe_reliable();

        Self {
            session: session.clone(),
            config,
            track,
            countdown_events,
            race_events,
            finish,
            crossings: Mutex::new(Some(crossings)),
            inbox: Mutex::new(Some(inbox)),
            grid: Mutex::new(None),
        }
    }

    /// Subscribe to countdown ticks.
    pub fn subscribe_countdown(&self) -> broadcast::Receiver<CountdownEvent> {
        self.countdown_events.subscribe()
    }

    /// Subscribe to finish events. Identical on every participant.
    pub fn subscribe_results(&self) -> broadcast::Receiver<RaceEvent> {
        self.race_events.subscribe()
    }

    /// Where the tick loop reports crossings.
    pub fn finish_signal(&self) -> FinishSignal {
        self.finish.clone()
    }

    /// Race configuration.
    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    // =========================================================================
    // PREPARE
    // =========================================================================

    /// Spawn (authority only) and activate every vehicle.
    ///
    /// Waits until each current participant's vehicle is visible locally.
    pub async fn prepare(
        &self,
        names: &BTreeMap<ParticipantId, String>,
    ) -> Result<Simulation, RaceError> {
        let runtime = self.session.runtime();
        let (Some(local), Some(host)) = (self.session.local_participant(), self.session.host())
        else {
            return Err(RaceError::NotRunning);
        };
        let participants = runtime.active_participants();
        let mut cancel = self.session.cancel_signal();

        let mut writers = BTreeMap::new();
        if self.session.is_authority() {
            let spawner = VehicleSpawner::new(runtime.clone(), self.track.clone());
            let spawned = cancel
                .run_until_cancelled(spawner.spawn_all(&participants, names))
                .await
                .ok_or(RaceError::Cancelled)??;
            for vehicle in spawned {
                writers.insert(vehicle.view.id, vehicle.writer);
            }
        }

        let ready = poll_until(
            || {
                // Someone who left meanwhile will never get a vehicle
                let active = runtime.active_participants();
                participants
                    .iter()
                    .filter(|p| active.contains(p))
                    .all(|p| runtime.vehicle_of(*p).is_some())
            },
            self.config.vehicle_poll_interval,
            &mut cancel,
        )
        .await;
        if !ready {
            return Err(RaceError::Cancelled);
        }

        let mut ownership = OwnershipTable::new();
        let mut controllers = Vec::with_capacity(participants.len());
        for participant in &participants {
            let Some(view) = runtime.vehicle_of(*participant) else {
                continue;
            };
            ownership.assign(
                view.id,
                Ownership {
                    input_authority: view.owner,
                    state_authority: host,
                },
            );
            let writer = writers.remove(&view.id);
            controllers.push(VehicleAuthorityController::on_activate(
                view,
                writer,
                &ownership,
                local,
                &self.config.car,
            ));
        }

        info!(vehicles = controllers.len(), "race prepared");
        *self.grid.lock() = Some(controllers.iter().map(|c| c.owner()).collect());
        Ok(Simulation::new(controllers, self.track.clone()))
    }

    // =========================================================================
    // COUNTDOWN
    // =========================================================================

    /// Run the countdown. Returns the go instant.
    ///
    /// If the start instant never arrives within `start_timeout`, the session
    /// is ended with `EndReason::StartTimedOut`.
    pub async fn countdown(&self) -> Result<SimTime, RaceError> {
        let runtime = self.session.runtime();
        let (Some(clock), Some(start)) = (runtime.clock(), runtime.race_start()) else {
            return Err(RaceError::NotRunning);
        };

        let mut coordinator = CountdownCoordinator::new(
            clock,
            start,
            self.config.countdown_seconds,
            self.countdown_events.clone(),
        )
        .with_start_timeout(self.config.start_timeout);
        if let Some(grant) = self.session.authority() {
            coordinator = coordinator.with_publisher(grant.race_start);
        }

        let mut cancel = self.session.cancel_signal();
        match coordinator.run(&mut cancel).await {
            Err(CountdownError::StartTimedOut) => {
                self.session.end_with(EndReason::StartTimedOut).await;
                Err(CountdownError::StartTimedOut.into())
            }
            result => Ok(result?),
        }
    }

    // =========================================================================
    // RESULTS
    // =========================================================================

    /// Follow the race until the final ranking exists. Can be called once.
    ///
    /// On the authority this consumes crossings from `finish_signal()`;
    /// everywhere else it applies the authority's replicated results.
    pub async fn track_results(&self, start: SimTime) -> Result<Vec<FinishRecord>, RaceError> {
        if self.session.is_authority() {
            self.track_as_authority(start).await
        } else {
            self.mirror_results().await
        }
    }

    async fn track_as_authority(&self, start: SimTime) -> Result<Vec<FinishRecord>, RaceError> {
        let mut crossings = self.crossings.lock().take().ok_or(RaceError::AlreadyTracking)?;
        let mut session_events = self.session.subscribe();
        let mut cancel = self.session.cancel_signal();
        let runtime = self.session.runtime();

        // Late joiners have no vehicle and are not waited for
        let active = runtime.active_participants();
        let expected: Vec<ParticipantId> = match self.grid.lock().as_ref() {
            Some(grid) => grid.iter().copied().filter(|p| active.contains(p)).collect(),
            None => active,
        };
        let mut tracker = FinishTracker::new(expected, self.config.finish_quantum);
        debug!(expected = tracker.expected_count(), start, "tracking finishes");

        loop {
            let events = tokio::select! {
                crossing = crossings.recv() => match crossing {
                    Some(c) => tracker.on_crossed(c.participant, c.at, start),
                    None => return Err(RaceError::Cancelled),
                },
                event = session_events.recv() => match event {
                    Ok(SessionEvent::ParticipantLeft(participant)) => tracker.withdraw(participant),
                    Ok(SessionEvent::SessionEnded(_)) => return Err(RaceError::Cancelled),
                    Ok(SessionEvent::ParticipantJoined(_)) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "race lagged behind session events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(RaceError::Cancelled),
                },
                _ = cancel.cancelled() => return Err(RaceError::Cancelled),
            };

            for event in events {
                let payload = RaceMessage::from(event.clone()).encode(self.config.wire_format)?;
                runtime.send_reliable(payload)?;
                let _ = self.race_events.send(event.clone());

                if let RaceEvent::RaceFinished(results) = event {
                    return Ok(results);
                }
            }
        }
    }

    async fn mirror_results(&self) -> Result<Vec<FinishRecord>, RaceError> {
        let mut inbox = self.inbox.lock().take().ok_or(RaceError::AlreadyTracking)?;
        let mut cancel = self.session.cancel_signal();
        let mut mirror = ResultsMirror::new();

        loop {
            let payload = tokio::select! {
                payload = inbox.recv() => payload,
                _ = cancel.cancelled() => return Err(RaceError::Cancelled),
            };

            let bytes = match payload {
                Ok(bytes) => bytes,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed replicated race results");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RaceError::Cancelled),
            };

            let event = match RaceMessage::decode(&bytes, self.config.wire_format) {
                Ok(message) => RaceEvent::from(message),
                Err(e) => {
                    warn!(error = %e, "undecodable race message dropped");
                    continue;
                }
            };

            if mirror.apply(&event) {
                let _ = self.race_events.send(event);
            }
            if let Some(results) = mirror.final_results() {
                return Ok(results.to_vec());
            }
        }
    }

    // =========================================================================
    // RUN
    // =========================================================================

    /// Prepare, count down, race and return the final ranking.
    ///
    /// The authority drives the simulation clock for the whole race.
    pub async fn run(
        &self,
        names: &BTreeMap<ParticipantId, String>,
    ) -> Result<Vec<FinishRecord>, RaceError> {
        let sim = self.prepare(names).await?;
        let runtime = self.session.runtime();

        let (stop, stopped) = cancel_pair();
        let ticking = match (self.session.authority(), runtime.race_start()) {
            (Some(grant), Some(start)) => {
                let tick_loop = TickLoop {
                    clock: grant.clock,
                    runtime,
                    start,
                    countdown_seconds: self.config.countdown_seconds,
                    tick_rate: self.config.tick_rate,
                    finish: self.finish_signal(),
                };
                Some(tokio::spawn(tick_loop.run(sim, stopped)))
            }
            _ => None,
        };

        let outcome = async {
            let go = self.countdown().await?;
            let start = go - SimTime::from(self.config.countdown_seconds);
            self.track_results(start).await
        }
        .await;

        stop.cancel();
        if let Some(task) = ticking {
            match task.await {
                Ok(mut sim) => sim.destroy_all(),
                Err(e) => warn!(error = %e, "tick loop task failed"),
            }
        }

        match &outcome {
            Ok(results) => info!(finishers = results.len(), "race complete"),
            Err(e) => warn!(error = %e, "race aborted"),
        }
        outcome
    }
}
