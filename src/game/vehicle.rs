//! Vehicle Physics and Authority
//!
//! Only the participant holding state authority over a vehicle integrates
//! its motion. Everyone else reads the replicated body.

use std::collections::BTreeMap;
use std::f32::consts::{FRAC_PI_2, PI, TAU};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CarConfig;
use crate::core::replicated::Authoritative;
use crate::core::vec2::Vec2;
use crate::game::input::InputFrame;
use crate::game::state::{ParticipantId, VehicleId};
use crate::network::runtime::VehicleView;

/// Inputs at or below this magnitude are ignored.
pub const INPUT_DEADZONE: f32 = 0.01;

/// Sideways velocity damping (1/s).
pub const LATERAL_DAMPING: f32 = 4.0;

/// Angular velocity drag (1/s).
pub const ANGULAR_DRAG: f32 = 4.0;

/// Steering authority left at max speed.
const STEER_FACTOR_AT_MAX_SPEED: f32 = 0.25;

// =============================================================================
// BODY
// =============================================================================

/// Replicated physical state of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleBody {
    /// Position on the track plane
    pub position: Vec2,
    /// Heading in radians, clockwise from +y, wrapped to `[-PI, PI)`
    pub heading: f32,
    /// Linear velocity (units/s)
    pub velocity: Vec2,
    /// Angular velocity (rad/s)
    pub angular_velocity: f32,
}

impl VehicleBody {
    /// Body at rest.
    pub fn at(position: Vec2, heading: f32) -> Self {
        Self {
            position,
            heading: wrap_angle(heading),
            ..Self::default()
        }
    }

    /// Unit forward vector.
    #[inline]
    pub fn forward(&self) -> Vec2 {
        Vec2::from_heading(self.heading)
    }

    /// Unit right vector.
    #[inline]
    pub fn right(&self) -> Vec2 {
        Vec2::from_heading(self.heading + FRAC_PI_2)
    }

    /// Current speed.
    #[inline]
    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    /// Advance position and heading by `dt` seconds.
    pub fn integrate(&mut self, dt: f32) {
        self.position += self.velocity * dt;
        self.heading = wrap_angle(self.heading + self.angular_velocity * dt);
    }
}

fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Sign with `sign(0) == 1`.
#[inline]
fn sign(value: f32) -> f32 {
    if value >= 0.0 { 1.0 } else { -1.0 }
}

// =============================================================================
// MOVEMENT
// =============================================================================

/// Applies driver input as accelerations on a body.
#[derive(Debug, Clone)]
pub struct CarMovement {
    max_speed: f32,
    acceleration: f32,
    /// rad/s²
    turn_acceleration: f32,
}

impl CarMovement {
    /// Create from tuning.
    pub fn new(config: &CarConfig) -> Self {
        Self {
            max_speed: config.max_speed,
            acceleration: config.acceleration,
            turn_acceleration: config.turn_speed.to_radians(),
        }
    }

    /// Steering multiplier: 1.0 at rest falling linearly to 0.25 at max speed.
    pub fn steer_factor(&self, speed: f32) -> f32 {
        let t = if self.max_speed > 0.0 {
            (speed / self.max_speed).clamp(0.0, 1.0)
        } else {
            1.0
        };
        1.0 + (STEER_FACTOR_AT_MAX_SPEED - 1.0) * t
    }

    /// Apply one tick of throttle, steer and lateral friction.
    ///
    /// All three are computed from the velocity at the start of the tick.
    /// Does not move the body; call `VehicleBody::integrate` afterwards.
    pub fn apply(&self, body: &mut VehicleBody, throttle: f32, steer: f32, dt: f32) {
        let velocity = body.velocity;
        let speed = velocity.length();
        let forward = body.forward();
        let mut dv = Vec2::ZERO;

        if throttle.abs() > INPUT_DEADZONE {
            // Past max speed only braking or reversing is allowed
            let is_opposite = sign(throttle) != sign(velocity.dot(forward));
            let under_max_speed = speed < self.max_speed;
            if under_max_speed || is_opposite {
                dv += forward * (throttle * self.acceleration * dt);
            }
        }

        if steer.abs() > INPUT_DEADZONE {
            body.angular_velocity += steer * self.turn_acceleration * self.steer_factor(speed) * dt;
        }

        let lateral = velocity.project_onto(body.right());
        dv += lateral * (-LATERAL_DAMPING * dt);

        body.velocity += dv;
        body.angular_velocity /= 1.0 + ANGULAR_DRAG * dt;
    }
}

// =============================================================================
// OWNERSHIP
// =============================================================================

/// Who drives a vehicle and who owns its ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    /// Participant whose input drives the vehicle
    pub input_authority: ParticipantId,
    /// Participant whose copy is ground truth
    pub state_authority: ParticipantId,
}

/// Vehicle id → ownership, assigned once at spawn.
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    entries: BTreeMap<VehicleId, Ownership>,
}

impl OwnershipTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record ownership for a vehicle. Returns false (and keeps the existing
    /// entry) if the vehicle was already assigned.
    pub fn assign(&mut self, vehicle: VehicleId, ownership: Ownership) -> bool {
        if self.entries.contains_key(&vehicle) {
            debug!(%vehicle, "ownership already assigned");
            return false;
        }
        self.entries.insert(vehicle, ownership);
        true
    }

    /// Ownership of a vehicle.
    pub fn get(&self, vehicle: VehicleId) -> Option<Ownership> {
        self.entries.get(&vehicle).copied()
    }

    /// Number of vehicles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No vehicles.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// What a controller did on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Input applied and body integrated.
    Driven,
    /// No input this tick; body integrated on its current velocity.
    Coasting,
    /// Not the state authority; replicated state left untouched.
    Observed,
    /// Destroyed or never activated.
    Inactive,
}

/// Per-vehicle controller, driven explicitly by the owning scheduler.
#[derive(Debug)]
pub struct VehicleAuthorityController {
    view: VehicleView,
    writer: Option<Authoritative<VehicleBody>>,
    movement: CarMovement,
    is_local_player: bool,
    active: bool,
}

impl VehicleAuthorityController {
    /// Activate a controller for a spawned vehicle.
    ///
    /// The controller integrates only if the ownership table names `local`
    /// as state authority and a writer was handed over with the vehicle.
    pub fn on_activate(
        view: VehicleView,
        writer: Option<Authoritative<VehicleBody>>,
        ownership: &OwnershipTable,
        local: ParticipantId,
        car: &CarConfig,
    ) -> Self {
        let entry = ownership.get(view.id);
        let owns_state = entry.map(|o| o.state_authority == local).unwrap_or(false);

        let writer = match (owns_state, writer) {
            (true, Some(writer)) => Some(writer),
            (true, None) => {
                warn!(vehicle = %view.id, "state authority without a writer, observing");
                None
            }
            (false, _) => None,
        };
        let is_local_player = entry.map(|o| o.input_authority == local).unwrap_or(false);
        if entry.is_none() {
            warn!(vehicle = %view.id, "vehicle missing from ownership table, observing");
        }

        debug!(
            vehicle = %view.id,
            owner = %view.owner,
            authority = writer.is_some(),
            local_player = is_local_player,
            "vehicle activated"
        );

        Self {
            view,
            writer,
            movement: CarMovement::new(car),
            is_local_player,
            active: true,
        }
    }

    /// Run one tick. Only the state authority touches the body.
    pub fn on_tick(&mut self, input: Option<InputFrame>, dt: f32) -> TickOutcome {
        if !self.active {
            return TickOutcome::Inactive;
        }
        let Some(writer) = &self.writer else {
            return TickOutcome::Observed;
        };

        let movement = &self.movement;
        writer.modify(|body| {
            // Released input still damps drift and spin
            let (throttle, steer) = input.map_or((0.0, 0.0), |i| (i.throttle(), i.steer()));
            movement.apply(body, throttle, steer, dt);
            body.integrate(dt);
            true
        });

        if input.is_some() {
            TickOutcome::Driven
        } else {
            TickOutcome::Coasting
        }
    }

    /// Deactivate. Further ticks are no-ops.
    pub fn on_destroy(&mut self) {
        if self.active {
            debug!(vehicle = %self.view.id, "vehicle destroyed");
        }
        self.active = false;
        self.writer = None;
    }

    /// Entity id.
    pub fn id(&self) -> VehicleId {
        self.view.id
    }

    /// Input authority.
    pub fn owner(&self) -> ParticipantId {
        self.view.owner
    }

    /// Display name set by the spawner.
    pub fn display_name(&self) -> &str {
        &self.view.display_name
    }

    /// Does this process integrate the vehicle?
    pub fn is_state_authority(&self) -> bool {
        self.writer.is_some()
    }

    /// Is the local participant driving this vehicle?
    pub fn is_local_player(&self) -> bool {
        self.is_local_player
    }

    /// Is the controller still active?
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Latest replicated body.
    pub fn body(&self) -> VehicleBody {
        self.view.state.get()
    }
}
