//! Network Runtime Contract
//!
//! The narrow surface this core consumes from the underlying network
//! runtime. Transport, framing, reliability and NAT traversal all live
//! behind it. `LoopbackHub` is the in-process implementation.

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::core::clock::{ClockHandle, ClockWriter, StartObserver, StartPublisher};
use crate::core::replicated::{Authoritative, Replica};
use crate::core::vec2::Vec2;
use crate::game::input::InputFrame;
use crate::game::state::{ParticipantId, VehicleId};
use crate::game::vehicle::VehicleBody;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// `shutdown()` was called locally.
    LocalShutdown,
    /// The host shut the session down (or left).
    HostShutdown,
    /// The connection was lost.
    Disconnected,
    /// The race start instant never arrived within the configured timeout.
    StartTimedOut,
}

/// Raw events delivered by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A participant connected (may repeat; the session deduplicates).
    ParticipantJoined(ParticipantId),
    /// A participant disconnected.
    ParticipantLeft(ParticipantId),
    /// The local connection to the session is gone.
    Shutdown(EndReason),
}

/// Write handles issued only to the authoritative participant.
#[derive(Debug)]
pub struct AuthorityGrant {
    /// Simulation clock writer.
    pub clock: ClockWriter,
    /// Race start instant publisher.
    pub race_start: StartPublisher,
}

impl AuthorityGrant {
    pub(crate) fn share(&self) -> Self {
        Self {
            clock: self.clock.share(),
            race_start: self.race_start.share(),
        }
    }
}

/// Result of a successful join or host.
#[derive(Debug)]
pub struct JoinGrant {
    /// Session joined
    pub session_name: String,
    /// Local participant identity
    pub local: ParticipantId,
    /// Host (authoritative) participant
    pub host: ParticipantId,
    /// Present only when the local participant is the authority
    pub authority: Option<AuthorityGrant>,
}

impl JoinGrant {
    /// Is the local participant the authority?
    pub fn is_authority(&self) -> bool {
        self.authority.is_some()
    }
}

/// Authoritative spawn of a networked vehicle.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Participant with input authority over the vehicle
    pub owner: ParticipantId,
    /// Spawn position
    pub position: Vec2,
    /// Spawn heading (radians)
    pub heading: f32,
    /// Display name, set once by the spawner
    pub display_name: String,
}

/// Post-spawn initialization, run on the authoritative copy before the
/// first replication.
pub type SpawnInit = Box<dyn FnOnce(&mut VehicleBody) + Send>;

/// Read view of a spawned vehicle, available to every participant.
#[derive(Debug, Clone)]
pub struct VehicleView {
    /// Entity id
    pub id: VehicleId,
    /// Input authority
    pub owner: ParticipantId,
    /// Display name
    pub display_name: String,
    /// Replicated physical state
    pub state: Replica<VehicleBody>,
}

/// A vehicle as returned to its spawner (the state authority).
#[derive(Debug)]
pub struct SpawnedVehicle {
    /// Read view
    pub view: VehicleView,
    /// Authoritative state writer
    pub writer: Authoritative<VehicleBody>,
}

/// Runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Session has no free slot.
    #[error("session is full")]
    SessionFull,
    /// Session name rejected.
    #[error("invalid session name: {0:?}")]
    InvalidSessionName(String),
    /// Operation requires an active connection.
    #[error("not connected")]
    NotConnected,
    /// Already connected to a session.
    #[error("already connected")]
    AlreadyConnected,
    /// Operation requires state authority.
    #[error("not the authority")]
    NotAuthority,
    /// RPC caller is not the target's input holder.
    #[error("rpc rejected: caller is not the input holder")]
    RpcRejected,
    /// Unknown participant.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),
}

/// The network runtime as consumed by this core.
#[async_trait]
pub trait NetworkRuntime: Send + Sync {
    /// Join the named session, hosting it if nobody else does.
    async fn join_or_host(&self, session_name: &str) -> Result<JoinGrant, RuntimeError>;

    /// Leave the session. Emits `Shutdown(LocalShutdown)` to local subscribers
    /// if connected; no-op otherwise.
    async fn disconnect(&self);

    /// Subscribe to raw runtime events. Subscribe before joining.
    fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent>;

    /// Participants currently in the session, in join order.
    fn active_participants(&self) -> Vec<ParticipantId>;

    /// Shared simulation clock.
    fn clock(&self) -> Option<ClockHandle>;

    /// Replicated race start instant.
    fn race_start(&self) -> Option<StartObserver>;

    /// Set the local participant's input for upcoming ticks.
    fn provide_input(&self, input: InputFrame);

    /// Latest input snapshot for a participant.
    fn input_for(&self, participant: ParticipantId) -> Option<InputFrame>;

    /// Replicated avatar display name, once the participant's avatar exists.
    fn display_name(&self, participant: ParticipantId) -> Option<watch::Receiver<Option<String>>>;

    /// RPC from `target`'s input holder to its state authority setting the
    /// avatar display name.
    async fn rpc_set_display_name(
        &self,
        target: ParticipantId,
        name: String,
    ) -> Result<(), RuntimeError>;

    /// Spawn a vehicle (state authority only).
    async fn spawn_vehicle(
        &self,
        request: SpawnRequest,
        init: SpawnInit,
    ) -> Result<SpawnedVehicle, RuntimeError>;

    /// The vehicle a participant has input authority over.
    fn vehicle_of(&self, participant: ParticipantId) -> Option<VehicleView>;

    /// Send a reliable payload to every other participant.
    fn send_reliable(&self, payload: Vec<u8>) -> Result<(), RuntimeError>;

    /// Subscribe to reliable payloads from other participants.
    fn subscribe_reliable(&self) -> broadcast::Receiver<Vec<u8>>;
}
