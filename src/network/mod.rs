//! Network Layer
//!
//! Session lifecycle over an abstract network runtime. The runtime owns
//! transport and replication; this layer only consumes its contract.

pub mod loopback;
pub mod protocol;
pub mod runtime;
pub mod session;

pub use loopback::{LoopbackConfig, LoopbackHub, LoopbackRuntime};
pub use protocol::{ProtocolError, RaceMessage, WireFormat};
pub use runtime::{
    AuthorityGrant, EndReason, JoinGrant, NetworkRuntime, RuntimeError, RuntimeEvent,
    SpawnRequest, SpawnedVehicle, VehicleView,
};
pub use session::{NetworkSession, SessionError, SessionEvent, SessionPhase};
