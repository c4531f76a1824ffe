//! Race Logic Module
//!
//! Everything above the session: who is in the lobby, the synchronized
//! countdown, vehicle authority, and finish bookkeeping.
//!
//! ## Module Structure
//!
//! - `state`: Participant and vehicle identities
//! - `input`: Quantized driver input
//! - `roster`: Lobby roster with display names
//! - `countdown`: Clock-gated countdown
//! - `vehicle`: Vehicle physics and state authority
//! - `track`: Spawn grid, finish line, standings
//! - `spawn`: Authority-side grid spawning
//! - `tick`: Host simulation loop and finish-line detection
//! - `finish`: Finish tracking, final ranking, observer mirror
//! - `race`: One race end to end
//! - `events`: Countdown and finish events

pub mod countdown;
pub mod events;
pub mod finish;
pub mod input;
pub mod race;
pub mod roster;
pub mod spawn;
pub mod state;
pub mod tick;
pub mod track;
pub mod vehicle;

// Re-export key types
pub use countdown::{CountdownCoordinator, CountdownError};
pub use events::{CountdownEvent, FinishRecord, RaceEvent};
pub use finish::{leaderboard_lines, FinishTracker, ResultsMirror};
pub use input::InputFrame;
pub use race::{RaceError, RaceSystem};
pub use roster::{LobbyRoster, RosterBackend, RosterEntry};
pub use state::{Participant, ParticipantId, VehicleId};
pub use tick::{Crossing, FinishSignal, Simulation, TickLoop, TickResult};
pub use track::{FinishLine, SpawnPoint, Track};
pub use vehicle::{VehicleAuthorityController, VehicleBody};
