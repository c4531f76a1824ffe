//! # Race Sync
//!
//! Session and race synchronization core for networked multiplayer racing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         RACE SYNC                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Runtime-agnostic primitives               │
//! │  ├── clock.rs    - Shared simulation clock, start instant    │
//! │  ├── replicated.rs - Single-writer replicated values         │
//! │  ├── cancel.rs   - Session-scoped cancellation               │
//! │  └── vec2.rs     - 2D vector math                            │
//! │                                                              │
//! │  network/        - Session layer                             │
//! │  ├── runtime.rs  - Network runtime contract                  │
//! │  ├── session.rs  - Lifecycle, authority, participant events  │
//! │  ├── protocol.rs - Replicated result messages                │
//! │  └── loopback.rs - In-process runtime                        │
//! │                                                              │
//! │  game/           - Race logic                                │
//! │  ├── roster.rs   - Lobby roster                              │
//! │  ├── countdown.rs- Clock-gated countdown                     │
//! │  ├── vehicle.rs  - Vehicle physics and state authority       │
//! │  ├── tick.rs     - Host tick loop, finish-line detection     │
//! │  ├── finish.rs   - Finish tracking and final ranking         │
//! │  └── race.rs     - One race end to end                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Exactly one participant (the host) owns the simulation clock, the race
//! start instant, every vehicle's physical state and the finish results.
//! Write handles for those exist only in the host's `AuthorityGrant`;
//! everyone else holds read replicas. Observers therefore agree with the
//! host by construction rather than by convention.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::{CarConfig, RaceConfig};
pub use core::clock::SimTime;
pub use core::vec2::Vec2;
pub use game::events::{CountdownEvent, FinishRecord, RaceEvent};
pub use game::race::{RaceError, RaceSystem};
pub use game::roster::LobbyRoster;
pub use game::state::ParticipantId;
pub use network::runtime::{EndReason, NetworkRuntime};
pub use network::session::{NetworkSession, SessionEvent, SessionPhase};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Host simulation tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Countdown length in seconds of simulation time
pub const DEFAULT_COUNTDOWN_SECONDS: u32 = 3;

/// Finish times are rounded to a multiple of this (seconds)
pub const FINISH_TIME_QUANTUM: f64 = 0.25;
