//! Core primitives.
//!
//! Nothing in this module knows about races or participants. It provides the
//! shared clock, single-writer replicated values and cancellation that the
//! game and network layers are built on.

pub mod cancel;
pub mod clock;
pub mod replicated;
pub mod vec2;

// Re-export core types
pub use cancel::{cancel_pair, CancelSignal, CancelTrigger};
pub use clock::{ClockHandle, ClockWriter, SimTime, StartObserver, StartPublisher};
pub use replicated::{Authoritative, Replica, WaitError};
pub use vec2::Vec2;
