//! Race Events
//!
//! Discrete events exposed to presentation collaborators: countdown ticks
//! and finish results.

use serde::{Deserialize, Serialize};

use crate::core::clock::SimTime;
use crate::game::state::ParticipantId;

/// One step of the synchronized countdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownEvent {
    /// Seconds remaining, strictly decreasing from `countdown_seconds` to 1.
    Tick(u32),
    /// Terminal event, emitted once.
    Go,
}

impl CountdownEvent {
    /// Is this the terminal event?
    pub fn is_go(&self) -> bool {
        matches!(self, CountdownEvent::Go)
    }
}

/// Result for one participant's race completion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinishRecord {
    /// Who finished
    pub participant: ParticipantId,
    /// Quantized time since the race start instant (>= 0)
    pub elapsed: SimTime,
    /// 1-based place
    pub place: u32,
}

/// Finish events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RaceEvent {
    /// A participant crossed the line. `place` is provisional arrival order.
    PlayerFinished(FinishRecord),

    /// Everyone expected has finished. Sorted by elapsed time ascending with
    /// places reassigned 1..N; this is the order of record.
    RaceFinished(Vec<FinishRecord>),
}

impl RaceEvent {
    /// Create a player finished event.
    pub fn player_finished(participant: ParticipantId, place: u32, elapsed: SimTime) -> Self {
        RaceEvent::PlayerFinished(FinishRecord { participant, elapsed, place })
    }

    /// Participant involved, if the event concerns a single one.
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            RaceEvent::PlayerFinished(record) => Some(record.participant),
            RaceEvent::RaceFinished(_) => None,
        }
    }

    /// Is this the terminal event?
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaceEvent::RaceFinished(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let id = ParticipantId::new([1; 16]);
        let finished = RaceEvent::player_finished(id, 1, 12.5);
        assert_eq!(finished.participant(), Some(id));
        assert!(!finished.is_terminal());

        let done = RaceEvent::RaceFinished(Vec::new());
        assert_eq!(done.participant(), None);
        assert!(done.is_terminal());

        assert!(CountdownEvent::Go.is_go());
        assert!(!CountdownEvent::Tick(1).is_go());
    }
}
