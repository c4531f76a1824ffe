//! Finish Tracking and Race Results
//!
//! `FinishTracker` runs on the results authority. It turns (possibly
//! repeated, possibly out-of-order) finish-line crossings into one record per
//! participant with a provisional arrival place, then emits the final
//! ranking sorted by elapsed time once everyone expected has finished.
//!
//! Observers apply the replicated events to a read-only `ResultsMirror`.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::core::clock::SimTime;
use crate::game::events::{FinishRecord, RaceEvent};
use crate::game::state::{fallback_name, ParticipantId};

/// Round `elapsed` to the nearest multiple of `quantum` (ties to even).
pub fn quantize(elapsed: SimTime, quantum: f64) -> SimTime {
    if quantum <= 0.0 {
        return elapsed;
    }
    (elapsed / quantum).round_ties_even() * quantum
}

/// Re-rank records by elapsed time. Stable, so exact ties keep arrival order.
pub fn rank_by_time(records: &[FinishRecord]) -> Vec<FinishRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| a.elapsed.total_cmp(&b.elapsed));
    for (index, record) in sorted.iter_mut().enumerate() {
        record.place = index as u32 + 1;
    }
    sorted
}

// =============================================================================
// TRACKER
// =============================================================================

/// Authoritative finish bookkeeping for one race.
#[derive(Debug, Clone)]
pub struct FinishTracker {
    expected: BTreeSet<ParticipantId>,
    quantum: f64,
    /// Arrival order
    records: Vec<FinishRecord>,
    completed: bool,
}

impl FinishTracker {
    /// Track a race expecting `expected` participants.
    pub fn new<I>(expected: I, quantum: f64) -> Self
    where
        I: IntoIterator<Item = ParticipantId>,
    {
        Self {
            expected: expected.into_iter().collect(),
            quantum,
            records: Vec::new(),
            completed: false,
        }
    }

    /// Handle a crossing by `participant` at clock `now` for a race that
    /// started at `start`. Returns the events produced, possibly none.
    pub fn on_crossed(
        &mut self,
        participant: ParticipantId,
        now: SimTime,
        start: SimTime,
    ) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        if self.completed {
            debug!(participant = %participant, "crossing after race finished ignored");
            return events;
        }
        if !self.expected.contains(&participant) {
            debug!(participant = %participant, "crossing from unexpected participant ignored");
            return events;
        }
        if self.has_finished(participant) {
            return events;
        }

        let elapsed = quantize((now - start).max(0.0), self.quantum);
        let place = self.records.len() as u32 + 1;
        self.records.push(FinishRecord { participant, elapsed, place });
        info!(participant = %participant, place, elapsed, "player finished");
        events.push(RaceEvent::player_finished(participant, place, elapsed));

        self.check_complete(&mut events);
        events
    }

    /// Drop an unfinished participant (e.g. disconnected mid-race) from the
    /// expected set. May complete the race.
    pub fn withdraw(&mut self, participant: ParticipantId) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        if self.completed || self.has_finished(participant) {
            return events;
        }
        if self.expected.remove(&participant) {
            info!(%participant, remaining = self.expected.len(), "participant withdrawn");
            self.check_complete(&mut events);
        }
        events
    }

    fn check_complete(&mut self, events: &mut Vec<RaceEvent>) {
        if self.completed || self.records.is_empty() || self.records.len() < self.expected.len() {
            return;
        }
        self.completed = true;
        let results = rank_by_time(&self.records);
        info!(finishers = results.len(), "race finished");
        events.push(RaceEvent::RaceFinished(results));
    }

    /// Has this participant a record?
    pub fn has_finished(&self, participant: ParticipantId) -> bool {
        self.records.iter().any(|r| r.participant == participant)
    }

    /// Records in arrival order (provisional places).
    pub fn records(&self) -> &[FinishRecord] {
        &self.records
    }

    /// Number of participants still expected to finish or already finished.
    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    /// Has `RaceFinished` been emitted?
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Final ranking, once complete.
    pub fn results(&self) -> Option<Vec<FinishRecord>> {
        self.completed.then(|| rank_by_time(&self.records))
    }
}

// =============================================================================
// MIRROR
// =============================================================================

/// Read-only copy of the authority's results, rebuilt from its events.
#[derive(Debug, Clone, Default)]
pub struct ResultsMirror {
    provisional: Vec<FinishRecord>,
    final_results: Option<Vec<FinishRecord>>,
}

impl ResultsMirror {
    /// Empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a replicated event. Returns false for duplicates.
    pub fn apply(&mut self, event: &RaceEvent) -> bool {
        match event {
            RaceEvent::PlayerFinished(record) => {
                if self.provisional.iter().any(|r| r.participant == record.participant) {
                    return false;
                }
                self.provisional.push(*record);
                true
            }
            RaceEvent::RaceFinished(results) => {
                if self.final_results.is_some() {
                    return false;
                }
                // Finishers only known through the final list
                for record in results {
                    if !self.provisional.iter().any(|r| r.participant == record.participant) {
                        self.provisional.push(*record);
                    }
                }
                self.final_results = Some(results.clone());
                true
            }
        }
    }

    /// Per-finish records received so far, in arrival order.
    pub fn provisional(&self) -> &[FinishRecord] {
        &self.provisional
    }

    /// Final ranking, once received.
    pub fn final_results(&self) -> Option<&[FinishRecord]> {
        self.final_results.as_deref()
    }

    /// Has the final ranking arrived?
    pub fn is_complete(&self) -> bool {
        self.final_results.is_some()
    }
}

/// Leaderboard text, one `"{place}. {name}  {elapsed}s"` line per record,
/// ordered by place.
pub fn leaderboard_lines(
    records: &[FinishRecord],
    names: &BTreeMap<ParticipantId, String>,
) -> Vec<String> {
    let mut ordered = records.to_vec();
    ordered.sort_by_key(|r| r.place);
    ordered
        .iter()
        .map(|r| {
            let name = names
                .get(&r.participant)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback_name(&r.participant));
            format!("{}. {}  {:.1}s", r.place, name, r.elapsed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(10.37, 0.25), 10.25);
        assert_eq!(quantize(10.38, 0.25), 10.5);
        assert_eq!(quantize(9.0, 0.25), 9.0);
        // Ties go to even quarter
        assert_eq!(quantize(10.125, 0.25), 10.0);
        assert_eq!(quantize(10.375, 0.25), 10.5);
        assert_eq!(quantize(1.234, 0.0), 1.234);
    }

    #[test]
    fn test_dedup_and_final_ranking() {
        let (a, b, c) = (pid(1), pid(2), pid(3));
        let mut tracker = FinishTracker::new([a, b, c], 0.25);
        let start = 100.0;

        let first = tracker.on_crossed(a, start + 10.37, start);
        assert_eq!(first, vec![RaceEvent::player_finished(a, 1, 10.25)]);

        // Geometry re-entry
        assert!(tracker.on_crossed(a, start + 12.0, start).is_empty());

        // B arrives later in delivery but with a better time
        let second = tracker.on_crossed(b, start + 9.0, start);
        assert_eq!(second, vec![RaceEvent::player_finished(b, 2, 9.0)]);
        assert!(!tracker.is_complete());

        let third = tracker.on_crossed(c, start + 11.0, start);
        assert_eq!(third.len(), 2);
        assert_eq!(third[0], RaceEvent::player_finished(c, 3, 11.0));
        assert_eq!(
            third[1],
            RaceEvent::RaceFinished(vec![
                FinishRecord { participant: b, elapsed: 9.0, place: 1 },
                FinishRecord { participant: a, elapsed: 10.25, place: 2 },
                FinishRecord { participant: c, elapsed: 11.0, place: 3 },
            ])
        );
        assert_eq!(tracker.records().len(), 3);
        assert!(tracker.on_crossed(c, start + 20.0, start).is_empty());
    }

    #[test]
    fn test_unexpected_and_early_crossings() {
        let a = pid(1);
        let mut tracker = FinishTracker::new([a], 0.25);

        assert!(tracker.on_crossed(pid(9), 5.0, 0.0).is_empty());

        // Crossing before the start instant clamps to zero
        let events = tracker.on_crossed(a, 95.0, 100.0);
        assert_eq!(events[0], RaceEvent::player_finished(a, 1, 0.0));
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_exact_ties_keep_arrival_order() {
        let (a, b) = (pid(1), pid(2));
        let mut tracker = FinishTracker::new([a, b], 0.25);
        tracker.on_crossed(b, 10.1, 0.0);
        let events = tracker.on_crossed(a, 9.9, 0.0);

        // Both quantize to 10.0
        let RaceEvent::RaceFinished(results) = &events[1] else {
            panic!("expected final results");
        };
        assert_eq!(results[0].participant, b);
        assert_eq!(results[1].participant, a);
    }

    #[test]
    fn test_withdraw_completes_race() {
        let (a, b) = (pid(1), pid(2));
        let mut tracker = FinishTracker::new([a, b], 0.25);
        tracker.on_crossed(a, 15.0, 0.0);
        assert!(!tracker.is_complete());

        // Finished participants cannot be withdrawn
        assert!(tracker.withdraw(a).is_empty());

        let events = tracker.withdraw(b);
        assert_eq!(
            events,
            vec![RaceEvent::RaceFinished(vec![FinishRecord {
                participant: a,
                elapsed: 15.0,
                place: 1,
            }])]
        );
        assert_eq!(tracker.results().unwrap().len(), 1);
    }

    #[test]
    fn test_final_order_independent_of_arrival() {
        let times = [(pid(1), 12.0), (pid(2), 9.5), (pid(3), 30.25), (pid(4), 11.0)];
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let mut arrivals = times.to_vec();
            arrivals.shuffle(&mut rng);
            let mut tracker = FinishTracker::new(times.iter().map(|(p, _)| *p), 0.25);
            for (p, t) in &arrivals {
                tracker.on_crossed(*p, *t, 0.0);
            }
            let order: Vec<_> = tracker.results().unwrap().iter().map(|r| r.participant).collect();
            assert_eq!(order, vec![pid(2), pid(4), pid(1), pid(3)]);
        }
    }

    #[test]
    fn test_mirror_is_idempotent() {
        let (a, b) = (pid(1), pid(2));
        let mut mirror = ResultsMirror::new();
        let finished = RaceEvent::player_finished(a, 1, 15.0);

        assert!(mirror.apply(&finished));
        assert!(!mirror.apply(&finished));

        let done = RaceEvent::RaceFinished(vec![
            FinishRecord { participant: a, elapsed: 15.0, place: 1 },
            FinishRecord { participant: b, elapsed: 20.0, place: 2 },
        ]);
        assert!(mirror.apply(&done));
        assert!(!mirror.apply(&done));
        assert_eq!(mirror.provisional().len(), 2);
        assert_eq!(mirror.final_results().unwrap()[1].participant, b);
        assert!(mirror.is_complete());
    }

    #[test]
    fn test_leaderboard_lines() {
        let (a, b) = (ParticipantId::new([0xab; 16]), pid(2));
        let records = [
            FinishRecord { participant: b, elapsed: 20.0, place: 2 },
            FinishRecord { participant: a, elapsed: 15.5, place: 1 },
        ];
        let names: BTreeMap<_, _> = [(b, "Bob".to_string())].into_iter().collect();

        assert_eq!(
            leaderboard_lines(&records, &names),
            vec!["1. Player abababab  15.5s".to_string(), "2. Bob  20.0s".to_string()]
        );
    }

    proptest! {
        #[test]
        fn prop_crossings_produce_consistent_results(
            crossings in prop::collection::vec((0u8..5, 0.0f64..120.0), 0..40)
        ) {
            let expected: Vec<_> = (0u8..5).map(pid).collect();
            let mut tracker = FinishTracker::new(expected.iter().copied(), 0.25);
            let mut finished_events = 0;
            let mut final_results = None;

            for (who, t) in &crossings {
                for event in tracker.on_crossed(pid(*who), *t, 0.0) {
                    match event {
                        RaceEvent::PlayerFinished(record) => {
                            finished_events += 1;
                            prop_assert_eq!(record.place as usize, finished_events);
                            prop_assert!(record.elapsed >= 0.0);
                            prop_assert_eq!(record.elapsed, quantize(record.elapsed, 0.25));
                        }
                        RaceEvent::RaceFinished(results) => {
                            prop_assert!(final_results.is_none());
                            final_results = Some(results);
                        }
                    }
                }
            }

            // One record per distinct participant
            let distinct: BTreeSet<_> = crossings.iter().map(|(who, _)| *who).collect();
            prop_assert_eq!(tracker.records().len(), distinct.len());
            prop_assert_eq!(finished_events, distinct.len());

            if let Some(results) = final_results {
                prop_assert_eq!(results.len(), expected.len());
                let places: Vec<u32> = results.iter().map(|r| r.place).collect();
                prop_assert_eq!(places, (1..=expected.len() as u32).collect::<Vec<_>>());
                prop_assert!(results.windows(2).all(|w| w[0].elapsed <= w[1].elapsed));
            } else {
                prop_assert!(distinct.len() < expected.len());
            }
        }
    }
}
