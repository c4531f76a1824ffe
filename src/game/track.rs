//! Track Geometry
//!
//! Spawn points, the finish line, and live standings by distance to the
//! finish.

use serde::{Deserialize, Serialize};

use crate::core::vec2::Vec2;
use crate::game::state::ParticipantId;

/// Where a vehicle starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    /// Position on the track plane
    pub position: Vec2,
    /// Heading (radians, clockwise from +y)
    pub heading: f32,
}

/// Finish line segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinishLine {
    /// One end
    pub a: Vec2,
    /// Other end
    pub b: Vec2,
}

impl FinishLine {
    /// Create a finish line.
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self { a, b }
    }

    /// Midpoint, the reference for standings.
    pub fn midpoint(&self) -> Vec2 {
        (self.a + self.b) * 0.5
    }

    /// Did a vehicle moving from `prev` to `next` this tick cross the line?
    ///
    /// Either direction counts. Touching the line from one side counts as
    /// crossing; the finish tracker absorbs the re-entries.
    pub fn crossed(&self, prev: Vec2, next: Vec2) -> bool {
        let line = self.b - self.a;
        let path = next - prev;

        let d1 = line.cross(prev - self.a);
        let d2 = line.cross(next - self.a);
        let d3 = path.cross(self.a - prev);
        let d4 = path.cross(self.b - prev);

        // Path endpoints straddle the line and line endpoints straddle the path
        let straddles_line = (d1 <= 0.0 && d2 >= 0.0) || (d1 >= 0.0 && d2 <= 0.0);
        let straddles_path = (d3 <= 0.0 && d4 >= 0.0) || (d3 >= 0.0 && d4 <= 0.0);

        // A stationary vehicle (or a degenerate path) never crosses
        path.length_squared() > 0.0 && d1 != d2 && straddles_line && straddles_path
    }
}

/// A race track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Starting grid, used round-robin
    pub spawn_points: Vec<SpawnPoint>,
    /// Finish line
    pub finish: FinishLine,
}

impl Track {
    /// Create a track.
    pub fn new(spawn_points: Vec<SpawnPoint>, finish: FinishLine) -> Self {
        Self { spawn_points, finish }
    }

    /// A straight drag strip along +y: `lanes` spawn points 4 units apart
    /// at `y = 0`, finish line at `y = length`.
    pub fn straight(length: f32, lanes: usize) -> Self {
        let lanes = lanes.max(1);
        let spacing = 4.0;
        let half_width = spacing * lanes as f32;
        let offset = spacing * (lanes as f32 - 1.0) / 2.0;

        let spawn_points = (0..lanes)
            .map(|i| SpawnPoint {
                position: Vec2::new(i as f32 * spacing - offset, 0.0),
                heading: 0.0,
            })
            .collect();

        Self {
            spawn_points,
            finish: FinishLine::new(
                Vec2::new(-half_width, length),
                Vec2::new(half_width, length),
            ),
        }
    }

    /// Spawn point for the `index`-th vehicle, wrapping around the grid.
    pub fn spawn_point(&self, index: usize) -> Option<SpawnPoint> {
        if self.spawn_points.is_empty() {
            return None;
        }
        Some(self.spawn_points[index % self.spawn_points.len()])
    }

    /// Distance from a position to the finish reference point.
    pub fn distance_to_finish(&self, position: Vec2) -> f32 {
        position.distance(self.finish.midpoint())
    }

    /// Participants ordered closest-to-finish first.
    ///
    /// Participants without a known position rank last; ties keep input order.
    pub fn standings<I>(&self, positions: I) -> Vec<ParticipantId>
    where
        I: IntoIterator<Item = (ParticipantId, Option<Vec2>)>,
    {
        let mut ranked: Vec<(ParticipantId, f32)> = positions
            .into_iter()
            .map(|(id, pos)| {
                let dist = pos.map(|p| self.distance_to_finish(p)).unwrap_or(f32::MAX);
                (id, dist)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.into_iter().map(|(id, _)| id).collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_detection() {
        let line = FinishLine::new(Vec2::new(-5.0, 10.0), Vec2::new(5.0, 10.0));

        assert!(line.crossed(Vec2::new(0.0, 9.9), Vec2::new(0.0, 10.1)));
        assert!(line.crossed(Vec2::new(0.0, 10.1), Vec2::new(0.0, 9.9)));
        assert!(!line.crossed(Vec2::new(0.0, 8.0), Vec2::new(0.0, 9.0)));
        // Beyond the end of the segment
        assert!(!line.crossed(Vec2::new(6.0, 9.9), Vec2::new(6.0, 10.1)));
        // Stationary on the line
        assert!(!line.crossed(Vec2::new(0.0, 10.0), Vec2::new(0.0, 10.0)));
    }

    #[test]
    fn test_spawn_points_wrap() {
        let track = Track::straight(100.0, 2);
        assert_eq!(track.spawn_points.len(), 2);
        assert_eq!(track.spawn_point(0).unwrap().position, Vec2::new(-2.0, 0.0));
        assert_eq!(track.spawn_point(1).unwrap().position, Vec2::new(2.0, 0.0));
        assert_eq!(track.spawn_point(2), track.spawn_point(0));

        let empty = Track::new(Vec::new(), track.finish);
        assert!(empty.spawn_point(0).is_none());
    }

    #[test]
    fn test_standings_by_distance() {
        let track = Track::straight(100.0, 3);
        let a = ParticipantId::new([1; 16]);
        let b = ParticipantId::new([2; 16]);
        let c = ParticipantId::new([3; 16]);

        let positions = vec![
            (a, Some(Vec2::new(0.0, 40.0))),
            (b, None),
            (c, Some(Vec2::new(0.0, 70.0))),
        ];
        assert_eq!(track.standings(positions), vec![c, a, b]);
    }
}
