//! Vehicle Spawning
//!
//! The authority spawns one vehicle per participant, placing them round-robin
//! on the track's grid and naming each from the roster.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::game::state::ParticipantId;
use crate::game::track::Track;
use crate::network::runtime::{NetworkRuntime, RuntimeError, SpawnRequest, SpawnedVehicle};

/// Spawns the starting grid. Only the authority may call it.
pub struct VehicleSpawner {
    runtime: Arc<dyn NetworkRuntime>,
    track: Track,
}

impl VehicleSpawner {
    /// Create a spawner for a track.
    pub fn new(runtime: Arc<dyn NetworkRuntime>, track: Track) -> Self {
        Self { runtime, track }
    }

    /// Spawn a vehicle for every participant, in order.
    ///
    /// Names come from `names`; participants without one get `"Player {n}"`
    /// (1-based grid slot).
    pub async fn spawn_all(
        &self,
        participants: &[ParticipantId],
        names: &BTreeMap<ParticipantId, String>,
    ) -> Result<Vec<SpawnedVehicle>, RuntimeError> {
        let mut spawned = Vec::with_capacity(participants.len());

        for (i, participant) in participants.iter().enumerate() {
            let Some(point) = self.track.spawn_point(i) else {
                debug!("track has no spawn points");
                break;
            };

            let display_name = names
                .get(participant)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("Player {}", i + 1));

            let request = SpawnRequest {
                owner: *participant,
                position: point.position,
                heading: 0.0,
                display_name,
            };
            let heading = point.heading;
            let vehicle = self
                .runtime
                .spawn_vehicle(request, Box::new(move |body| body.heading = heading))
                .await?;

            info!(
                vehicle = %vehicle.view.id,
                owner = %participant,
                name = %vehicle.view.display_name,
                "vehicle spawned"
            );
            spawned.push(vehicle);
        }

        Ok(spawned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::loopback::LoopbackHub;

    #[tokio::test]
    async fn test_spawn_all_names_and_places() {
        let hub = LoopbackHub::default();
        let host = Arc::new(hub.runtime());
        let client = hub.runtime();
        let h = host.join_or_host("lobby").await.unwrap().local;
        let c = client.join_or_host("lobby").await.unwrap().local;

        let mut track = Track::straight(100.0, 2);
        track.spawn_points[1].heading = 0.5;
        let spawner = VehicleSpawner::new(host.clone(), track);
        let names: BTreeMap<_, _> = [(h, "Ann".to_string())].into_iter().collect();

        let spawned = spawner.spawn_all(&[h, c], &names).await.unwrap();
        assert_eq!(spawned.len(), 2);
        assert_eq!(spawned[0].view.display_name, "Ann");
        assert_eq!(spawned[1].view.display_name, "Player 2");

        let remote = client.vehicle_of(c).unwrap();
        assert_eq!(remote.owner, c);
        assert_eq!(remote.state.get().position, crate::core::vec2::Vec2::new(2.0, 0.0));
        assert_eq!(remote.state.get().heading, 0.5);
    }

    #[tokio::test]
    async fn test_non_authority_cannot_spawn() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = Arc::new(hub.runtime());
        host.join_or_host("lobby").await.unwrap();
        let c = client.join_or_host("lobby").await.unwrap().local;

        let spawner = VehicleSpawner::new(client, Track::straight(100.0, 2));
        let err = spawner.spawn_all(&[c], &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err, RuntimeError::NotAuthority);
    }
}
