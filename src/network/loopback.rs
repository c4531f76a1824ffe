//! In-Process Network Runtime
//!
//! `LoopbackHub` hosts any number of named sessions in memory and hands out
//! `LoopbackRuntime` connections to them. Delivery is immediate and in
//! order; it is the reference implementation of `NetworkRuntime` used by
//! tests and the demo binary.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::core::clock::{race_start_cell, sim_clock, ClockHandle, StartObserver};
use crate::core::replicated::replicated;
use crate::game::input::InputFrame;
use crate::game::state::{ParticipantId, VehicleId};
use crate::game::vehicle::VehicleBody;
use crate::network::runtime::{
    AuthorityGrant, EndReason, JoinGrant, NetworkRuntime, RuntimeError, RuntimeEvent,
    SpawnInit, SpawnRequest, SpawnedVehicle, VehicleView,
};

/// Per-connection event buffer.
const EVENT_CAPACITY: usize = 256;

/// Loopback hub configuration.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Maximum participants per session
    pub max_participants: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self { max_participants: 8 }
    }
}

// =============================================================================
// HUB
// =============================================================================

struct Member {
    id: ParticipantId,
    events: broadcast::Sender<RuntimeEvent>,
    reliable: broadcast::Sender<Vec<u8>>,
    input: Option<InputFrame>,
    /// Avatar display name, state-authority copy
    name: watch::Sender<Option<String>>,
}

struct HubSession {
    host: ParticipantId,
    next_slot: u32,
    next_vehicle: u32,
    /// Join order
    members: Vec<Member>,
    authority: AuthorityGrant,
    vehicles: BTreeMap<VehicleId, VehicleView>,
    vehicle_of: BTreeMap<ParticipantId, VehicleId>,
}

impl HubSession {
    fn new(host: ParticipantId) -> Self {
        let (clock, _) = sim_clock(0.0);
        let (race_start, _) = race_start_cell();
        Self {
            host,
            next_slot: 0,
            next_vehicle: 1,
            members: Vec::new(),
            authority: AuthorityGrant { clock, race_start },
            vehicles: BTreeMap::new(),
            vehicle_of: BTreeMap::new(),
        }
    }

    fn member(&self, id: ParticipantId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    fn member_mut(&mut self, id: ParticipantId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    fn broadcast(&self, event: RuntimeEvent) {
        for member in &self.members {
            let _ = member.events.send(event);
        }
    }

    /// Remove a member and its vehicle. Returns the removed member.
    fn remove(&mut self, id: ParticipantId) -> Option<Member> {
        let index = self.members.iter().position(|m| m.id == id)?;
        let member = self.members.remove(index);
        if let Some(vehicle) = self.vehicle_of.remove(&id) {
            self.vehicles.remove(&vehicle);
        }
        Some(member)
    }
}

#[derive(Default)]
struct HubState {
    sessions: BTreeMap<String, HubSession>,
}

/// In-memory session host shared by every loopback connection.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
    config: Arc<LoopbackConfig>,
}

impl LoopbackHub {
    /// Create a hub.
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            config: Arc::new(config),
        }
    }

    /// Open a new (unconnected) runtime on this hub.
    pub fn runtime(&self) -> LoopbackRuntime {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (reliable, _) = broadcast::channel(EVENT_CAPACITY);
        LoopbackRuntime {
            hub: self.clone(),
            events,
            reliable,
            connection: Mutex::new(None),
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Participants in a session, in join order.
    pub fn participants(&self, session_name: &str) -> Vec<ParticipantId> {
        self.state
            .lock()
            .sessions
            .get(session_name)
            .map(|s| s.members.iter().map(|m| m.id).collect())
            .unwrap_or_default()
    }

    /// Simulate a lost connection for one participant.
    ///
    /// The dropped participant sees `Shutdown(Disconnected)`; the rest see
    /// it leave, or `Shutdown(HostShutdown)` if it was the host.
    pub fn drop_connection(&self, session_name: &str, participant: ParticipantId) {
        let mut state = self.state.lock();
        let Some(session) = state.sessions.get_mut(session_name) else {
            return;
        };
        let Some(member) = session.remove(participant) else {
            return;
        };
        warn!(session = session_name, participant = %participant, "connection dropped");
        let _ = member.events.send(RuntimeEvent::Shutdown(EndReason::Disconnected));

        if participant == session.host {
            session.broadcast(RuntimeEvent::Shutdown(EndReason::HostShutdown));
            state.sessions.remove(session_name);
        } else {
            session.broadcast(RuntimeEvent::ParticipantLeft(participant));
        }
    }

    fn join(
        &self,
        session_name: &str,
        events: &broadcast::Sender<RuntimeEvent>,
        reliable: &broadcast::Sender<Vec<u8>>,
    ) -> Result<JoinGrant, RuntimeError> {
        if session_name.trim().is_empty() {
            return Err(RuntimeError::InvalidSessionName(session_name.to_string()));
        }

        let mut state = self.state.lock();
        if let Some(existing) = state.sessions.get(session_name) {
            if existing.members.len() >= self.config.max_participants {
                return Err(RuntimeError::SessionFull);
            }
        }

        let session = state
            .sessions
            .entry(session_name.to_string())
            .or_insert_with(|| HubSession::new(ParticipantId::derive(session_name, 0)));

        let local = ParticipantId::derive(session_name, session.next_slot);
        session.next_slot += 1;
        let is_host = local == session.host;

        // Existing members learn about the newcomer
        session.broadcast(RuntimeEvent::ParticipantJoined(local));

        // The newcomer learns about everyone, itself last
        for member in &session.members {
            let _ = events.send(RuntimeEvent::ParticipantJoined(member.id));
        }
        let _ = events.send(RuntimeEvent::ParticipantJoined(local));

        let (name, _) = watch::channel(None);
        session.members.push(Member {
            id: local,
            events: events.clone(),
            reliable: reliable.clone(),
            input: None,
            name,
        });

        info!(
            session = session_name,
            participant = %local,
            host = is_host,
            members = session.members.len(),
            "participant connected"
        );

        Ok(JoinGrant {
            session_name: session_name.to_string(),
            local,
            host: session.host,
            authority: is_host.then(|| session.authority.share()),
        })
    }
}

// =============================================================================
// RUNTIME
// =============================================================================

#[derive(Debug, Clone)]
struct Connection {
    session_name: String,
    local: ParticipantId,
}

/// One participant's connection to a `LoopbackHub`.
pub struct LoopbackRuntime {
    hub: LoopbackHub,
    events: broadcast::Sender<RuntimeEvent>,
    reliable: broadcast::Sender<Vec<u8>>,
    connection: Mutex<Option<Connection>>,
}

impl LoopbackRuntime {
    /// Local participant, while connected.
    pub fn local(&self) -> Option<ParticipantId> {
        self.connection.lock().as_ref().map(|c| c.local)
    }

    /// Deliver a raw event to this runtime's subscribers only.
    #[cfg(test)]
    pub(crate) fn inject(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    /// Run `f` against this runtime's session, if it still has us as a member.
    fn with_session<R>(&self, f: impl FnOnce(&mut HubSession, ParticipantId) -> R) -> Option<R> {
        let connection = self.connection.lock().clone()?;
        let mut state = self.hub.state.lock();
        let session = state.sessions.get_mut(&connection.session_name)?;
        session.member(connection.local)?;
        Some(f(session, connection.local))
    }
}

#[async_trait]
impl NetworkRuntime for LoopbackRuntime {
    async fn join_or_host(&self, session_name: &str) -> Result<JoinGrant, RuntimeError> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(RuntimeError::AlreadyConnected);
        }
        let grant = self.hub.join(session_name, &self.events, &self.reliable)?;
        *connection = Some(Connection {
            session_name: grant.session_name.clone(),
            local: grant.local,
        });
        Ok(grant)
    }

    async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };

        let mut state = self.hub.state.lock();
        let Some(session) = state.sessions.get_mut(&connection.session_name) else {
            return;
        };
        if session.remove(connection.local).is_none() {
            return;
        }
        debug!(session = %connection.session_name, participant = %connection.local, "disconnected");
        let _ = self.events.send(RuntimeEvent::Shutdown(EndReason::LocalShutdown));

        if connection.local == session.host {
            session.broadcast(RuntimeEvent::Shutdown(EndReason::HostShutdown));
            state.sessions.remove(&connection.session_name);
            info!(session = %connection.session_name, "host left, session closed");
        } else {
            session.broadcast(RuntimeEvent::ParticipantLeft(connection.local));
            if session.members.is_empty() {
                state.sessions.remove(&connection.session_name);
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    fn active_participants(&self) -> Vec<ParticipantId> {
        self.with_session(|s, _| s.members.iter().map(|m| m.id).collect())
            .unwrap_or_default()
    }

    fn clock(&self) -> Option<ClockHandle> {
        self.with_session(|s, _| s.authority.clock.handle())
    }

    fn race_start(&self) -> Option<StartObserver> {
        self.with_session(|s, _| s.authority.race_start.observer())
    }

    fn provide_input(&self, input: InputFrame) {
        self.with_session(|s, local| {
            if let Some(member) = s.member_mut(local) {
                member.input = Some(input);
            }
        });
    }

    fn input_for(&self, participant: ParticipantId) -> Option<InputFrame> {
        self.with_session(|s, _| s.member(participant).and_then(|m| m.input))
            .flatten()
    }

    fn display_name(&self, participant: ParticipantId) -> Option<watch::Receiver<Option<String>>> {
        self.with_session(|s, _| s.member(participant).map(|m| m.name.subscribe()))
            .flatten()
    }

    async fn rpc_set_display_name(
        &self,
        target: ParticipantId,
        name: String,
    ) -> Result<(), RuntimeError> {
        self.with_session(|s, caller| {
            if caller != target {
                return Err(RuntimeError::RpcRejected);
            }
            let member = s.member(target).ok_or(RuntimeError::UnknownParticipant(target))?;
            member.name.send_replace(Some(name));
            Ok(())
        })
        .unwrap_or(Err(RuntimeError::NotConnected))
    }

    async fn spawn_vehicle(
        &self,
        request: SpawnRequest,
        init: SpawnInit,
    ) -> Result<SpawnedVehicle, RuntimeError> {
        self.with_session(|s, caller| {
            if caller != s.host {
                return Err(RuntimeError::NotAuthority);
            }
            if s.member(request.owner).is_none() {
                return Err(RuntimeError::UnknownParticipant(request.owner));
            }

            let mut body = VehicleBody::at(request.position, request.heading);
            init(&mut body);
            let (writer, state) = replicated(body);

            let id = VehicleId(s.next_vehicle);
            s.next_vehicle += 1;
            let view = VehicleView {
                id,
                owner: request.owner,
                display_name: request.display_name,
                state,
            };
            if let Some(previous) = s.vehicle_of.insert(request.owner, id) {
                s.vehicles.remove(&previous);
            }
            s.vehicles.insert(id, view.clone());

            debug!(
                vehicle = %id,
                owner = %request.owner,
                name = %view.display_name,
                "vehicle spawned"
            );
            Ok(SpawnedVehicle { view, writer })
        })
        .unwrap_or(Err(RuntimeError::NotConnected))
    }

    fn vehicle_of(&self, participant: ParticipantId) -> Option<VehicleView> {
        self.with_session(|s, _| {
            s.vehicle_of
                .get(&participant)
                .and_then(|id| s.vehicles.get(id))
                .cloned()
        })
        .flatten()
    }

    fn send_reliable(&self, payload: Vec<u8>) -> Result<(), RuntimeError> {
        self.with_session(|s, local| {
            for member in s.members.iter().filter(|m| m.id != local) {
                let _ = member.reliable.send(payload.clone());
            }
        })
        .ok_or(RuntimeError::NotConnected)
    }

    fn subscribe_reliable(&self) -> broadcast::Receiver<Vec<u8>> {
        self.reliable.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;

    fn drain(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_first_joiner_hosts() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();

        let host_grant = host.join_or_host("lobby").await.unwrap();
        let client_grant = client.join_or_host("lobby").await.unwrap();

        assert!(host_grant.is_authority());
        assert!(!client_grant.is_authority());
        assert_eq!(client_grant.host, host_grant.local);
        assert_ne!(client_grant.local, host_grant.local);
        assert_eq!(hub.participants("lobby"), vec![host_grant.local, client_grant.local]);
        assert_eq!(client.join_or_host("lobby").await.unwrap_err(), RuntimeError::AlreadyConnected);
    }

    #[tokio::test]
    async fn test_join_failures_leave_no_state() {
        let hub = LoopbackHub::new(LoopbackConfig { max_participants: 1 });
        let first = hub.runtime();
        let second = hub.runtime();

        assert!(matches!(
            first.join_or_host("  ").await,
            Err(RuntimeError::InvalidSessionName(_))
        ));
        assert_eq!(hub.session_count(), 0);

        first.join_or_host("lobby").await.unwrap();
        assert_eq!(second.join_or_host("lobby").await.unwrap_err(), RuntimeError::SessionFull);
        assert_eq!(hub.participants("lobby").len(), 1);
        assert!(second.local().is_none());
    }

    #[tokio::test]
    async fn test_join_and_leave_events() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        let mut host_rx = host.subscribe();
        let mut client_rx = client.subscribe();

        let h = host.join_or_host("lobby").await.unwrap().local;
        let c = client.join_or_host("lobby").await.unwrap().local;

        assert_eq!(
            drain(&mut host_rx),
            vec![RuntimeEvent::ParticipantJoined(h), RuntimeEvent::ParticipantJoined(c)]
        );
        assert_eq!(
            drain(&mut client_rx),
            vec![RuntimeEvent::ParticipantJoined(h), RuntimeEvent::ParticipantJoined(c)]
        );

        client.disconnect().await;
        assert_eq!(drain(&mut host_rx), vec![RuntimeEvent::ParticipantLeft(c)]);
        assert_eq!(
            drain(&mut client_rx),
            vec![RuntimeEvent::Shutdown(EndReason::LocalShutdown)]
        );

        // Second disconnect is a no-op
        client.disconnect().await;
        assert!(drain(&mut client_rx).is_empty());
    }

    #[tokio::test]
    async fn test_host_leaving_ends_session() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        host.join_or_host("lobby").await.unwrap();
        client.join_or_host("lobby").await.unwrap();
        let mut client_rx = client.subscribe();

        host.disconnect().await;
        assert_eq!(
            drain(&mut client_rx),
            vec![RuntimeEvent::Shutdown(EndReason::HostShutdown)]
        );
        assert_eq!(hub.session_count(), 0);
        assert!(client.clock().is_none());
    }

    #[tokio::test]
    async fn test_drop_connection() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        host.join_or_host("lobby").await.unwrap();
        let c = client.join_or_host("lobby").await.unwrap().local;
        let mut host_rx = host.subscribe();
        let mut client_rx = client.subscribe();

        hub.drop_connection("lobby", c);
        assert_eq!(drain(&mut client_rx), vec![RuntimeEvent::Shutdown(EndReason::Disconnected)]);
        assert_eq!(drain(&mut host_rx), vec![RuntimeEvent::ParticipantLeft(c)]);
        assert!(client.display_name(c).is_none());
    }

    #[tokio::test]
    async fn test_clock_is_shared_read_only_for_clients() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        let grant = host.join_or_host("lobby").await.unwrap();
        client.join_or_host("lobby").await.unwrap();

        let authority = grant.authority.unwrap();
        authority.clock.set(42.0);
        authority.race_start.publish(45.0).unwrap();

        assert_eq!(client.clock().unwrap().now(), 42.0);
        assert_eq!(client.race_start().unwrap().get(), Some(45.0));
    }

    #[tokio::test]
    async fn test_display_name_rpc() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        let h = host.join_or_host("lobby").await.unwrap().local;
        let c = client.join_or_host("lobby").await.unwrap().local;

        let name = host.display_name(c).unwrap();
        assert_eq!(*name.borrow(), None);

        assert_eq!(
            host.rpc_set_display_name(c, "Mallory".into()).await,
            Err(RuntimeError::RpcRejected)
        );
        client.rpc_set_display_name(c, "Bob".into()).await.unwrap();
        assert_eq!(name.borrow().as_deref(), Some("Bob"));

        client.disconnect().await;
        assert!(host.display_name(c).is_none());
        assert!(host.display_name(h).is_some());
    }

    #[tokio::test]
    async fn test_spawn_and_input() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        host.join_or_host("lobby").await.unwrap();
        let c = client.join_or_host("lobby").await.unwrap().local;

        let request = SpawnRequest {
            owner: c,
            position: Vec2::new(1.0, 2.0),
            heading: 0.0,
            display_name: "Bob".into(),
        };
        assert_eq!(
            client
                .spawn_vehicle(request.clone(), Box::new(|_| {}))
                .await
                .unwrap_err(),
            RuntimeError::NotAuthority
        );

        let spawned = host
            .spawn_vehicle(request, Box::new(|body| body.heading = 1.0))
            .await
            .unwrap();
        let seen = client.vehicle_of(c).unwrap();
        assert_eq!(seen.id, spawned.view.id);
        assert_eq!(seen.state.get().heading, 1.0);

        spawned.writer.modify(|b| {
            b.position = Vec2::new(5.0, 5.0);
            true
        });
        assert_eq!(seen.state.get().position, Vec2::new(5.0, 5.0));

        assert_eq!(host.input_for(c), None);
        client.provide_input(InputFrame::with_axes(127, 0));
        assert_eq!(host.input_for(c), Some(InputFrame::with_axes(127, 0)));
    }

    #[tokio::test]
    async fn test_reliable_excludes_sender() {
        let hub = LoopbackHub::default();
        let host = hub.runtime();
        let client = hub.runtime();
        host.join_or_host("lobby").await.unwrap();
        client.join_or_host("lobby").await.unwrap();
        let mut host_rx = host.subscribe_reliable();
        let mut client_rx = client.subscribe_reliable();

        host.send_reliable(b"hello".to_vec()).unwrap();
        assert_eq!(client_rx.try_recv().unwrap(), b"hello".to_vec());
        assert!(host_rx.try_recv().is_err());

        let offline = hub.runtime();
        assert_eq!(offline.send_reliable(Vec::new()), Err(RuntimeError::NotConnected));
    }
}
