//! Lobby Roster
//!
//! Deduplicated, join-ordered list of participants whose display names have
//! resolved, plus whether the local participant is the host.
//!
//! Per participant: `Joined (no name) → Named → Removed`. A join only shows
//! up once its name resolves. Names can arrive well after the join event,
//! so each pending participant gets exactly one resolution task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::game::state::ParticipantId;
use crate::network::session::{NetworkSession, SessionEvent};

/// Default interval between avatar lookups.
pub const DEFAULT_AVATAR_POLL: Duration = Duration::from_millis(50);

/// One visible roster row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Participant identity
    pub id: ParticipantId,
    /// Resolved display name
    pub name: String,
}

/// What the roster needs to know about the session.
pub trait RosterBackend: Send + Sync {
    /// Local participant, once connected.
    fn local_participant(&self) -> Option<ParticipantId>;

    /// Is the local participant the authority?
    fn is_authority(&self) -> bool;

    /// Replicated display name of a participant's avatar, once it exists.
    fn display_name(&self, participant: ParticipantId) -> Option<watch::Receiver<Option<String>>>;
}

impl RosterBackend for NetworkSession {
    fn local_participant(&self) -> Option<ParticipantId> {
        NetworkSession::local_participant(self)
    }

    fn is_authority(&self) -> bool {
        NetworkSession::is_authority(self)
    }

    fn display_name(&self, participant: ParticipantId) -> Option<watch::Receiver<Option<String>>> {
        self.runtime().display_name(participant)
    }
}

struct RosterState {
    /// Resolution tasks for participants without a name yet
    pending: BTreeMap<ParticipantId, JoinHandle<()>>,
    disposed: bool,
}

struct RosterInner {
    backend: Arc<dyn RosterBackend>,
    state: Mutex<RosterState>,
    players: watch::Sender<Vec<RosterEntry>>,
    is_host: watch::Sender<bool>,
    poll_interval: Duration,
}

impl RosterInner {
    fn on_joined(self: &Arc<Self>, id: ParticipantId) {
        if self.backend.local_participant() == Some(id) {
            let authority = self.backend.is_authority();
            self.is_host.send_if_modified(|v| std::mem::replace(v, authority) != authority);
        }

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        let listed = self.players.borrow().iter().any(|e| e.id == id);
        if listed || state.pending.contains_key(&id) {
            debug!(participant = %id, "join ignored, already tracked");
            return;
        }

        // The task removes itself from `pending` under the same lock, so it
        // cannot finish before it is registered.
        let task = tokio::spawn(resolve_name(self.clone(), id));
        state.pending.insert(id, task);
    }

    fn on_left(&self, id: ParticipantId) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        if let Some(task) = state.pending.remove(&id) {
            task.abort();
        }
        let removed = self.players.send_if_modified(|players| {
            let before = players.len();
            players.retain(|e| e.id != id);
            players.len() != before
        });
        if removed {
            info!(participant = %id, "removed from roster");
        } else {
            debug!(participant = %id, "leave ignored, not in roster");
        }
    }

    fn on_named(&self, id: ParticipantId, name: String) {
        let mut state = self.state.lock();
        if state.disposed || state.pending.remove(&id).is_none() {
            return;
        }
        let added = self.players.send_if_modified(|players| {
            if players.iter().any(|e| e.id == id) {
                return false;
            }
            players.push(RosterEntry { id, name: name.clone() });
            true
        });
        if added {
            info!(participant = %id, name = %name, "added to roster");
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        for (_, task) in std::mem::take(&mut state.pending) {
            task.abort();
        }
        self.players.send_if_modified(|players| {
            let changed = !players.is_empty();
            players.clear();
            changed
        });
        self.is_host.send_if_modified(|v| std::mem::replace(v, false));
    }
}

/// Wait for the participant's avatar, then for its name.
async fn resolve_name(inner: Arc<RosterInner>, id: ParticipantId) {
    let mut ticker = tokio::time::interval(inner.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut names = loop {
        if let Some(rx) = inner.backend.display_name(id) {
            break rx;
        }
        ticker.tick().await;
    };

    let resolved = names
        .wait_for(|n| n.as_deref().is_some_and(|s| !s.is_empty()))
        .await
        .map(|name| name.clone().unwrap_or_default());
    let name = match resolved {
        Ok(name) => name,
        Err(_) => {
            debug!(participant = %id, "avatar gone before name resolved");
            inner.state.lock().pending.remove(&id);
            return;
        }
    };
    inner.on_named(id, name);
}

/// Observable lobby roster.
pub struct LobbyRoster {
    inner: Arc<RosterInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LobbyRoster {
    /// Track `events` resolving names through `backend`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(events: broadcast::Receiver<SessionEvent>, backend: Arc<dyn RosterBackend>) -> Self {
        Self::with_poll_interval(events, backend, DEFAULT_AVATAR_POLL)
    }

    /// Like `new` with a custom avatar poll interval.
    pub fn with_poll_interval(
        mut events: broadcast::Receiver<SessionEvent>,
        backend: Arc<dyn RosterBackend>,
        poll_interval: Duration,
    ) -> Self {
        let (players, _) = watch::channel(Vec::new());
        let (is_host, _) = watch::channel(false);
        let inner = Arc::new(RosterInner {
            backend,
            state: Mutex::new(RosterState {
                pending: BTreeMap::new(),
                disposed: false,
            }),
            players,
            is_host,
            poll_interval,
        });

        let listener_inner = inner.clone();
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::ParticipantJoined(id)) => listener_inner.on_joined(id),
                    Ok(SessionEvent::ParticipantLeft(id)) => listener_inner.on_left(id),
                    Ok(SessionEvent::SessionEnded(reason)) => {
                        debug!(?reason, "session ended, clearing roster");
                        listener_inner.clear();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "roster lagged behind session events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            inner,
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Subscribe to a session's events. Attach before `start_session` so
    /// no join is missed.
    pub fn attach(session: &NetworkSession) -> Self {
        Self::new(session.subscribe(), Arc::new(session.clone()))
    }

    /// Current roster, in join order.
    pub fn players(&self) -> Vec<RosterEntry> {
        self.inner.players.borrow().clone()
    }

    /// Observe roster changes.
    pub fn watch(&self) -> watch::Receiver<Vec<RosterEntry>> {
        self.inner.players.subscribe()
    }

    /// Is the local participant the host?
    pub fn is_host(&self) -> bool {
        *self.inner.is_host.borrow()
    }

    /// Observe the host flag.
    pub fn watch_is_host(&self) -> watch::Receiver<bool> {
        self.inner.is_host.subscribe()
    }

    /// Resolved names by participant.
    pub fn names(&self) -> BTreeMap<ParticipantId, String> {
        self.inner
            .players
            .borrow()
            .iter()
            .map(|e| (e.id, e.name.clone()))
            .collect()
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.inner.players.borrow().len()
    }

    /// No visible entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop tracking. Later session events change nothing.
    pub fn dispose(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        let mut state = self.inner.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        for (_, task) in std::mem::take(&mut state.pending) {
            task.abort();
        }
        debug!("roster disposed");
    }
}

impl Drop for LobbyRoster {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::runtime::EndReason;

    const POLL: Duration = Duration::from_millis(5);

    struct FakeBackend {
        local: ParticipantId,
        authority: bool,
        avatars: Mutex<BTreeMap<ParticipantId, watch::Sender<Option<String>>>>,
    }

    impl FakeBackend {
        fn new(local: ParticipantId, authority: bool) -> Arc<Self> {
            Arc::new(Self {
                local,
                authority,
                avatars: Mutex::new(BTreeMap::new()),
            })
        }

        fn register_avatar(&self, id: ParticipantId, name: Option<&str>) {
            let (tx, _) = watch::channel(name.map(str::to_string));
            self.avatars.lock().insert(id, tx);
        }

        fn set_name(&self, id: ParticipantId, name: &str) {
            if let Some(tx) = self.avatars.lock().get(&id) {
                tx.send_replace(Some(name.to_string()));
            }
        }
    }

    impl RosterBackend for FakeBackend {
        fn local_participant(&self) -> Option<ParticipantId> {
            Some(self.local)
        }

        fn is_authority(&self) -> bool {
            self.authority
        }

        fn display_name(
            &self,
            participant: ParticipantId,
        ) -> Option<watch::Receiver<Option<String>>> {
            self.avatars.lock().get(&participant).map(|tx| tx.subscribe())
        }
    }

    fn pid(n: u8) -> ParticipantId {
        ParticipantId::new([n; 16])
    }

    fn setup(authority: bool) -> (broadcast::Sender<SessionEvent>, Arc<FakeBackend>, LobbyRoster) {
        let (tx, rx) = broadcast::channel(64);
        let backend = FakeBackend::new(pid(0), authority);
        let roster = LobbyRoster::with_poll_interval(rx, backend.clone(), POLL);
        (tx, backend, roster)
    }

    async fn wait_for_len(roster: &LobbyRoster, len: usize) {
        let mut rx = roster.watch();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|p| p.len() == len))
            .await
            .expect("roster did not reach expected size")
            .unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_join_appears_with_name() {
        let (tx, backend, roster) = setup(false);
        backend.register_avatar(pid(42), Some("Player 42"));
        tx.send(SessionEvent::ParticipantJoined(pid(42))).unwrap();

        wait_for_len(&roster, 1).await;
        assert_eq!(
            roster.players(),
            vec![RosterEntry { id: pid(42), name: "Player 42".into() }]
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_ignored() {
        let (tx, backend, roster) = setup(false);
        backend.register_avatar(pid(7), Some("Seven"));
        tx.send(SessionEvent::ParticipantJoined(pid(7))).unwrap();
        tx.send(SessionEvent::ParticipantJoined(pid(7))).unwrap();

        wait_for_len(&roster, 1).await;
        tx.send(SessionEvent::ParticipantJoined(pid(7))).unwrap();
        settle().await;
        assert_eq!(roster.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_removes_only_that_player() {
        let (tx, backend, roster) = setup(false);
        backend.register_avatar(pid(1), Some("A"));
        backend.register_avatar(pid(2), Some("B"));
        tx.send(SessionEvent::ParticipantJoined(pid(1))).unwrap();
        wait_for_len(&roster, 1).await;
        tx.send(SessionEvent::ParticipantJoined(pid(2))).unwrap();
        wait_for_len(&roster, 2).await;

        tx.send(SessionEvent::ParticipantLeft(pid(1))).unwrap();
        wait_for_len(&roster, 1).await;
        assert_eq!(roster.players()[0].id, pid(2));

        // Never joined
        tx.send(SessionEvent::ParticipantLeft(pid(3))).unwrap();
        settle().await;
        assert_eq!(roster.names().into_iter().collect::<Vec<_>>(), vec![(pid(2), "B".to_string())]);
    }

    #[tokio::test]
    async fn test_name_arrives_after_join() {
        let (tx, backend, roster) = setup(false);
        tx.send(SessionEvent::ParticipantJoined(pid(5))).unwrap();
        settle().await;
        assert!(roster.is_empty());

        // Avatar appears without a name, then gets one
        backend.register_avatar(pid(5), None);
        settle().await;
        assert!(roster.is_empty());

        backend.set_name(pid(5), "Late");
        wait_for_len(&roster, 1).await;
        assert_eq!(roster.players()[0].name, "Late");
    }

    #[tokio::test]
    async fn test_leave_cancels_pending_resolution() {
        let (tx, backend, roster) = setup(false);
        tx.send(SessionEvent::ParticipantJoined(pid(5))).unwrap();
        tx.send(SessionEvent::ParticipantLeft(pid(5))).unwrap();
        settle().await;

        backend.register_avatar(pid(5), Some("Ghost"));
        settle().await;
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_host_flag_set_on_local_join() {
        let (tx, backend, roster) = setup(true);
        assert!(!roster.is_host());
        backend.register_avatar(pid(0), Some("Me"));

        let mut host = roster.watch_is_host();
        tx.send(SessionEvent::ParticipantJoined(pid(0))).unwrap();
        tokio::time::timeout(Duration::from_secs(1), host.wait_for(|v| *v))
            .await
            .unwrap()
            .unwrap();
        assert!(roster.is_host());
    }

    #[tokio::test]
    async fn test_session_end_clears() {
        let (tx, backend, roster) = setup(true);
        backend.register_avatar(pid(0), Some("Me"));
        tx.send(SessionEvent::ParticipantJoined(pid(0))).unwrap();
        wait_for_len(&roster, 1).await;
        assert!(roster.is_host());

        tx.send(SessionEvent::SessionEnded(EndReason::HostShutdown)).unwrap();
        wait_for_len(&roster, 0).await;
        assert!(!roster.is_host());
    }

    #[tokio::test]
    async fn test_dispose_stops_propagation() {
        let (tx, backend, roster) = setup(false);
        backend.register_avatar(pid(1), Some("A"));
        backend.register_avatar(pid(2), Some("B"));
        tx.send(SessionEvent::ParticipantJoined(pid(1))).unwrap();
        wait_for_len(&roster, 1).await;

        roster.dispose();
        let _ = tx.send(SessionEvent::ParticipantJoined(pid(2)));
        let _ = tx.send(SessionEvent::ParticipantLeft(pid(1)));
        settle().await;

        assert_eq!(roster.players()[0].id, pid(1));
        assert_eq!(roster.len(), 1);
    }
}
