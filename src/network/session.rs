//! Network Session Management
//!
//! Owns the connection lifecycle, the authority flag and the local
//! participant identity, and republishes runtime events as a deduplicated
//! stream of `SessionEvent`s. It is the single source of truth for "who is
//! connected" and "am I authoritative".

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::cancel::{cancel_pair, CancelSignal, CancelTrigger};
use crate::game::state::{Participant, ParticipantId};
use crate::network::runtime::{
    AuthorityGrant, EndReason, JoinGrant, NetworkRuntime, RuntimeError, RuntimeEvent,
};

/// Session event buffer size.
const EVENT_CAPACITY: usize = 256;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session.
    Idle,
    /// Joining or hosting.
    Starting,
    /// Connected.
    Running,
    /// Ended; a new session may be started.
    Ended,
}

/// Events observable by session consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Participant connected. Never repeated without an intervening leave.
    ParticipantJoined(ParticipantId),
    /// Participant disconnected.
    ParticipantLeft(ParticipantId),
    /// Terminal event, emitted exactly once per started session.
    SessionEnded(EndReason),
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A session is already starting or running.
    #[error("Session already active")]
    AlreadyActive,

    /// Joining or hosting failed.
    #[error("Join failed: {0}")]
    JoinFailed(#[from] RuntimeError),

    /// `shutdown()` was called while starting.
    #[error("Session start cancelled")]
    Cancelled,

    /// Operation requires a running session.
    #[error("Session not running")]
    NotRunning,
}

struct SessionState {
    phase: SessionPhase,
    /// Bumped on every start; stale pumps compare against it.
    generation: u64,
    grant: Option<JoinGrant>,
    /// Joined participants in join order
    joined: Vec<ParticipantId>,
    cancel: Option<CancelTrigger>,
}

struct SessionShared {
    runtime: Arc<dyn NetworkRuntime>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    /// Single transition into `Ended`. Returns false if this start was
    /// already ended (or superseded).
    fn end(&self, generation: u64, reason: EndReason) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.phase != SessionPhase::Running {
            return false;
        }
        state.phase = SessionPhase::Ended;
        state.grant = None;
        state.joined.clear();
        if let Some(trigger) = state.cancel.take() {
            trigger.cancel();
        }
        // Sent under the lock so no join/leave can follow it
        let _ = self.events.send(SessionEvent::SessionEnded(reason));
        info!(?reason, "session ended");
        true
    }
}

/// Client-side session facade over a `NetworkRuntime`.
#[derive(Clone)]
pub struct NetworkSession {
    shared: Arc<SessionShared>,
}

impl NetworkSession {
    /// Create an idle session over a runtime.
    pub fn new(runtime: Arc<dyn NetworkRuntime>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                runtime,
                state: Mutex::new(SessionState {
                    phase: SessionPhase::Idle,
                    generation: 0,
                    grant: None,
                    joined: Vec::new(),
                    cancel: None,
                }),
                events,
            }),
        }
    }

    /// Join or host `session_name` and announce `participant_name`.
    ///
    /// Fails without side effects if a session is already starting or
    /// running. A failed join leaves the session `Idle`.
    pub async fn start_session(
        &self,
        session_name: &str,
        participant_name: &str,
    ) -> Result<(), SessionError> {
        let generation = {
            let mut state = self.shared.state.lock();
            if matches!(state.phase, SessionPhase::Starting | SessionPhase::Running) {
                debug!(session = session_name, "start ignored, session already active");
                return Err(SessionError::AlreadyActive);
            }
            state.phase = SessionPhase::Starting;
            state.generation += 1;
            state.grant = None;
            state.joined.clear();
            let (trigger, _) = cancel_pair();
            state.cancel = Some(trigger);
            state.generation
        };

        info!(session = session_name, participant = participant_name, "starting session");

        // Subscribe before joining so no join event is missed
        let events = self.shared.runtime.subscribe();

        let grant = match self.shared.runtime.join_or_host(session_name).await {
            Ok(grant) => grant,
            Err(e) => {
                let mut state = self.shared.state.lock();
                if state.generation == generation && state.phase == SessionPhase::Starting {
                    state.phase = SessionPhase::Idle;
                    state.cancel = None;
                }
                warn!(session = session_name, error = %e, "failed to start session");
                return Err(SessionError::JoinFailed(e));
            }
        };

        let local = grant.local;
        let signal = {
            let mut state = self.shared.state.lock();
            let still_starting =
                state.generation == generation && state.phase == SessionPhase::Starting;
            match (&state.cancel, still_starting) {
                (Some(trigger), true) => {
                    let signal = trigger.signal();
                    info!(
                        session = %grant.session_name,
                        local = %grant.local,
                        authority = grant.is_authority(),
                        "session running"
                    );
                    state.grant = Some(grant);
                    state.phase = SessionPhase::Running;
                    Some(signal)
                }
                _ => None,
            }
        };

        let Some(signal) = signal else {
            // Shut down while joining
            self.shared.runtime.disconnect().await;
            return Err(SessionError::Cancelled);
        };

        tokio::spawn(pump(Arc::downgrade(&self.shared), events, generation, signal));

        if let Err(e) = self
            .shared
            .runtime
            .rpc_set_display_name(local, participant_name.to_string())
            .await
        {
            warn!(error = %e, "failed to set display name");
        }

        Ok(())
    }

    /// Tear down the session. Emits `SessionEnded(LocalShutdown)` unless the
    /// session already ended.
    pub async fn shutdown(&self) {
        self.end_with(EndReason::LocalShutdown).await;
    }

    /// Tear down the session with an explicit reason.
    pub async fn end_with(&self, reason: EndReason) {
        let (phase, generation) = {
            let state = self.shared.state.lock();
            (state.phase, state.generation)
        };

        match phase {
            SessionPhase::Running => {
                if self.shared.end(generation, reason) {
                    self.shared.runtime.disconnect().await;
                }
            }
            SessionPhase::Starting => {
                let mut state = self.shared.state.lock();
                if state.generation == generation && state.phase == SessionPhase::Starting {
                    state.phase = SessionPhase::Idle;
                    if let Some(trigger) = state.cancel.take() {
                        trigger.cancel();
                    }
                    debug!("session start aborted");
                }
            }
            SessionPhase::Idle | SessionPhase::Ended => {}
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.shared.state.lock().phase
    }

    /// Is the local participant the authority of a running session?
    pub fn is_authority(&self) -> bool {
        let state = self.shared.state.lock();
        state.phase == SessionPhase::Running
            && state.grant.as_ref().map(JoinGrant::is_authority).unwrap_or(false)
    }

    /// Local participant identity.
    pub fn local_participant(&self) -> Option<ParticipantId> {
        self.shared.state.lock().grant.as_ref().map(|g| g.local)
    }

    /// Host participant identity.
    pub fn host(&self) -> Option<ParticipantId> {
        self.shared.state.lock().grant.as_ref().map(|g| g.host)
    }

    /// Name of the running session.
    pub fn session_name(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .grant
            .as_ref()
            .map(|g| g.session_name.clone())
    }

    /// Connected participants in join order, with their current names.
    pub fn participants(&self) -> Vec<Participant> {
        let (joined, host) = {
            let state = self.shared.state.lock();
            (state.joined.clone(), state.grant.as_ref().map(|g| g.host))
        };
        joined
            .into_iter()
            .map(|id| Participant {
                id,
                name: self
                    .shared
                    .runtime
                    .display_name(id)
                    .and_then(|rx| rx.borrow().clone()),
                is_host: Some(id) == host,
            })
            .collect()
    }

    /// Write handles, only for the authority.
    pub fn authority(&self) -> Option<AuthorityGrant> {
        let state = self.shared.state.lock();
        if state.phase != SessionPhase::Running {
            return None;
        }
        state
            .grant
            .as_ref()
            .and_then(|g| g.authority.as_ref())
            .map(AuthorityGrant::share)
    }

    /// Cancellation signal of the current session. Already cancelled when
    /// no session is active.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.shared
            .state
            .lock()
            .cancel
            .as_ref()
            .map(CancelTrigger::signal)
            .unwrap_or_else(CancelSignal::cancelled_now)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Underlying runtime.
    pub fn runtime(&self) -> Arc<dyn NetworkRuntime> {
        self.shared.runtime.clone()
    }
}

/// Forward runtime events for one started session until it ends.
async fn pump(
    shared: Weak<SessionShared>,
    mut events: broadcast::Receiver<RuntimeEvent>,
    generation: u64,
    mut cancel: CancelSignal,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = cancel.cancelled() => return,
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };

        match event {
            Ok(RuntimeEvent::ParticipantJoined(id)) => {
                let mut state = shared.state.lock();
                if state.generation != generation || state.phase != SessionPhase::Running {
                    return;
                }
                if state.joined.contains(&id) {
                    debug!(participant = %id, "duplicate join ignored");
                    continue;
                }
                state.joined.push(id);
                let _ = shared.events.send(SessionEvent::ParticipantJoined(id));
                info!(participant = %id, "participant joined");
            }
            Ok(RuntimeEvent::ParticipantLeft(id)) => {
                let mut state = shared.state.lock();
                if state.generation != generation || state.phase != SessionPhase::Running {
                    return;
                }
                let Some(index) = state.joined.iter().position(|p| *p == id) else {
                    debug!(participant = %id, "leave for unknown participant ignored");
                    continue;
                };
                state.joined.remove(index);
                let _ = shared.events.send(SessionEvent::ParticipantLeft(id));
                info!(participant = %id, "participant left");
            }
            Ok(RuntimeEvent::Shutdown(reason)) => {
                if shared.end(generation, reason) {
                    // Release the runtime connection so a new start can join
                    shared.runtime.disconnect().await;
                }
                return;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session event pump lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                shared.end(generation, EndReason::Disconnected);
                return;
            }
        }
    }
}
