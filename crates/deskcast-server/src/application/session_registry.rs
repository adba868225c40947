//! SessionRegistry: the single owner of every connected session.
//!
//! # Lifecycle
//!
//! ```text
//! add()  ──►  Connecting  ──activate()──►  Active  ──remove()──►  Disconnected
//!                 │                                                    ▲
//!                 └──────────────────────remove()──────────────────────┘
//! ```
//!
//! Only `Active` sessions receive broadcasts.  `remove` is the one exit path,
//! whether the client left politely or its transport died.
//!
//! # Critical sections
//!
//! The session map sits behind one `RwLock`.  The lock is held only to insert,
//! remove, or clone `Arc<Session>` handles out of the map; sends and listener
//! callbacks always run after it is released, so a listener may call back into
//! the registry without deadlocking.
//!
//! # Listeners
//!
//! Components that must react to lifecycle transitions (the control arbiter
//! auto-releases, the media bridge detaches, the event bus announces) register
//! a [`SessionListener`].  The registry keeps only weak references, so a
//! listener that itself holds the registry does not create a cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};

use deskcast_core::protocol::messages::SessionSummary;
use deskcast_core::{Permissions, Profile, ServerMessage, SessionId, SessionState};

use crate::application::media_bridge::MediaTransport;
use crate::application::outbound::TransportError;

/// Error type for registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A session with this ID is already registered.
    #[error("session {0} already exists")]
    DuplicateSession(SessionId),
    #[error("session {0} not found")]
    NotFound(SessionId),
}

/// The control channel to one client.
///
/// Implementations must never block: a slow client is handled by the
/// implementation's own bounded queue, not by stalling the caller.
pub trait SessionTransport: Send + Sync {
    /// Hands a message to the client's outbound queue.
    fn send(&self, message: ServerMessage) -> Result<(), TransportError>;

    /// Media channel multiplexed on this connection, if it can carry one.
    fn media_channel(&self) -> Option<Arc<dyn MediaTransport>> {
        None
    }

    /// Shuts the channel down; the connection's writer task exits.
    fn close(&self);
}

/// A connected client.
///
/// Owned by the [`SessionRegistry`]; everyone else holds a session only for
/// the duration of one operation.
pub struct Session {
    id: SessionId,
    profile: Profile,
    transport: Arc<dyn SessionTransport>,
    media: Mutex<Option<Arc<dyn MediaTransport>>>,
    connected_at: SystemTime,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(id: SessionId, profile: Profile, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            id,
            profile,
            transport,
            media: Mutex::new(None),
            connected_at: SystemTime::now(),
            state: Mutex::new(SessionState::Connecting),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn permissions(&self) -> &Permissions {
        &self.profile.permissions
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    fn set_state(&self, state: SessionState) -> SessionState {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, state)
    }

    /// Sends a message to this session only.
    pub fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.transport.send(message)
    }

    pub fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    /// The negotiated media transport, if the session asked for the stream.
    pub fn media_transport(&self) -> Option<Arc<dyn MediaTransport>> {
        self.media
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_media_transport(&self, media: Option<Arc<dyn MediaTransport>>) {
        *self.media.lock().unwrap_or_else(PoisonError::into_inner) = media;
    }

    /// How other sessions see this one.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            profile: self.profile.clone(),
        }
    }
}

/// Observer of session lifecycle transitions.
///
/// Callbacks run synchronously on the thread that performed the transition,
/// after the registry lock has been released.
pub trait SessionListener: Send + Sync {
    /// The session moved from `Connecting` to `Active`.
    fn on_session_activated(&self, _session: &Arc<Session>) {}

    /// The session left the registry.  `previous` is the state it was in.
    fn on_session_removed(&self, _session: &Arc<Session>, _previous: SessionState) {}
}

/// In-memory registry of all connected sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    listeners: RwLock<Vec<Weak<dyn SessionListener>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a lifecycle listener.  Listeners are notified in
    /// registration order.
    pub fn add_listener<L: SessionListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn SessionListener> = Arc::downgrade(listener) as Weak<dyn SessionListener>;
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(weak);
    }

    fn listeners(&self) -> Vec<Arc<dyn SessionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Admits a new session in the `Connecting` state.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateSession`] if the ID is taken.  Existing
    /// sessions are unaffected.
    pub fn add(
        &self,
        id: SessionId,
        profile: Profile,
        transport: Arc<dyn SessionTransport>,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut sessions = self.write();
        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }
        let session = Arc::new(Session::new(id.clone(), profile, transport));
        sessions.insert(id.clone(), Arc::clone(&session));
        drop(sessions);

        debug!(session_id = %id, "session admitted");
        Ok(session)
    }

    /// Moves a `Connecting` session to `Active` and notifies listeners.
    ///
    /// Activating an already active session is a no-op.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if the session is not registered.
    pub fn activate(&self, id: &SessionId) -> Result<Arc<Session>, RegistryError> {
        let session = {
            let sessions = self.read();
            let session = sessions
                .get(id)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
            // Under the map lock so a concurrent `remove` cannot be overwritten.
            if session.state() != SessionState::Connecting {
                return Ok(session);
            }
            session.set_state(SessionState::Active);
            session
        };

        info!(session_id = %id, name = %session.profile().name, "session active");
        for listener in self.listeners() {
            listener.on_session_activated(&session);
        }
        Ok(session)
    }

    /// Returns the session with this ID, if registered.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.read().get(id).cloned()
    }

    /// Removes a session, closes its transport, and notifies listeners.
    ///
    /// Idempotent: removing an absent ID returns `None` and does nothing.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (session, previous) = {
            let mut sessions = self.write();
            let session = sessions.remove(id)?;
            let previous = session.set_state(SessionState::Disconnected);
            (session, previous)
        };

        session.transport.close();
        let secs = session
            .connected_at()
            .elapsed()
            .unwrap_or_default()
            .as_secs();
        info!(session_id = %id, secs, "session removed");

        for listener in self.listeners() {
            listener.on_session_removed(&session, previous);
        }
        Some(session)
    }

    /// Delivers `message` to every `Active` session not listed in `exclude`.
    ///
    /// Best effort: a failed delivery is logged and skipped.  A closed
    /// transport means that session's connection task is already tearing
    /// down and will remove it.  Returns the number of sessions the message
    /// was handed to.
    pub fn broadcast(&self, message: &ServerMessage, exclude: &[SessionId]) -> usize {
        let recipients: Vec<Arc<Session>> = self
            .read()
            .values()
            .filter(|s| s.is_active() && !exclude.contains(s.id()))
            .cloned()
            .collect();

        let mut delivered = 0;
        for session in recipients {
            match session.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TransportError::QueueFull) => {
                    debug!(session_id = %session.id(), event = message.event(), "outbound queue full; message dropped");
                }
                Err(TransportError::Closed) => {
                    warn!(session_id = %session.id(), event = message.event(), "broadcast to closed transport skipped");
                }
            }
        }
        delivered
    }

    /// Calls `f` for every registered session, in no particular order.
    ///
    /// `f` runs on a snapshot, outside the registry lock.
    pub fn for_each<F: FnMut(&Arc<Session>)>(&self, mut f: F) {
        let sessions: Vec<Arc<Session>> = self.read().values().cloned().collect();
        for session in &sessions {
            f(session);
        }
    }

    /// Summaries of all `Active` sessions, sorted by ID.
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut list: Vec<SessionSummary> = self
            .read()
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.summary())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Number of registered sessions in any state.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
