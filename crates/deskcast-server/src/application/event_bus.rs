//! Typed in-process event bus.
//!
//! Components announce what happened (a session joined, control moved, the
//! screen was resized) by publishing a [`BusEvent`].  The bus maps each
//! [`EventKind`] to a list of subscribers and delivers to each one in the way
//! it chose when subscribing:
//!
//! - **synchronous** ([`EventBus::subscribe`]): `deliver` runs on the
//!   publisher's thread before `publish` returns.  Use this when the order of
//!   events matters, as it does for the session fan-out.
//! - **queued** ([`EventBus::subscribe_queued`]): the event is put on a
//!   bounded channel drained by a dedicated task.  A full channel drops the
//!   event with a warning; the publisher never waits.
//!
//! The publisher side is abstracted behind [`EventPublisher`] so components
//! can be tested with a recording double.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use deskcast_core::protocol::messages::SessionSummary;
use deskcast_core::{KeyboardModifiers, ScreenConfiguration, ServerMessage, SessionId, SessionState};

use crate::application::control_arbiter::{ControlTransition, ReleaseReason};
use crate::application::session_registry::{Session, SessionListener, SessionRegistry};

/// Discriminant of a [`BusEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionJoined,
    SessionLeft,
    ControlChanged,
    ControlOverride,
    ScreenChanged,
    KeyboardLayoutChanged,
    KeyboardModifiersChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::SessionJoined,
        EventKind::SessionLeft,
        EventKind::ControlChanged,
        EventKind::ControlOverride,
        EventKind::ScreenChanged,
        EventKind::KeyboardLayoutChanged,
        EventKind::KeyboardModifiersChanged,
    ];
}

/// Something that happened to the shared server state.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    SessionJoined(SessionSummary),
    SessionLeft { id: SessionId },
    ControlChanged(ControlTransition),
    ControlOverride { enabled: bool, by: SessionId },
    ScreenChanged(ScreenConfiguration),
    KeyboardLayoutChanged { layout: String, by: SessionId },
    KeyboardModifiersChanged { modifiers: KeyboardModifiers, by: SessionId },
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::SessionJoined(_) => EventKind::SessionJoined,
            BusEvent::SessionLeft { .. } => EventKind::SessionLeft,
            BusEvent::ControlChanged(_) => EventKind::ControlChanged,
            BusEvent::ControlOverride { .. } => EventKind::ControlOverride,
            BusEvent::ScreenChanged(_) => EventKind::ScreenChanged,
            BusEvent::KeyboardLayoutChanged { .. } => EventKind::KeyboardLayoutChanged,
            BusEvent::KeyboardModifiersChanged { .. } => EventKind::KeyboardModifiersChanged,
        }
    }
}

/// Anything that can accept published events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: BusEvent);
}

/// A consumer of bus events.
pub trait Subscriber: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    fn deliver(&self, event: &BusEvent);
}

#[derive(Clone)]
enum Delivery {
    Sync(Arc<dyn Subscriber>),
    Queued {
        name: String,
        tx: mpsc::Sender<BusEvent>,
    },
}

impl Delivery {
    fn send(&self, event: &BusEvent) {
        match self {
            Delivery::Sync(subscriber) => subscriber.deliver(event),
            Delivery::Queued { name, tx } => {
                if let Err(e) = tx.try_send(event.clone()) {
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!(subscriber = %name, kind = ?event.kind(), "subscriber queue full; event dropped");
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            debug!(subscriber = %name, "subscriber gone; event dropped");
                        }
                    }
                }
            }
        }
    }
}

/// Event-kind to subscriber-list router.
#[derive(Default)]
pub struct EventBus {
    routes: RwLock<HashMap<EventKind, Vec<Delivery>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_route(&self, kinds: &[EventKind], delivery: Delivery) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        for kind in kinds {
            routes.entry(*kind).or_default().push(delivery.clone());
        }
    }

    /// Subscribes for synchronous delivery of `kinds`.
    pub fn subscribe(&self, kinds: &[EventKind], subscriber: Arc<dyn Subscriber>) {
        debug!(subscriber = subscriber.name(), ?kinds, "synchronous subscription");
        self.add_route(kinds, Delivery::Sync(subscriber));
    }

    /// Subscribes for delivery through a bounded queue of `capacity` events.
    ///
    /// Spawns the forwarding task, so it must be called from within a tokio
    /// runtime.  The task ends when the bus is dropped.
    pub fn subscribe_queued(
        &self,
        kinds: &[EventKind],
        subscriber: Arc<dyn Subscriber>,
        capacity: usize,
    ) -> tokio::task::JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<BusEvent>(capacity.max(1));
        let name = subscriber.name().to_string();
        debug!(subscriber = %name, ?kinds, capacity, "queued subscription");
        self.add_route(kinds, Delivery::Queued { name, tx });

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                subscriber.deliver(&event);
            }
        })
    }

    /// Number of subscriptions registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: BusEvent) {
        // Cloned out so that a subscriber may publish or subscribe re-entrantly.
        let targets: Vec<Delivery> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for target in &targets {
            target.send(&event);
        }
    }
}

impl SessionListener for EventBus {
    fn on_session_activated(&self, session: &Arc<Session>) {
        self.publish(BusEvent::SessionJoined(session.summary()));
    }

    fn on_session_removed(&self, session: &Arc<Session>, previous: SessionState) {
        // Nobody was told about a session that never became active.
        if previous == SessionState::Active {
            self.publish(BusEvent::SessionLeft {
                id: session.id().clone(),
            });
        }
    }
}

// ── Subscribers ───────────────────────────────────────────────────────────────

/// Turns bus events into protocol messages for connected sessions.
///
/// Subscribed synchronously so that every session observes state changes in
/// the order they were committed.
pub struct SessionFanout {
    registry: Arc<SessionRegistry>,
}

impl SessionFanout {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    fn control_changed(&self, transition: &ControlTransition) {
        match transition {
            ControlTransition::Acquired { holder } => {
                self.registry.broadcast(
                    &ServerMessage::ControlLocked {
                        holder: holder.clone(),
                        forced_by: None,
                    },
                    &[],
                );
            }
            ControlTransition::Released { previous, .. } => {
                self.registry.broadcast(
                    &ServerMessage::ControlReleased {
                        previous: previous.clone(),
                    },
                    &[],
                );
            }
            ControlTransition::Forced {
                holder,
                previous,
                by,
            } => {
                if let Some(previous) = previous.as_ref().filter(|p| *p != holder) {
                    if let Some(session) = self.registry.get(previous) {
                        if let Err(e) = session.send(ServerMessage::ControlRevoked {
                            by: by.clone(),
                            new_holder: holder.clone(),
                        }) {
                            debug!(session_id = %previous, "control/revoked not delivered: {e}");
                        }
                    }
                }
                self.registry.broadcast(
                    &ServerMessage::ControlLocked {
                        holder: holder.clone(),
                        forced_by: Some(by.clone()),
                    },
                    &[],
                );
            }
        }
    }
}

impl Subscriber for SessionFanout {
    fn name(&self) -> &str {
        "session-fanout"
    }

    fn deliver(&self, event: &BusEvent) {
        match event {
            BusEvent::SessionJoined(summary) => {
                self.registry.broadcast(
                    &ServerMessage::SessionJoined(summary.clone()),
                    std::slice::from_ref(&summary.id),
                );
            }
            BusEvent::SessionLeft { id } => {
                self.registry
                    .broadcast(&ServerMessage::SessionLeft { id: id.clone() }, &[]);
            }
            BusEvent::ControlChanged(transition) => self.control_changed(transition),
            BusEvent::ControlOverride { enabled, by } => {
                self.registry.broadcast(
                    &ServerMessage::ControlOverride {
                        enabled: *enabled,
                        by: by.clone(),
                    },
                    &[],
                );
            }
            BusEvent::ScreenChanged(config) => {
                self.registry
                    .broadcast(&ServerMessage::ScreenSizeChange(*config), &[]);
            }
            BusEvent::KeyboardLayoutChanged { layout, .. } => {
                self.registry.broadcast(
                    &ServerMessage::KeyboardLayout {
                        layout: layout.clone(),
                    },
                    &[],
                );
            }
            BusEvent::KeyboardModifiersChanged { modifiers, .. } => {
                self.registry
                    .broadcast(&ServerMessage::KeyboardModifiers(*modifiers), &[]);
            }
        }
    }
}

/// Writes every event to the log at `info` level.
#[derive(Debug, Default)]
pub struct AuditLog;

impl Subscriber for AuditLog {
    fn name(&self) -> &str {
        "audit-log"
    }

    fn deliver(&self, event: &BusEvent) {
        match event {
            BusEvent::SessionJoined(summary) => {
                info!(session_id = %summary.id, name = %summary.profile.name, "joined");
            }
            BusEvent::SessionLeft { id } => info!(session_id = %id, "left"),
            BusEvent::ControlChanged(ControlTransition::Acquired { holder }) => {
                info!(holder = %holder, "control acquired");
            }
            BusEvent::ControlChanged(ControlTransition::Released { previous, reason }) => {
                let reason = match reason {
                    ReleaseReason::Explicit => "released",
                    ReleaseReason::Disconnected => "holder disconnected",
                };
                info!(previous = %previous, reason, "control released");
            }
            BusEvent::ControlChanged(ControlTransition::Forced {
                holder,
                previous,
                by,
            }) => {
                info!(holder = %holder, previous = ?previous, by = %by, "control given");
            }
            BusEvent::ControlOverride { enabled, by } => {
                info!(enabled, by = %by, "host override changed");
            }
            BusEvent::ScreenChanged(config) => info!(config = %config, "screen changed"),
            BusEvent::KeyboardLayoutChanged { layout, by } => {
                info!(layout = %layout, by = %by, "keyboard layout changed");
            }
            BusEvent::KeyboardModifiersChanged { modifiers, by } => {
                info!(?modifiers, by = %by, "keyboard modifiers changed");
            }
        }
    }
}
