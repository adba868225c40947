//! ServerCore: builds the component graph and owns it.
//!
//! # Wiring
//!
//! ```text
//!                  ┌──────────────┐  listeners (weak)  ┌───────────────────────┐
//!   admit() ─────► │SessionRegistry│ ────────────────► │ arbiter, bridge, bus  │
//!                  └──────────────┘                    └───────────────────────┘
//!                         ▲                                       │ publish
//!                         │ broadcast                             ▼
//!                  ┌──────────────┐   synchronous      ┌──────────────┐
//!                  │SessionFanout │ ◄───────────────── │   EventBus   │ ──queued──► AuditLog
//!                  └──────────────┘                    └──────────────┘
//! ```
//!
//! Removal listeners run in registration order: the arbiter releases control
//! first, then the bridge detaches the peer, then the bus announces the
//! departure.  By the time other sessions read `session/left`, the departed
//! session no longer holds control.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use deskcast_core::protocol::messages::SystemInit;
use deskcast_core::{Profile, ServerMessage, SessionId};

use crate::application::control_arbiter::ControlArbiter;
use crate::application::desktop_facade::{DesktopDriver, DesktopFacade};
use crate::application::event_bus::{AuditLog, EventBus, EventKind, EventPublisher, SessionFanout};
use crate::application::media_bridge::{FrameSource, PeerMediaBridge};
use crate::application::message_router::MessageRouter;
use crate::application::session_registry::{
    RegistryError, Session, SessionRegistry, SessionTransport,
};

/// Tunables of the core, independent of any transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSettings {
    /// Frames each media peer may fall behind before the oldest are dropped.
    pub media_buffer: usize,
    /// Capacity of the audit log's event queue.
    pub audit_queue: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            media_buffer: 8,
            audit_queue: 256,
        }
    }
}

/// The assembled server.
pub struct ServerCore {
    registry: Arc<SessionRegistry>,
    arbiter: Arc<ControlArbiter>,
    desktop: Arc<DesktopFacade>,
    bus: Arc<EventBus>,
    bridge: Arc<PeerMediaBridge>,
    router: MessageRouter,
}

impl ServerCore {
    /// Wires every component around `driver`.
    ///
    /// Spawns the audit log task, so it must be called from within a tokio
    /// runtime.
    pub fn new(driver: Arc<dyn DesktopDriver>, settings: CoreSettings) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let bus = Arc::new(EventBus::new());
        bus.subscribe(
            &EventKind::ALL,
            Arc::new(SessionFanout::new(Arc::clone(&registry))),
        );
        bus.subscribe_queued(&EventKind::ALL, Arc::new(AuditLog), settings.audit_queue);

        let publisher: Arc<dyn EventPublisher> = Arc::clone(&bus) as Arc<dyn EventPublisher>;
        let desktop = Arc::new(DesktopFacade::new(driver, Arc::clone(&publisher)));
        let arbiter = Arc::new(ControlArbiter::new(Arc::clone(&desktop), publisher));
        let bridge = Arc::new(PeerMediaBridge::new(settings.media_buffer).with_registry(&registry));

        registry.add_listener(&arbiter);
        registry.add_listener(&bridge);
        registry.add_listener(&bus);

        let router = MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&arbiter),
            Arc::clone(&desktop),
            Arc::clone(&bridge),
        );

        info!(media_buffer = settings.media_buffer, "server core ready");
        Self {
            registry,
            arbiter,
            desktop,
            bus,
            bridge,
            router,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn arbiter(&self) -> &Arc<ControlArbiter> {
        &self.arbiter
    }

    pub fn desktop(&self) -> &Arc<DesktopFacade> {
        &self.desktop
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn bridge(&self) -> &Arc<PeerMediaBridge> {
        &self.bridge
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Admits a session, makes it active, and sends it `system/init`.
    ///
    /// The snapshot is taken after activation, so it is never older than any
    /// event already queued to the session.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateSession`] if the ID is already connected.
    pub fn admit(
        &self,
        id: SessionId,
        profile: Profile,
        transport: Arc<dyn SessionTransport>,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = self.registry.add(id, profile, transport)?;
        self.registry.activate(session.id())?;

        let init = self.snapshot_for(session.id());
        if let Err(e) = session.send(ServerMessage::SystemInit(init)) {
            debug!(session_id = %session.id(), "initial state not delivered: {e}");
        }
        Ok(session)
    }

    /// The `system/init` payload for session `id`.
    pub fn snapshot_for(&self, id: &SessionId) -> SystemInit {
        SystemInit {
            session_id: id.clone(),
            sessions: self.registry.snapshot(),
            control: self.arbiter.state(),
            screen: self.desktop.get_screen_size(),
            configurations: self.desktop.list_screen_configurations(),
            keyboard_layout: self.desktop.keyboard_layout(),
            keyboard_modifiers: self.desktop.keyboard_modifiers(),
        }
    }

    /// Routes one inbound text frame from `session`.
    pub fn handle_message(&self, session: &Arc<Session>, raw: &str) {
        self.router.handle(session, raw);
    }

    /// Removes a session.  Returns `false` if it was already gone.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        self.registry.remove(id).is_some()
    }

    /// Feeds the media bridge from `source` on a background task.
    pub fn start_capture(&self, source: Box<dyn FrameSource>) -> JoinHandle<()> {
        self.bridge.run_source(source)
    }
}
