//! Shared helpers for the deskcast-server integration tests.
//!
//! Every test builds a real [`ServerCore`] over a [`RecordingDesktopDriver`]
//! and joins sessions through an in-memory transport that records what the
//! server sent.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use deskcast_core::{Permissions, Profile, ServerMessage};
use deskcast_server::application::{
    MediaTransport, Session, SessionTransport, TransportError,
};
use deskcast_server::infrastructure::desktop_driver::RecordingDesktopDriver;
use deskcast_server::{CoreSettings, ServerCore};

/// In-memory session transport.
#[derive(Default)]
pub struct TestTransport {
    sent: Mutex<Vec<ServerMessage>>,
    closed: AtomicBool,
    media: Option<Arc<dyn MediaTransport>>,
}

impl TestTransport {
    pub fn with_media(media: Arc<dyn MediaTransport>) -> Self {
        Self {
            media: Some(media),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<ServerMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Event tags of everything sent so far, oldest first.
    pub fn events(&self) -> Vec<&'static str> {
        self.messages().iter().map(ServerMessage::event).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SessionTransport for TestTransport {
    fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn media_channel(&self) -> Option<Arc<dyn MediaTransport>> {
        self.media.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A core over a fresh recording driver.  Needs a tokio runtime.
pub fn core() -> (Arc<ServerCore>, Arc<RecordingDesktopDriver>) {
    let driver = Arc::new(RecordingDesktopDriver::new());
    let core = Arc::new(ServerCore::new(driver.clone(), CoreSettings::default()));
    (core, driver)
}

pub fn join(
    core: &ServerCore,
    id: &str,
    permissions: Permissions,
) -> (Arc<Session>, Arc<TestTransport>) {
    join_with(core, id, permissions, TestTransport::default())
}

pub fn join_with(
    core: &ServerCore,
    id: &str,
    permissions: Permissions,
    transport: TestTransport,
) -> (Arc<Session>, Arc<TestTransport>) {
    let transport = Arc::new(transport);
    let session = core
        .admit(
            id.into(),
            Profile::new(id, permissions),
            transport.clone() as Arc<dyn SessionTransport>,
        )
        .expect("admit must succeed");
    (session, transport)
}

/// Feeds one browser frame to the core as `session`.
pub fn send(core: &ServerCore, session: &Arc<Session>, frame: Value) {
    core.handle_message(session, &frame.to_string());
}
