//! PeerMediaBridge: fans one encoded frame stream out to every watching peer.
//!
//! ```text
//!   FrameSource ──publish()──► broadcast::Sender ──┬─► pump(alice) ──► MediaTransport
//!                                                  ├─► pump(bob)   ──► MediaTransport
//!                                                  └─► pump(carol) ──► MediaTransport
//! ```
//!
//! Every attached peer gets its own receiver on a `tokio::sync::broadcast`
//! channel and its own pump task.  The channel's capacity is the per-peer
//! buffer: a peer that falls more than `buffer` frames behind loses the oldest
//! frames (its receiver reports `Lagged`) while everyone else carries on.  The
//! producer never waits for any peer.
//!
//! A write that times out costs the peer that one frame.  A closed media
//! transport ends the pump and removes the session from the registry, which
//! closes its connection.
//!
//! The bridge takes no part in control arbitration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use deskcast_core::{EncodedFrame, SessionId, SessionState};

use crate::application::session_registry::{Session, SessionListener, SessionRegistry};

/// Error type for media delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media transport closed")]
    Closed,
    #[error("media transport timed out")]
    Timeout,
    /// The session's connection cannot carry a media stream.
    #[error("media transport unavailable")]
    Unavailable,
}

/// Where a peer's frames are written.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Writes one frame.
    ///
    /// `Timeout` drops the frame and delivery continues; any other error ends
    /// delivery to this peer.
    async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), MediaError>;
}

/// The capture/encoder collaborator.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next encoded frame.  `None` means the source is done.
    async fn next_frame(&mut self) -> Option<EncodedFrame>;
}

struct PeerHandle {
    task: JoinHandle<()>,
    attached_at: Instant,
    generation: u64,
}

type PeerMap = Arc<Mutex<HashMap<SessionId, PeerHandle>>>;

fn lock_peers(
    peers: &Mutex<HashMap<SessionId, PeerHandle>>,
) -> MutexGuard<'_, HashMap<SessionId, PeerHandle>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-producer, multi-consumer frame fan-out.
pub struct PeerMediaBridge {
    frames: broadcast::Sender<EncodedFrame>,
    peers: PeerMap,
    next_generation: AtomicU64,
    registry: Weak<SessionRegistry>,
    buffer: usize,
}

impl PeerMediaBridge {
    /// Creates a bridge whose peers each buffer up to `buffer` frames.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (frames, _) = broadcast::channel(buffer);
        Self {
            frames,
            peers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            registry: Weak::new(),
            buffer,
        }
    }

    /// Sessions whose media transport closes are removed from `registry`.
    pub fn with_registry(mut self, registry: &Arc<SessionRegistry>) -> Self {
        self.registry = Arc::downgrade(registry);
        self
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<SessionId, PeerHandle>> {
        lock_peers(&self.peers)
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Offers a frame to every attached peer.  Never waits.
    ///
    /// Returns the number of peers the frame was queued for.
    pub fn publish(&self, frame: EncodedFrame) -> usize {
        self.frames.send(frame).unwrap_or(0)
    }

    /// Starts streaming to `id` through `transport`.
    ///
    /// Re-attaching an already attached peer replaces its transport.  Must be
    /// called from within a tokio runtime.
    pub fn attach_peer(&self, id: SessionId, transport: Arc<dyn MediaTransport>) {
        let mut rx = self.frames.subscribe();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let peers = Arc::clone(&self.peers);
        let registry = self.registry.clone();
        let peer = id.clone();

        // Holding the map lock across the spawn keeps a pump that fails at
        // once from looking for its entry before it is inserted.
        let mut map = self.peers();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => match transport.write_frame(&frame).await {
                        Ok(()) => {}
                        Err(MediaError::Timeout) => {
                            debug!(session_id = %peer, sequence = frame.sequence, "media write timed out; frame dropped");
                        }
                        Err(e) => {
                            warn!(session_id = %peer, "media transport failed: {e}");
                            break;
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(session_id = %peer, skipped, "peer lagging; oldest frames dropped");
                    }
                    Err(RecvError::Closed) => return,
                }
            }

            // Only the pump that still owns the entry tears the peer down.
            let owned = {
                let mut map = lock_peers(&peers);
                let owned = map
                    .get(&peer)
                    .is_some_and(|handle| handle.generation == generation);
                if owned {
                    map.remove(&peer);
                }
                owned
            };
            if owned {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(&peer);
                }
            }
        });

        let replaced = map.insert(
            id.clone(),
            PeerHandle {
                task,
                attached_at: Instant::now(),
                generation,
            },
        );
        drop(map);
        if let Some(old) = replaced {
            old.task.abort();
        }
        info!(session_id = %id, "media peer attached");
    }

    /// Stops streaming to `id`.  Idempotent.
    pub fn detach_peer(&self, id: &SessionId) -> bool {
        let Some(handle) = self.peers().remove(id) else {
            return false;
        };
        handle.task.abort();
        info!(
            session_id = %id,
            secs = handle.attached_at.elapsed().as_secs(),
            "media peer detached"
        );
        true
    }

    pub fn is_attached(&self, id: &SessionId) -> bool {
        self.peers().contains_key(id)
    }

    /// Peers whose pump is still running.
    pub fn peer_count(&self) -> usize {
        self.peers()
            .values()
            .filter(|handle| !handle.task.is_finished())
            .count()
    }

    /// Pumps `source` into the bridge until it runs dry.
    pub fn run_source(self: &Arc<Self>, mut source: Box<dyn FrameSource>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut frames: u64 = 0;
            while let Some(frame) = source.next_frame().await {
                bridge.publish(frame);
                frames += 1;
            }
            info!(frames, "frame source finished");
        })
    }
}

impl SessionListener for PeerMediaBridge {
    fn on_session_removed(&self, session: &Arc<Session>, _previous: SessionState) {
        self.detach_peer(session.id());
    }
}

impl Drop for PeerMediaBridge {
    fn drop(&mut self) {
        for (_, handle) in self.peers().drain() {
            handle.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session_registry::tests::RecordingTransport;
    use crate::application::session_registry::SessionTransport;
    use deskcast_core::{Permissions, Profile};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Forwards the sequence number of every frame it is given.
    struct ChannelTransport(mpsc::UnboundedSender<u64>);

    #[async_trait]
    impl MediaTransport for ChannelTransport {
        async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), MediaError> {
            self.0.send(frame.sequence).map_err(|_| MediaError::Closed)
        }
    }

    /// Never finishes a write.
    struct StalledTransport;

    #[async_trait]
    impl MediaTransport for StalledTransport {
        async fn write_frame(&self, _frame: &EncodedFrame) -> Result<(), MediaError> {
            std::future::pending().await
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl MediaTransport for FailingTransport {
        async fn write_frame(&self, _frame: &EncodedFrame) -> Result<(), MediaError> {
            Err(MediaError::Closed)
        }
    }

    /// Times out on its first write, then behaves like `ChannelTransport`.
    struct FlakyTransport {
        tx: mpsc::UnboundedSender<u64>,
        failed: std::sync::atomic::AtomicBool,
    }

    impl FlakyTransport {
        fn new(tx: mpsc::UnboundedSender<u64>) -> Self {
            Self {
                tx,
                failed: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MediaTransport for FlakyTransport {
        async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), MediaError> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(MediaError::Timeout);
            }
            self.tx.send(frame.sequence).map_err(|_| MediaError::Closed)
        }
    }

    struct VecSource(std::vec::IntoIter<EncodedFrame>);

    #[async_trait]
    impl FrameSource for VecSource {
        async fn next_frame(&mut self) -> Option<EncodedFrame> {
            self.0.next()
        }
    }

    fn frame(sequence: u64) -> EncodedFrame {
        EncodedFrame::new(sequence, Duration::from_millis(33), sequence == 0, vec![0u8; 16])
    }

    fn channel_peer(bridge: &PeerMediaBridge, id: &str) -> mpsc::UnboundedReceiver<u64> {
        let (tx, rx) = mpsc::unbounded_channel();
        bridge.attach_peer(id.into(), Arc::new(ChannelTransport(tx)));
        rx
    }

    async fn recv_n(rx: &mut mpsc::UnboundedReceiver<u64>, n: usize) -> Vec<u64> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(seq)) => out.push(seq),
                _ => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn test_every_peer_receives_every_frame() {
        let bridge = PeerMediaBridge::new(16);
        let mut a = channel_peer(&bridge, "a");
        let mut b = channel_peer(&bridge, "b");

        for seq in 0..5 {
            assert_eq!(bridge.publish(frame(seq)), 2);
        }

        assert_eq!(recv_n(&mut a, 5).await, vec![0, 1, 2, 3, 4]);
        assert_eq!(recv_n(&mut b, 5).await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_publish_without_peers_is_dropped() {
        let bridge = PeerMediaBridge::new(4);
        assert_eq!(bridge.publish(frame(0)), 0);
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_delay_others() {
        let bridge = PeerMediaBridge::new(4);
        bridge.attach_peer("stuck".into(), Arc::new(StalledTransport));
        let mut fast = channel_peer(&bridge, "fast");

        for seq in 0..20 {
            bridge.publish(frame(seq));
            tokio::task::yield_now().await;
        }

        let got = recv_n(&mut fast, 20).await;
        assert_eq!(got, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let bridge = PeerMediaBridge::new(4);
        let _rx = channel_peer(&bridge, "a");

        assert!(bridge.detach_peer(&"a".into()));
        assert!(!bridge.detach_peer(&"a".into()));
        assert_eq!(bridge.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_transport_detaches_peer() {
        let bridge = PeerMediaBridge::new(4);
        bridge.attach_peer("broken".into(), Arc::new(FailingTransport));
        bridge.publish(frame(0));

        for _ in 0..50 {
            if !bridge.is_attached(&"broken".into()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!bridge.is_attached(&"broken".into()));
        assert_eq!(bridge.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_transport_removes_session_from_registry() {
        // Arrange
        let registry = Arc::new(SessionRegistry::new());
        let bridge = Arc::new(PeerMediaBridge::new(4).with_registry(&registry));
        registry.add_listener(&bridge);
        let transport = Arc::new(RecordingTransport::default());
        let session = registry
            .add(
                "broken".into(),
                Profile::new("broken", Permissions::viewer()),
                Arc::clone(&transport) as Arc<dyn SessionTransport>,
            )
            .unwrap();
        registry.activate(session.id()).unwrap();
        bridge.attach_peer(session.id().clone(), Arc::new(FailingTransport));

        // Act
        bridge.publish(frame(0));
        for _ in 0..50 {
            if registry.get(session.id()).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Assert
        assert!(registry.get(session.id()).is_none());
        assert!(transport.closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!bridge.is_attached(session.id()));
    }

    #[tokio::test]
    async fn test_write_timeout_drops_only_that_frame() {
        let bridge = PeerMediaBridge::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.attach_peer("flaky".into(), Arc::new(FlakyTransport::new(tx)));

        for seq in 0..5 {
            bridge.publish(frame(seq));
        }

        assert_eq!(recv_n(&mut rx, 4).await, vec![1, 2, 3, 4]);
        assert!(bridge.is_attached(&"flaky".into()));
        assert_eq!(bridge.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_reattach_replaces_transport() {
        let bridge = PeerMediaBridge::new(4);
        let mut old = channel_peer(&bridge, "a");
        let mut new = channel_peer(&bridge, "a");

        bridge.publish(frame(7));

        assert_eq!(recv_n(&mut new, 1).await, vec![7]);
        assert!(recv_n(&mut old, 1).await.is_empty());
        assert_eq!(bridge.peer_count(), 1);
    }

    #[tokio::test]
    async fn test_run_source_feeds_attached_peers() {
        let bridge = Arc::new(PeerMediaBridge::new(8));
        let mut rx = channel_peer(&bridge, "a");
        let source = VecSource(vec![frame(0), frame(1), frame(2)].into_iter());

        bridge.run_source(Box::new(source)).await.unwrap();

        assert_eq!(recv_n(&mut rx, 3).await, vec![0, 1, 2]);
    }
}
