//! Bounded per-session outbound queue.
//!
//! Every session gets its own [`OutboundQueue`].  Producers (the registry
//! broadcast, the event bus fan-out, the router's replies) push without ever
//! waiting; the session's writer task drains the queue onto the socket at
//! whatever pace the client can sustain.
//!
//! # Overflow
//!
//! When a client falls behind and the queue is full, the configured
//! [`OverflowPolicy`] decides what is lost:
//!
//! | Policy        | Effect of pushing onto a full queue            |
//! |---------------|------------------------------------------------|
//! | `DropOldest`  | the oldest queued message is evicted           |
//! | `DropNewest`  | the new message is rejected with `QueueFull`   |
//!
//! Neither policy ever blocks the producer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use deskcast_core::ServerMessage;

/// What to discard when a session's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

/// Failure to hand a message to a session's transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The session's connection is gone.
    #[error("transport closed")]
    Closed,
    /// The queue is full and the policy rejects new messages.
    #[error("outbound queue full")]
    QueueFull,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<ServerMessage>,
    closed: bool,
    dropped: u64,
}

/// Single-consumer, multi-producer bounded message queue.
#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    /// Creates an empty queue.  A zero capacity is raised to 1.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a message without waiting.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once [`close`](Self::close) was called;
    /// [`TransportError::QueueFull`] when full under `DropNewest`.
    pub fn push(&self, message: ServerMessage) -> Result<(), TransportError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.items.len() >= self.capacity {
                state.dropped += 1;
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.items.pop_front();
                    }
                    OverflowPolicy::DropNewest => return Err(TransportError::QueueFull),
                }
            }
            state.items.push_back(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the queue is closed; messages still queued at that
    /// point are discarded because their connection is going away.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.items.pop_front() {
                    return Some(message);
                }
            }
            // `notify_one` stores a permit when nobody is waiting, so a push
            // between the unlock above and this await is not lost.
            self.notify.notified().await;
        }
    }

    /// Closes the queue.  Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of messages waiting.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
