use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Payload delivered to every push-channel subscriber. Shared so a broadcast
/// costs one allocation regardless of the number of sessions.
pub type Message = Arc<str>;

/// Default number of undelivered messages a session may hold before it is
/// evicted as stalled.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Maximum concurrently open push-channel sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("maximum number of sessions reached")]
    MaxSessionsReached,
}

struct RegistryInner {
    sessions: HashMap<String, mpsc::Sender<Message>>,
    queue_capacity: usize,
    max_sessions: usize,
}

/// The set of open push-channel sessions.
///
/// Each session owns a bounded queue drained by its SSE stream. Broadcast
/// never blocks: a session whose queue is full is evicted, closing its
/// stream, so every session still registered has received every message in
/// issue order.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_QUEUE_CAPACITY, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(queue_capacity: usize, max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                queue_capacity: queue_capacity.max(1),
                max_sessions,
            })),
        }
    }

    /// Open a new session with a fresh id.
    ///
    /// The returned guard removes the session when dropped; the receiver
    /// yields every broadcast made while the session is registered.
    pub fn open(&self) -> Result<(SessionGuard, mpsc::Receiver<Message>), RegistryError> {
        let mut inner = self.inner.write();
        if inner.sessions.len() >= inner.max_sessions {
            return Err(RegistryError::MaxSessionsReached);
        }

        let (tx, rx) = mpsc::channel(inner.queue_capacity);
        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.sessions.insert(id.clone(), tx);
        tracing::debug!(session_id = %id, open = inner.sessions.len(), "push session opened");

        Ok((
            SessionGuard {
                id,
                registry: self.clone(),
            },
            rx,
        ))
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.inner.write().sessions.remove(id).is_some();
        if removed {
            tracing::debug!(session_id = %id, "push session closed");
        }
        removed
    }

    /// Close every session; their streams end once drained.
    pub fn close_all(&self) {
        let mut inner = self.inner.write();
        let count = inner.sessions.len();
        inner.sessions.clear();
        if count > 0 {
            tracing::debug!(count, "closed all push sessions");
        }
    }

    /// Deliver `message` to every open session and return how many accepted
    /// it.
    ///
    /// The whole fan-out runs under the write lock so concurrent broadcasts
    /// reach every session in the same order. `try_send` never waits.
    pub fn broadcast(&self, message: Message) -> usize {
        let mut inner = self.inner.write();
        let mut delivered = 0;
        inner.sessions.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id = %id, "push session queue full, evicting stalled subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// RAII handle for an open session. Dropping it unregisters the session.
pub struct SessionGuard {
    id: String,
    registry: SessionRegistry,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.close(&self.id);
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard").field("id", &self.id).finish()
    }
}
