use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::DeliveryError;
use crate::protocol::Frame;

pub type ConnectionId = u64;

/// One live client channel as seen by the hub.
///
/// The outbound side is a bounded queue drained by the connection's write pump, so
/// concurrent broadcasts never interleave writes on the same socket.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    torn_down: AtomicBool,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Arc<Self> {
        Arc::new(Self {
            id,
            tx,
            closed: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a frame without waiting. A full queue counts as a failed write.
    pub fn deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal the serving task and write pump to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Returns true only for the first caller.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A point-in-time copy of one registry entry.
#[derive(Debug, Clone)]
pub struct Member {
    pub connection: Arc<Connection>,
    pub name: String,
}

/// The set of active connections and their display names.
///
/// Every operation takes the same lock and only touches the in-memory map, so they
/// are linearizable with respect to each other and never block on I/O.
#[derive(Default)]
pub struct Registry {
    // Ids are handed out in increasing order, so iteration follows insertion order.
    members: Mutex<BTreeMap<ConnectionId, Member>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection with an empty name. Returns false if the id is taken.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut members = self.members.lock();
        let id = connection.id();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(
            id,
            Member {
                connection,
                name: String::new(),
            },
        );
        true
    }

    /// Remove a connection if present and hand back its entry. Removing twice is
    /// the same as removing once.
    pub fn remove(&self, id: ConnectionId) -> Option<Member> {
        self.members.lock().remove(&id)
    }

    /// Returns false (and changes nothing) if the connection is already gone.
    pub fn set_name(&self, id: ConnectionId, name: impl Into<String>) -> bool {
        match self.members.lock().get_mut(&id) {
            Some(member) => {
                member.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.members.lock().get(&id).map(|m| m.name.clone())
    }

    pub fn snapshot(&self) -> Vec<Member> {
        self.members.lock().values().cloned().collect()
    }

    /// Distinct non-empty names, first-seen order.
    pub fn roster(&self) -> Vec<String> {
        roster_of(&self.snapshot())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}

pub(crate) fn roster_of(members: &[Member]) -> Vec<String> {
    let mut seen = HashSet::new();
    members
        .iter()
        .filter(|m| !m.name.is_empty())
        .filter(|m| seen.insert(m.name.as_str()))
        .map(|m| m.name.clone())
        .collect()
}
