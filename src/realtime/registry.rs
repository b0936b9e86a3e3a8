//! Presence & subscription registry
//!
//! Rooms are a mapping from a room key — conversation, user, or
//! (user, agent) panel — to the set of live connection ids; broadcast is
//! "look up the set, push to each". In-memory per process; connections on
//! other processes would hang off a shared pub/sub bridge.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};

use super::events::WsOutgoing;

/// Connection identifier (one websocket)
pub type ConnId = String;

/// Where an event can be delivered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Every connection of one user (multi-device echo)
    User(String),
    /// Every subscriber of a conversation
    Conversation(String),
    /// One user's view of one agent panel
    AgentPanel { user_id: String, agent_key: String },
}

struct Connection {
    user_id: String,
    tx: mpsc::Sender<WsOutgoing>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnId, Connection>,
    rooms: HashMap<RoomKey, HashSet<ConnId>>,
}

/// The registry
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a verified connection to its user and private room
    pub async fn attach(&self, conn_id: &str, user_id: &str, tx: mpsc::Sender<WsOutgoing>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn_id.to_string(),
            Connection {
                user_id: user_id.to_string(),
                tx,
            },
        );
        inner
            .rooms
            .entry(RoomKey::User(user_id.to_string()))
            .or_default()
            .insert(conn_id.to_string());
    }

    /// Join a room; idempotent
    pub async fn join(&self, conn_id: &str, room: RoomKey) {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(conn_id) {
            return;
        }
        inner.rooms.entry(room).or_default().insert(conn_id.to_string());
    }

    /// Leave a room
    pub async fn leave(&self, conn_id: &str, room: &RoomKey) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(conn_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Release everything a connection held
    ///
    /// Other connections of the same user are unaffected.
    pub async fn detach(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(conn_id);
        inner.rooms.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
    }

    /// The user bound to a connection, if attached
    pub async fn user_of(&self, conn_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(conn_id)
            .map(|conn| conn.user_id.clone())
    }

    /// Deliver one event to every member of the given rooms
    ///
    /// A connection in several of the rooms receives the event once. Slow
    /// consumers are skipped, not awaited: realtime fan-out never blocks
    /// the router.
    pub async fn emit(&self, rooms: &[RoomKey], event: &WsOutgoing) {
        let inner = self.inner.read().await;

        let mut delivered: HashSet<&ConnId> = HashSet::new();
        for room in rooms {
            let Some(members) = inner.rooms.get(room) else {
                continue;
            };
            for conn_id in members {
                if !delivered.insert(conn_id) {
                    continue;
                }
                if let Some(conn) = inner.connections.get(conn_id) {
                    if conn.tx.try_send(event.clone()).is_err() {
                        tracing::debug!(conn_id = %conn_id, "dropping event for slow consumer");
                    }
                }
            }
        }
    }

    /// Number of live connections (health surface)
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
