//! Presence relay: room-scoped broadcast with no persisted state.
//!
//! Independent of the project store. A client joins a team room and
//! broadcasts opaque JSON payloads to the other members; nothing is
//! stored, ordered, or replayed. The socket layer filters each client's
//! own envelopes out of what it forwards, so a broadcast reaches every
//! member except the sender.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::debug;

/// Unique identifier for a relay room (the team id)
pub type RoomId = String;

/// Unique identifier for a connected relay client
pub type ClientId = String;

/// Buffered envelopes per room before slow members lag
const ROOM_CAPACITY: usize = 256;

/// One broadcast payload in flight
#[derive(Debug, Clone, Serialize)]
pub struct RelayEnvelope {
    pub room_id: RoomId,
    pub sender: ClientId,
    pub payload: JsonValue,
}

/// Messages sent by a relay client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayRequest {
    /// Enter a team room
    JoinTeam { team_id: RoomId },

    /// Broadcast a payload to the other members of a room
    UpdateProject { team_id: RoomId, payload: JsonValue },
}

/// Messages pushed to a relay client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayReply {
    /// A payload broadcast by another member of a joined room
    ReceiveUpdate {
        team_id: RoomId,
        sender: ClientId,
        payload: JsonValue,
    },
}

/// Room registry: one broadcast channel per active room
pub struct RelayHub {
    rooms: DashMap<RoomId, broadcast::Sender<RelayEnvelope>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Join a room, creating it on first use
    pub fn join(&self, room_id: &str) -> broadcast::Receiver<RelayEnvelope> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!("Opening relay room: {}", room_id);
                broadcast::channel(ROOM_CAPACITY).0
            })
            .subscribe()
    }

    /// Deliver an envelope to every current member of its room.
    /// Returns the number of members reached (zero for unknown or
    /// empty rooms).
    pub fn broadcast(&self, envelope: RelayEnvelope) -> usize {
        match self.rooms.get(&envelope.room_id) {
            Some(tx) => tx.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of rooms with at least one past member
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop rooms with no remaining members
    pub fn prune(&self) {
        self.rooms.retain(|room_id, tx| {
            let live = tx.receiver_count() > 0;
            if !live {
                debug!("Pruning empty relay room: {}", room_id);
            }
            live
        });
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}
