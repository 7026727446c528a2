//! Local room membership abstraction.

use crate::event::EventSink;
use crate::room::{ClientId, RoomId};
use serde_json::Value;

/// The connection layer that owns clients, their room memberships and the
/// delivery path to each client.
///
/// Notify never mutates membership. It reads it when deciding whether a room
/// still needs a backend subscription and when fanning out a message.
pub trait MembershipService: Send + Sync {
    /// Route this service's membership events into `events`.
    ///
    /// Called once by Notify while it is being built.
    fn bind(&self, events: EventSink);

    /// Whether `room` has no members left.
    fn is_empty(&self, room: &str) -> bool;

    /// Current members of `room`.
    fn members_of(&self, room: &str) -> Vec<ClientId>;

    /// All rooms with at least one member.
    fn all_rooms(&self) -> Vec<RoomId>;

    /// All connected clients.
    fn all_clients(&self) -> Vec<ClientId>;

    /// Deliver an event to a single client.
    fn send_to_client(&self, client: &str, event: &str, data: &Value);
}

/// Membership changes reported by the connection layer.
///
/// Emitted after the membership layer has already applied the change, so
/// `is_empty` observes the post-leave state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A client joined a room.
    Joined {
        /// Room joined.
        room: RoomId,
        /// Joining client.
        client: ClientId,
    },
    /// A client left a room.
    Left {
        /// Room left.
        room: RoomId,
        /// Leaving client.
        client: ClientId,
    },
    /// A client left every room it was in, usually on disconnect.
    LeftAll {
        /// Rooms the client was in.
        rooms: Vec<RoomId>,
        /// Leaving client.
        client: ClientId,
    },
}

impl MembershipEvent {
    /// Create a join event.
    #[must_use]
    pub fn joined(room: impl Into<RoomId>, client: impl Into<ClientId>) -> Self {
        Self::Joined {
            room: room.into(),
            client: client.into(),
        }
    }

    /// Create a leave event.
    #[must_use]
    pub fn left(room: impl Into<RoomId>, client: impl Into<ClientId>) -> Self {
        Self::Left {
            room: room.into(),
            client: client.into(),
        }
    }

    /// Create a leave-all event.
    #[must_use]
    pub fn left_all(rooms: Vec<RoomId>, client: impl Into<ClientId>) -> Self {
        Self::LeftAll {
            rooms,
            client: client.into(),
        }
    }
}
