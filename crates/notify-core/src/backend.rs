//! Upstream pub/sub backend abstraction.
//!
//! The backend owns the wire protocol to the message bus. Notify only issues
//! subscribe/unsubscribe intents and consumes the events the backend reports
//! back through [`BackendEvent`].

use crate::event::EventSink;
use crate::room::RoomId;
use serde_json::Value;

/// A client of the upstream publish/subscribe bus.
///
/// Both calls are fire-and-forget: they must return without waiting for the
/// bus. Completion is reported later as [`BackendEvent::Subscribed`] or
/// [`BackendEvent::Unsubscribed`].
pub trait BackendAdapter: Send + Sync {
    /// Route this backend's events into `events`.
    ///
    /// Called once by Notify while it is being built.
    fn bind(&self, events: EventSink);

    /// Ask the bus to start delivering messages for `room`.
    fn subscribe(&self, room: &str);

    /// Ask the bus to stop delivering messages for `room`.
    fn unsubscribe(&self, room: &str);
}

/// A message payload as handed over by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Serialized JSON, parsed by the router.
    Text(String),
    /// Already structured.
    Json(Value),
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

/// Events reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A subscription is active.
    Subscribed(RoomId),
    /// A subscription was removed.
    Unsubscribed(RoomId),
    /// A message arrived on a subscribed room.
    Message {
        /// Room the message was published to.
        room: RoomId,
        /// Raw payload.
        payload: Payload,
    },
}

impl BackendEvent {
    /// Create a subscribed ack.
    #[must_use]
    pub fn subscribed(room: impl Into<RoomId>) -> Self {
        Self::Subscribed(room.into())
    }

    /// Create an unsubscribed ack.
    #[must_use]
    pub fn unsubscribed(room: impl Into<RoomId>) -> Self {
        Self::Unsubscribed(room.into())
    }

    /// Create a message event.
    #[must_use]
    pub fn message(room: impl Into<RoomId>, payload: impl Into<Payload>) -> Self {
        Self::Message {
            room: room.into(),
            payload: payload.into(),
        }
    }
}
