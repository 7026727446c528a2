//! The single event queue feeding a Notify instance.
//!
//! Membership and backend events are funnelled into one queue and consumed
//! serially, so the registry is only ever touched by one task.

use crate::backend::{BackendEvent, Payload};
use crate::error::NotifyError;
use crate::membership::MembershipEvent;
use crate::room::{ClientId, RoomId};
use tokio::sync::mpsc;

/// Anything Notify reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEvent {
    /// From the membership layer.
    Membership(MembershipEvent),
    /// From the backend.
    Backend(BackendEvent),
}

impl From<MembershipEvent> for NotifyEvent {
    fn from(event: MembershipEvent) -> Self {
        Self::Membership(event)
    }
}

impl From<BackendEvent> for NotifyEvent {
    fn from(event: BackendEvent) -> Self {
        Self::Backend(event)
    }
}

/// Sending half of the queue, handed to collaborators when Notify binds them.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<NotifyEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<NotifyEvent>) -> Self {
        Self { tx }
    }

    /// Enqueue an event.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn send(&self, event: impl Into<NotifyEvent>) -> Result<(), NotifyError> {
        self.tx.send(event.into()).map_err(|_| NotifyError::Closed)
    }

    /// Whether the receiving side has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Report a join.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn joined(
        &self,
        room: impl Into<RoomId>,
        client: impl Into<ClientId>,
    ) -> Result<(), NotifyError> {
        self.send(MembershipEvent::joined(room, client))
    }

    /// Report a leave.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn left(
        &self,
        room: impl Into<RoomId>,
        client: impl Into<ClientId>,
    ) -> Result<(), NotifyError> {
        self.send(MembershipEvent::left(room, client))
    }

    /// Report a client leaving all of its rooms.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn left_all(
        &self,
        rooms: Vec<RoomId>,
        client: impl Into<ClientId>,
    ) -> Result<(), NotifyError> {
        self.send(MembershipEvent::left_all(rooms, client))
    }

    /// Report a confirmed subscription.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn subscribed(&self, room: impl Into<RoomId>) -> Result<(), NotifyError> {
        self.send(BackendEvent::subscribed(room))
    }

    /// Report a confirmed unsubscription.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn unsubscribed(&self, room: impl Into<RoomId>) -> Result<(), NotifyError> {
        self.send(BackendEvent::unsubscribed(room))
    }

    /// Report a message published on a room.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Closed`] if the Notify instance is gone.
    pub fn message(
        &self,
        room: impl Into<RoomId>,
        payload: impl Into<Payload>,
    ) -> Result<(), NotifyError> {
        self.send(BackendEvent::message(room, payload))
    }
}

/// Create a connected sink and receiver pair.
#[must_use]
pub(crate) fn queue() -> (EventSink, mpsc::UnboundedReceiver<NotifyEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}
