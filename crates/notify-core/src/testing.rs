//! In-memory collaborators for unit tests.

use crate::backend::BackendAdapter;
use crate::event::EventSink;
use crate::membership::MembershipService;
use crate::room::{ClientId, RoomId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BackendCall {
    Subscribe(RoomId),
    Unsubscribe(RoomId),
}

/// Records every intent. Acknowledges through the bound sink only when
/// built with [`RecordingBackend::auto_ack`].
#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    events: Mutex<Option<EventSink>>,
    auto_ack: bool,
}

impl RecordingBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn auto_ack() -> Self {
        Self {
            auto_ack: true,
            ..Self::default()
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    /// Whether the Notify instance this backend was bound to is gone.
    pub(crate) fn sink_closed(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(EventSink::is_closed)
    }

    fn ack(&self, call: &BackendCall) {
        if !self.auto_ack {
            return;
        }
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = match call {
                BackendCall::Subscribe(room) => events.subscribed(room.clone()),
                BackendCall::Unsubscribe(room) => events.unsubscribed(room.clone()),
            };
        }
    }

    pub(crate) fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn subscribe_count(&self, room: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Subscribe(r) if r == room))
            .count()
    }

    pub(crate) fn unsubscribe_count(&self, room: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Unsubscribe(r) if r == room))
            .count()
    }
}

impl BackendAdapter for RecordingBackend {
    fn bind(&self, events: EventSink) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn subscribe(&self, room: &str) {
        let call = BackendCall::Subscribe(room.to_string());
        self.calls.lock().unwrap().push(call.clone());
        self.ack(&call);
    }

    fn unsubscribe(&self, room: &str) {
        let call = BackendCall::Unsubscribe(room.to_string());
        self.calls.lock().unwrap().push(call.clone());
        self.ack(&call);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Delivery {
    pub client: ClientId,
    pub event: String,
    pub data: Value,
}

/// Membership kept in sorted maps so assertions are deterministic.
#[derive(Debug, Default)]
pub(crate) struct FakeMembership {
    rooms: Mutex<BTreeMap<RoomId, BTreeSet<ClientId>>>,
    clients: Mutex<BTreeSet<ClientId>>,
    deliveries: Mutex<Vec<Delivery>>,
    events: Mutex<Option<EventSink>>,
}

impl FakeMembership {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connect(&self, client: &str) {
        self.clients.lock().unwrap().insert(client.to_string());
    }

    pub(crate) fn join(&self, room: &str, client: &str) {
        self.connect(client);
        self.rooms
            .lock()
            .unwrap()
            .entry(room.to_string())
            .or_default()
            .insert(client.to_string());
    }

    pub(crate) fn leave(&self, room: &str, client: &str) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(members) = rooms.get_mut(room) {
            members.remove(client);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Leaves every room and returns the rooms left.
    pub(crate) fn leave_all(&self, client: &str) -> Vec<RoomId> {
        let joined: Vec<RoomId> = self
            .rooms
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, members)| members.contains(client))
            .map(|(room, _)| room.clone())
            .collect();
        for room in &joined {
            self.leave(room, client);
        }
        joined
    }

    /// Join and report it, the way a real membership layer would.
    pub(crate) fn join_and_emit(&self, room: &str, client: &str) {
        self.join(room, client);
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.joined(room, client);
        }
    }

    /// Leave and report it.
    pub(crate) fn leave_and_emit(&self, room: &str, client: &str) {
        self.leave(room, client);
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.left(room, client);
        }
    }

    /// Disconnect: leave every room and report it.
    pub(crate) fn disconnect_and_emit(&self, client: &str) {
        let rooms = self.leave_all(client);
        self.clients.lock().unwrap().remove(client);
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.left_all(rooms, client);
        }
    }

    pub(crate) fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl MembershipService for FakeMembership {
    fn bind(&self, events: EventSink) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn is_empty(&self, room: &str) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .map_or(true, BTreeSet::is_empty)
    }

    fn members_of(&self, room: &str) -> Vec<ClientId> {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn all_rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().unwrap().keys().cloned().collect()
    }

    fn all_clients(&self) -> Vec<ClientId> {
        self.clients.lock().unwrap().iter().cloned().collect()
    }

    fn send_to_client(&self, client: &str, event: &str, data: &Value) {
        self.deliveries.lock().unwrap().push(Delivery {
            client: client.to_string(),
            event: event.to_string(),
            data: data.clone(),
        });
    }
}
