//! In-memory room membership for websocket clients.
//!
//! The hub owns every connected client's outbound queue and the room sets
//! they belong to. It is the [`MembershipService`] Notify is installed on.

use crate::metrics;
use dashmap::DashMap;
use notify_core::{validate_room_name, ClientId, EventSink, MembershipService, RoomId};
use notify_protocol::{codes, Frame};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Membership change rejected by the hub.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// Room name failed validation.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Client is not connected.
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    /// Client is already in the room.
    #[error("Already in room: {0}")]
    AlreadyJoined(RoomId),

    /// Client is not in the room.
    #[error("Not in room: {0}")]
    NotJoined(RoomId),

    /// Client reached its room limit.
    #[error("Room limit of {0} reached")]
    TooManyRooms(usize),
}

impl HubError {
    /// Protocol error code reported to the client.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            HubError::InvalidRoom(_) => codes::INVALID_ROOM,
            HubError::UnknownClient(_) => codes::INVALID_FRAME,
            HubError::AlreadyJoined(_) => codes::ALREADY_IN_ROOM,
            HubError::NotJoined(_) => codes::NOT_IN_ROOM,
            HubError::TooManyRooms(_) => codes::TOO_MANY_ROOMS,
        }
    }
}

struct ClientEntry {
    outbound: mpsc::UnboundedSender<Frame>,
    rooms: HashSet<RoomId>,
}

/// Connected clients and their rooms.
pub struct RoomHub {
    rooms: DashMap<RoomId, HashSet<ClientId>>,
    clients: DashMap<ClientId, ClientEntry>,
    events: OnceLock<EventSink>,
    max_rooms_per_client: usize,
}

impl RoomHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(max_rooms_per_client: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            clients: DashMap::new(),
            events: OnceLock::new(),
            max_rooms_per_client,
        }
    }

    /// Register a client, returning the queue of frames addressed to it.
    pub fn connect(&self, client: impl Into<ClientId>) -> mpsc::UnboundedReceiver<Frame> {
        let client = client.into();
        let (outbound, rx) = mpsc::unbounded_channel();
        self.clients.insert(
            client.clone(),
            ClientEntry {
                outbound,
                rooms: HashSet::new(),
            },
        );
        debug!(client = %client, "Client connected to hub");
        rx
    }

    /// Add `client` to `room`.
    ///
    /// # Errors
    ///
    /// Returns a [`HubError`] if the room name is invalid, the client is
    /// unknown, already in the room, or at its room limit.
    pub fn join(&self, room: &str, client: &str) -> Result<(), HubError> {
        validate_room_name(room).map_err(HubError::InvalidRoom)?;

        {
            let mut entry = self
                .clients
                .get_mut(client)
                .ok_or_else(|| HubError::UnknownClient(client.to_string()))?;

            if entry.rooms.contains(room) {
                return Err(HubError::AlreadyJoined(room.to_string()));
            }
            if entry.rooms.len() >= self.max_rooms_per_client {
                return Err(HubError::TooManyRooms(self.max_rooms_per_client));
            }
            entry.rooms.insert(room.to_string());
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(client.to_string());

        self.emit(|events| events.joined(room, client));
        Ok(())
    }

    /// Remove `client` from `room`.
    ///
    /// # Errors
    ///
    /// Returns a [`HubError`] if the client is unknown or not in the room.
    pub fn leave(&self, room: &str, client: &str) -> Result<(), HubError> {
        {
            let mut entry = self
                .clients
                .get_mut(client)
                .ok_or_else(|| HubError::UnknownClient(client.to_string()))?;

            if !entry.rooms.remove(room) {
                return Err(HubError::NotJoined(room.to_string()));
            }
        }

        self.remove_member(room, client);
        self.emit(|events| events.left(room, client));
        Ok(())
    }

    /// Drop a client and leave every room it was in.
    ///
    /// Returns the rooms that were left, sorted.
    pub fn disconnect(&self, client: &str) -> Vec<RoomId> {
        let Some((_, entry)) = self.clients.remove(client) else {
            return Vec::new();
        };

        let mut rooms: Vec<RoomId> = entry.rooms.into_iter().collect();
        rooms.sort();

        for room in &rooms {
            self.remove_member(room, client);
        }

        if !rooms.is_empty() {
            let left = rooms.clone();
            self.emit(move |events| events.left_all(left, client));
        }

        debug!(client = %client, rooms = rooms.len(), "Client disconnected from hub");
        rooms
    }

    fn remove_member(&self, room: &str, client: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(client);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    fn emit<F>(&self, send: F)
    where
        F: FnOnce(&EventSink) -> Result<(), notify_core::NotifyError>,
    {
        match self.events.get() {
            Some(events) => {
                if let Err(e) = send(events) {
                    warn!(error = %e, "Membership event dropped");
                }
            }
            None => debug!("Hub not bound, membership event skipped"),
        }
    }
}

impl MembershipService for RoomHub {
    fn bind(&self, events: EventSink) {
        if self.events.set(events).is_err() {
            warn!("Hub already bound, ignoring second binding");
        }
    }

    fn is_empty(&self, room: &str) -> bool {
        self.rooms.get(room).map_or(true, |members| members.is_empty())
    }

    fn members_of(&self, room: &str) -> Vec<ClientId> {
        let mut members: Vec<ClientId> = self
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn all_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.iter().map(|e| e.key().clone()).collect();
        rooms.sort();
        rooms
    }

    fn all_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self.clients.iter().map(|e| e.key().clone()).collect();
        clients.sort();
        clients
    }

    fn send_to_client(&self, client: &str, event: &str, data: &Value) {
        let Some(entry) = self.clients.get(client) else {
            trace!(client = %client, "Delivery to departed client skipped");
            return;
        };

        if entry.outbound.send(Frame::event(event, data.clone())).is_ok() {
            metrics::record_delivery();
        } else {
            trace!(client = %client, "Client queue closed");
        }
    }
}
