//! Subscription registry.
//!
//! Tracks which rooms currently hold a confirmed backend subscription. This is
//! the single source of truth for "do we need to (un)subscribe".

use crate::room::RoomId;
use indexmap::IndexSet;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// An intent issued to the backend that has not been acknowledged yet.
///
/// Only populated under [`SubscriptionPolicy::TrackPending`](crate::SubscriptionPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingIntent {
    /// `subscribe` issued, waiting for `subscribed`.
    Subscribe,
    /// `unsubscribe` issued, waiting for `unsubscribed`.
    Unsubscribe,
}

/// Confirmed subscriptions in insertion order, plus outstanding intents.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: IndexSet<RoomId>,
    pending: HashMap<RoomId, VecDeque<PendingIntent>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `room` has a confirmed subscription.
    #[must_use]
    pub fn has(&self, room: &str) -> bool {
        self.active.contains(room)
    }

    /// Confirmed rooms in the order they were first confirmed.
    #[must_use]
    pub fn list(&self) -> Vec<RoomId> {
        self.active.iter().cloned().collect()
    }

    /// Number of confirmed subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether there are no confirmed subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Record a `subscribed` ack. Idempotent.
    ///
    /// Returns `true` if the room was not tracked before.
    pub fn record_subscribed(&mut self, room: &str) -> bool {
        if self.active.contains(room) {
            return false;
        }
        self.active.insert(room.to_string());
        debug!(room = %room, subscriptions = self.active.len(), "Subscription recorded");
        true
    }

    /// Record an `unsubscribed` ack. Unknown rooms are ignored.
    ///
    /// Returns `true` if the room was tracked.
    pub fn record_unsubscribed(&mut self, room: &str) -> bool {
        // shift_remove keeps list() in first-confirmed order
        let removed = self.active.shift_remove(room);
        if removed {
            debug!(room = %room, subscriptions = self.active.len(), "Subscription removed");
        }
        removed
    }

    /// Most recently issued intent for `room` that is still unacknowledged.
    #[must_use]
    pub fn latest_intent(&self, room: &str) -> Option<PendingIntent> {
        self.pending.get(room).and_then(|q| q.back().copied())
    }

    /// Oldest unacknowledged intent for `room`; the next ack answers this one.
    #[must_use]
    pub fn oldest_intent(&self, room: &str) -> Option<PendingIntent> {
        self.pending.get(room).and_then(|q| q.front().copied())
    }

    /// Number of unacknowledged intents for `room`.
    #[must_use]
    pub fn in_flight(&self, room: &str) -> usize {
        self.pending.get(room).map_or(0, VecDeque::len)
    }

    /// Remember that an intent was issued for `room`.
    pub fn push_intent(&mut self, room: &str, intent: PendingIntent) {
        self.pending
            .entry(room.to_string())
            .or_default()
            .push_back(intent);
    }

    /// Mark the oldest intent for `room` as acknowledged.
    pub fn complete_intent(&mut self, room: &str) -> Option<PendingIntent> {
        let queue = self.pending.get_mut(room)?;
        let intent = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(room);
        }
        intent
    }

    /// Rooms with unacknowledged intents, paired with the latest one.
    #[must_use]
    pub fn pending_rooms(&self) -> Vec<(RoomId, PendingIntent)> {
        let mut rooms: Vec<_> = self
            .pending
            .iter()
            .filter_map(|(room, q)| q.back().map(|intent| (room.clone(), *intent)))
            .collect();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        rooms
    }
}
