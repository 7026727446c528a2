//! Room event handling.
//!
//! Turns membership changes into backend subscribe/unsubscribe intents and
//! folds backend acknowledgments into the [`SubscriptionRegistry`].

use crate::backend::BackendAdapter;
use crate::membership::MembershipService;
use crate::registry::{PendingIntent, SubscriptionRegistry};
use crate::room::RoomId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// How unacknowledged intents are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPolicy {
    /// Decide purely on confirmed subscriptions.
    ///
    /// Joins racing the first ack each issue `subscribe`, and a room that
    /// empties before its ack arrives keeps the backend subscription.
    #[default]
    ConfirmedOnly,
    /// Track in-flight intents per room.
    ///
    /// At most one `subscribe` is outstanding per room, and a room that
    /// empties while its `subscribe` is in flight gets the matching
    /// `unsubscribe`. Acks for one room must arrive in the order the
    /// intents were issued.
    TrackPending,
}

/// Drives backend intents from membership events.
pub struct RoomEventHandler {
    registry: SubscriptionRegistry,
    backend: Arc<dyn BackendAdapter>,
    membership: Arc<dyn MembershipService>,
    policy: SubscriptionPolicy,
}

impl RoomEventHandler {
    /// Create a handler with an empty registry.
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackendAdapter>,
        membership: Arc<dyn MembershipService>,
        policy: SubscriptionPolicy,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            backend,
            membership,
            policy,
        }
    }

    /// The registry this handler maintains.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> SubscriptionPolicy {
        self.policy
    }

    /// A client joined `room`.
    pub fn on_join(&mut self, room: &str, client: &str) {
        let needs_subscribe = match self.policy {
            SubscriptionPolicy::ConfirmedOnly => !self.registry.has(room),
            SubscriptionPolicy::TrackPending => match self.registry.latest_intent(room) {
                Some(PendingIntent::Subscribe) => false,
                Some(PendingIntent::Unsubscribe) => true,
                None => !self.registry.has(room),
            },
        };

        if needs_subscribe {
            debug!(room = %room, client = %client, "Subscribing");
            self.issue(room, PendingIntent::Subscribe);
        }
    }

    /// A client left `room`.
    pub fn on_leave(&mut self, room: &str, client: &str) {
        self.on_leave_all(&[room.to_string()], client);
    }

    /// A client left several rooms at once.
    pub fn on_leave_all(&mut self, rooms: &[RoomId], client: &str) {
        for room in rooms {
            if !self.membership.is_empty(room) {
                continue;
            }

            let needs_unsubscribe = match self.policy {
                SubscriptionPolicy::ConfirmedOnly => self.registry.has(room),
                SubscriptionPolicy::TrackPending => match self.registry.latest_intent(room) {
                    Some(PendingIntent::Unsubscribe) => false,
                    Some(PendingIntent::Subscribe) => true,
                    None => self.registry.has(room),
                },
            };

            if needs_unsubscribe {
                debug!(room = %room, client = %client, "Unsubscribing");
                self.issue(room, PendingIntent::Unsubscribe);
            }
        }
    }

    /// The backend confirmed a subscription.
    ///
    /// Returns `true` if the registry changed.
    pub fn on_backend_subscribed(&mut self, room: &str) -> bool {
        if self.policy == SubscriptionPolicy::TrackPending {
            match self.registry.oldest_intent(room) {
                Some(PendingIntent::Subscribe) => {
                    self.registry.complete_intent(room);
                }
                Some(PendingIntent::Unsubscribe) => {
                    warn!(room = %room, "Subscribed ack while unsubscribe in flight, ignoring");
                    return false;
                }
                None => {}
            }
        }
        self.registry.record_subscribed(room)
    }

    /// The backend confirmed an unsubscription.
    ///
    /// Returns `true` if the registry changed.
    pub fn on_backend_unsubscribed(&mut self, room: &str) -> bool {
        if self.policy == SubscriptionPolicy::TrackPending {
            match self.registry.oldest_intent(room) {
                Some(PendingIntent::Unsubscribe) => {
                    self.registry.complete_intent(room);
                }
                Some(PendingIntent::Subscribe) => {
                    warn!(room = %room, "Unsubscribed ack while subscribe in flight, ignoring");
                    return false;
                }
                None => {}
            }
        }
        self.registry.record_unsubscribed(room)
    }

    fn issue(&mut self, room: &str, intent: PendingIntent) {
        match intent {
            PendingIntent::Subscribe => self.backend.subscribe(room),
            PendingIntent::Unsubscribe => self.backend.unsubscribe(room),
        }
        if self.policy == SubscriptionPolicy::TrackPending {
            self.registry.push_intent(room, intent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BackendCall, FakeMembership, RecordingBackend};

    fn handler(
        policy: SubscriptionPolicy,
    ) -> (RoomEventHandler, Arc<RecordingBackend>, Arc<FakeMembership>) {
        let backend = Arc::new(RecordingBackend::new());
        let membership = Arc::new(FakeMembership::new());
        let handler = RoomEventHandler::new(backend.clone(), membership.clone(), policy);
        (handler, backend, membership)
    }

    #[test]
    fn test_join_subscribes_once_confirmed() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::ConfirmedOnly);

        membership.join("somekey", "a");
        handler.on_join("somekey", "a");
        assert!(handler.on_backend_subscribed("somekey"));

        membership.join("somekey", "b");
        handler.on_join("somekey", "b");

        assert_eq!(backend.calls(), vec![BackendCall::Subscribe("somekey".into())]);
        assert_eq!(handler.registry().list(), vec!["somekey"]);
    }

    #[test]
    fn test_confirmed_only_duplicate_subscribes_before_ack() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::ConfirmedOnly);

        for client in ["a", "b", "c"] {
            membership.join("somekey", client);
            handler.on_join("somekey", client);
        }
        assert_eq!(backend.subscribe_count("somekey"), 3);

        // Every duplicate gets acked; the registry still holds one entry
        for _ in 0..3 {
            handler.on_backend_subscribed("somekey");
        }
        assert_eq!(handler.registry().list(), vec!["somekey"]);

        for client in ["a", "b", "c"] {
            membership.leave("somekey", client);
            handler.on_leave("somekey", client);
        }
        assert_eq!(backend.unsubscribe_count("somekey"), 1);
    }

    #[test]
    fn test_leave_non_empty_room_keeps_subscription() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::ConfirmedOnly);

        membership.join("somekey", "a");
        membership.join("somekey", "b");
        handler.on_join("somekey", "a");
        handler.on_backend_subscribed("somekey");

        membership.leave("somekey", "a");
        handler.on_leave("somekey", "a");

        assert_eq!(backend.unsubscribe_count("somekey"), 0);
    }

    #[test]
    fn test_leave_all_unsubscribes_emptied_rooms() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::ConfirmedOnly);

        membership.join("r1", "a");
        membership.join("r2", "a");
        membership.join("r2", "b");
        handler.on_join("r1", "a");
        handler.on_join("r2", "a");
        handler.on_backend_subscribed("r1");
        handler.on_backend_subscribed("r2");

        let rooms = membership.leave_all("a");
        handler.on_leave_all(&rooms, "a");

        assert_eq!(backend.unsubscribe_count("r1"), 1);
        assert_eq!(backend.unsubscribe_count("r2"), 0);
    }

    #[test]
    fn test_registry_only_changes_on_ack() {
        let (mut handler, _backend, membership) = handler(SubscriptionPolicy::ConfirmedOnly);

        membership.join("somekey", "a");
        handler.on_join("somekey", "a");
        assert!(handler.registry().list().is_empty());

        handler.on_backend_subscribed("somekey");
        membership.leave("somekey", "a");
        handler.on_leave("somekey", "a");
        assert_eq!(handler.registry().list(), vec!["somekey"]);

        assert!(handler.on_backend_unsubscribed("somekey"));
        assert!(handler.registry().list().is_empty());
        assert!(!handler.on_backend_unsubscribed("somekey"));
    }

    #[test]
    fn test_confirmed_only_leave_before_ack_leaks_subscription() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::ConfirmedOnly);

        membership.join("somekey", "a");
        handler.on_join("somekey", "a");
        membership.leave("somekey", "a");
        handler.on_leave("somekey", "a");
        handler.on_backend_subscribed("somekey");

        assert_eq!(backend.unsubscribe_count("somekey"), 0);
        assert_eq!(handler.registry().list(), vec!["somekey"]);
    }

    #[test]
    fn test_track_pending_single_subscribe_in_flight() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::TrackPending);

        for client in ["a", "b", "c"] {
            membership.join("somekey", client);
            handler.on_join("somekey", client);
        }
        assert_eq!(backend.subscribe_count("somekey"), 1);

        handler.on_backend_subscribed("somekey");
        assert_eq!(handler.registry().list(), vec!["somekey"]);
        assert_eq!(handler.registry().in_flight("somekey"), 0);
    }

    #[test]
    fn test_track_pending_leave_before_ack_unsubscribes() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::TrackPending);

        membership.join("somekey", "a");
        handler.on_join("somekey", "a");
        membership.leave("somekey", "a");
        handler.on_leave("somekey", "a");

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::Subscribe("somekey".into()),
                BackendCall::Unsubscribe("somekey".into()),
            ]
        );

        handler.on_backend_subscribed("somekey");
        assert_eq!(handler.registry().list(), vec!["somekey"]);
        handler.on_backend_unsubscribed("somekey");
        assert!(handler.registry().list().is_empty());
        assert!(handler.registry().pending_rooms().is_empty());
    }

    #[test]
    fn test_track_pending_rejoin_during_unsubscribe() {
        let (mut handler, backend, membership) = handler(SubscriptionPolicy::TrackPending);

        membership.join("somekey", "a");
        handler.on_join("somekey", "a");
        handler.on_backend_subscribed("somekey");

        membership.leave("somekey", "a");
        handler.on_leave("somekey", "a");
        membership.join("somekey", "b");
        handler.on_join("somekey", "b");

        assert_eq!(backend.subscribe_count("somekey"), 2);
        assert_eq!(backend.unsubscribe_count("somekey"), 1);

        handler.on_backend_unsubscribed("somekey");
        assert!(!handler.registry().has("somekey"));
        handler.on_backend_subscribed("somekey");
        assert!(handler.registry().has("somekey"));
        assert!(handler.registry().pending_rooms().is_empty());
    }

    #[test]
    fn test_track_pending_out_of_order_ack_ignored() {
        let (mut handler, _backend, membership) = handler(SubscriptionPolicy::TrackPending);

        membership.join("somekey", "a");
        handler.on_join("somekey", "a");

        assert!(!handler.on_backend_unsubscribed("somekey"));
        assert_eq!(
            handler.registry().latest_intent("somekey"),
            Some(PendingIntent::Subscribe)
        );
    }

    #[test]
    fn test_unsolicited_subscribed_ack_recorded() {
        let (mut handler, _backend, _membership) = handler(SubscriptionPolicy::TrackPending);

        assert!(handler.on_backend_subscribed("elsewhere"));
        assert_eq!(handler.registry().list(), vec!["elsewhere"]);
    }
}
