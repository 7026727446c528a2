//! In-process pub/sub backend.
//!
//! Stands in for an external message bus: subscribe and unsubscribe are
//! acknowledged asynchronously by a worker task, in the order they were
//! requested, and `publish` only reaches Notify for rooms the bus is
//! subscribed to.

use crate::metrics;
use dashmap::DashSet;
use notify_core::{BackendAdapter, EventSink, Payload, RoomId};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum Command {
    Subscribe(RoomId),
    Unsubscribe(RoomId),
}

/// A local [`BackendAdapter`].
pub struct LocalBus {
    subscribed: Arc<DashSet<RoomId>>,
    bound: OnceLock<(mpsc::UnboundedSender<Command>, EventSink)>,
    ack_delay: Duration,
}

impl LocalBus {
    /// Create a bus that acknowledges after `ack_delay`.
    #[must_use]
    pub fn new(ack_delay: Duration) -> Self {
        Self {
            subscribed: Arc::new(DashSet::new()),
            bound: OnceLock::new(),
            ack_delay,
        }
    }

    /// Publish a payload on `room`.
    ///
    /// Returns `false` when the bus has no subscription for the room, in which
    /// case the payload is dropped.
    pub fn publish(&self, room: &str, payload: impl Into<Payload>) -> bool {
        if !self.is_subscribed(room) {
            debug!(room = %room, "Publish on unsubscribed room dropped");
            return false;
        }

        let Some((_, events)) = self.bound.get() else {
            return false;
        };

        match events.message(room, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(room = %room, error = %e, "Publish failed");
                false
            }
        }
    }

    /// Whether the bus currently has a subscription for `room`.
    #[must_use]
    pub fn is_subscribed(&self, room: &str) -> bool {
        self.subscribed.contains(room)
    }

    fn request(&self, command: Command) {
        match self.bound.get() {
            Some((commands, _)) => {
                if commands.send(command).is_err() {
                    warn!("Bus worker stopped, request dropped");
                }
            }
            None => warn!(?command, "Bus not bound, request dropped"),
        }
    }
}

impl BackendAdapter for LocalBus {
    fn bind(&self, events: EventSink) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "Bus bound outside a tokio runtime, bus disabled");
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if self.bound.set((tx, events.clone())).is_err() {
            warn!("Bus already bound, ignoring second binding");
            return;
        }

        runtime.spawn(ack_worker(
            rx,
            events,
            self.subscribed.clone(),
            self.ack_delay,
        ));
        info!(ack_delay_ms = self.ack_delay.as_millis() as u64, "Local bus started");
    }

    fn subscribe(&self, room: &str) {
        metrics::record_intent("subscribe");
        self.request(Command::Subscribe(room.to_string()));
    }

    fn unsubscribe(&self, room: &str) {
        metrics::record_intent("unsubscribe");
        self.request(Command::Unsubscribe(room.to_string()));
    }
}

async fn ack_worker(
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSink,
    subscribed: Arc<DashSet<RoomId>>,
    ack_delay: Duration,
) {
    while let Some(command) = commands.recv().await {
        if !ack_delay.is_zero() {
            tokio::time::sleep(ack_delay).await;
        }

        let sent = match command {
            Command::Subscribe(room) => {
                subscribed.insert(room.clone());
                debug!(room = %room, "Bus subscribed");
                events.subscribed(room)
            }
            Command::Unsubscribe(room) => {
                subscribed.remove(&room);
                debug!(room = %room, "Bus unsubscribed");
                events.unsubscribed(room)
            }
        };

        if sent.is_err() {
            break;
        }
    }
    debug!("Bus worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::RoomHub;
    use notify_core::{MembershipService, Notify};
    use notify_protocol::Frame;
    use serde_json::json;

    async fn settle(notify: &mut Notify) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            notify.process_pending();
        }
    }

    fn wire() -> (Notify, Arc<RoomHub>, Arc<LocalBus>) {
        let hub = Arc::new(RoomHub::new(10));
        let bus = Arc::new(LocalBus::new(Duration::ZERO));
        let notify = Notify::new(hub.clone(), bus.clone()).unwrap();
        (notify, hub, bus)
    }

    #[test]
    fn test_unbound_bus_drops_requests() {
        let bus = LocalBus::new(Duration::ZERO);
        bus.subscribe("orders");
        assert!(!bus.is_subscribed("orders"));
        assert!(!bus.publish("orders", json!({"type": "x"})));
    }

    #[tokio::test]
    async fn test_subscribe_is_acknowledged() {
        let (mut notify, hub, bus) = wire();
        let _rx = hub.connect("c1");

        hub.join("orders", "c1").unwrap();
        settle(&mut notify).await;

        assert!(bus.is_subscribed("orders"));
        assert_eq!(notify.get_subscriptions(), vec!["orders"]);

        hub.leave("orders", "c1").unwrap();
        settle(&mut notify).await;

        assert!(!bus.is_subscribed("orders"));
        assert!(notify.get_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_second_binding_ignored() {
        let (mut notify, hub, bus) = wire();
        let mut other = Notify::new(Arc::new(RoomHub::new(10)), bus.clone()).unwrap();
        let _rx = hub.connect("c1");

        hub.join("orders", "c1").unwrap();
        settle(&mut notify).await;

        assert_eq!(other.process_pending(), 0);
        assert!(other.get_subscriptions().is_empty());
        assert_eq!(notify.get_subscriptions(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_spawned_notify_shuts_down() {
        let (notify, hub, bus) = wire();
        let handle = notify.spawn();
        let _rx = hub.connect("c1");
        hub.join("orders", "c1").unwrap();
        drop(hub);
        drop(bus);

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("event loop did not stop");
    }

    #[tokio::test]
    async fn test_publish_reaches_members_only_when_subscribed() {
        let (mut notify, hub, bus) = wire();
        let mut rx = hub.connect("c1");

        assert!(!bus.publish("orders", json!({"type": "early"})));

        hub.join("orders", "c1").unwrap();
        settle(&mut notify).await;

        assert!(bus.publish("orders", r#"{"type":"created","data":{"id":1}}"#));
        settle(&mut notify).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::event("created", json!({"id": 1}))
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.members_of("orders"), vec!["c1"]);
    }
}
