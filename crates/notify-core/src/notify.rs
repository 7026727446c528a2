//! The Notify coordinator.
//!
//! Wires one [`MembershipService`] and one [`BackendAdapter`] together: binds
//! both to a single event queue, drives subscriptions through the
//! [`RoomEventHandler`] and fans messages out through the [`MessageRouter`].

use crate::backend::{BackendAdapter, BackendEvent};
use crate::error::{ConfigurationError, ValidationError};
use crate::event::{queue, NotifyEvent};
use crate::handler::{RoomEventHandler, SubscriptionPolicy};
use crate::membership::{MembershipEvent, MembershipService};
use crate::room::{ClientId, RoomId};
use crate::router::MessageRouter;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notify configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// How in-flight subscribe/unsubscribe intents are tracked.
    #[serde(default)]
    pub policy: SubscriptionPolicy,
}

/// Counts reported by [`Notify::get_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyStats {
    /// Confirmed backend subscriptions.
    pub subscriptions: usize,
    /// Connected clients.
    pub clients: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
}

/// Builder for [`Notify`].
#[derive(Default)]
pub struct NotifyBuilder {
    membership: Option<Arc<dyn MembershipService>>,
    backend: Option<Arc<dyn BackendAdapter>>,
    config: NotifyConfig,
}

impl NotifyBuilder {
    /// Set the membership service.
    #[must_use]
    pub fn membership(mut self, membership: Arc<dyn MembershipService>) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Set the backend adapter.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn BackendAdapter>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: NotifyConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the subscription policy.
    #[must_use]
    pub fn policy(mut self, policy: SubscriptionPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Validate the collaborators and bind them to a fresh event queue.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if either collaborator is missing.
    pub fn build(self) -> Result<Notify, ConfigurationError> {
        let membership = self.membership.ok_or(ConfigurationError::MissingMembership)?;
        let backend = self.backend.ok_or(ConfigurationError::MissingBackend)?;

        let (sink, inbox) = queue();
        membership.bind(sink.clone());
        backend.bind(sink);

        let (subscriptions, _) = watch::channel(Vec::new());

        info!(policy = ?self.config.policy, "Notify bound to membership and backend");

        Ok(Notify {
            handler: RoomEventHandler::new(backend, membership.clone(), self.config.policy),
            router: MessageRouter::new(membership.clone()),
            membership,
            subscriptions,
            inbox,
        })
    }
}

/// Read-only view of a Notify instance, cheap to clone and safe to use while
/// events are being processed.
#[derive(Clone)]
pub struct NotifyQueries {
    subscriptions: watch::Receiver<Vec<RoomId>>,
    membership: Arc<dyn MembershipService>,
}

impl NotifyQueries {
    /// Confirmed backend subscriptions, in confirmation order.
    #[must_use]
    pub fn get_subscriptions(&self) -> Vec<RoomId> {
        self.subscriptions.borrow().clone()
    }

    /// Connected clients, straight from the membership service.
    #[must_use]
    pub fn get_clients(&self) -> Vec<ClientId> {
        self.membership.all_clients()
    }

    /// Rooms with members, straight from the membership service.
    #[must_use]
    pub fn get_rooms(&self) -> Vec<RoomId> {
        self.membership.all_rooms()
    }

    /// Subscription, client and room counts.
    #[must_use]
    pub fn get_stats(&self) -> NotifyStats {
        NotifyStats {
            subscriptions: self.subscriptions.borrow().len(),
            clients: self.get_clients().len(),
            rooms: self.get_rooms().len(),
        }
    }
}

/// A running room-subscription multiplexer.
pub struct Notify {
    handler: RoomEventHandler,
    router: MessageRouter,
    membership: Arc<dyn MembershipService>,
    subscriptions: watch::Sender<Vec<RoomId>>,
    inbox: mpsc::UnboundedReceiver<NotifyEvent>,
}

impl Notify {
    /// Start building a Notify instance.
    #[must_use]
    pub fn builder() -> NotifyBuilder {
        NotifyBuilder::default()
    }

    /// Shorthand for a builder with both collaborators and default config.
    ///
    /// # Errors
    ///
    /// See [`NotifyBuilder::build`].
    pub fn new(
        membership: Arc<dyn MembershipService>,
        backend: Arc<dyn BackendAdapter>,
    ) -> Result<Self, ConfigurationError> {
        Self::builder().membership(membership).backend(backend).build()
    }

    /// A read-only handle for queries.
    #[must_use]
    pub fn queries(&self) -> NotifyQueries {
        NotifyQueries {
            subscriptions: self.subscriptions.subscribe(),
            membership: self.membership.clone(),
        }
    }

    /// Confirmed backend subscriptions, in confirmation order.
    #[must_use]
    pub fn get_subscriptions(&self) -> Vec<RoomId> {
        self.handler.registry().list()
    }

    /// Connected clients.
    #[must_use]
    pub fn get_clients(&self) -> Vec<ClientId> {
        self.membership.all_clients()
    }

    /// Rooms with members.
    #[must_use]
    pub fn get_rooms(&self) -> Vec<RoomId> {
        self.membership.all_rooms()
    }

    /// Subscription, client and room counts.
    #[must_use]
    pub fn get_stats(&self) -> NotifyStats {
        NotifyStats {
            subscriptions: self.handler.registry().len(),
            clients: self.get_clients().len(),
            rooms: self.get_rooms().len(),
        }
    }

    /// Process one event to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if a backend message was rejected. The
    /// instance stays usable.
    pub fn handle_event(&mut self, event: NotifyEvent) -> Result<(), ValidationError> {
        match event {
            NotifyEvent::Membership(MembershipEvent::Joined { room, client }) => {
                debug!(room = %room, client = %client, "Client joined room");
                self.handler.on_join(&room, &client);
            }
            NotifyEvent::Membership(MembershipEvent::Left { room, client }) => {
                debug!(room = %room, client = %client, "Client left room");
                self.handler.on_leave(&room, &client);
            }
            NotifyEvent::Membership(MembershipEvent::LeftAll { rooms, client }) => {
                debug!(rooms = ?rooms, client = %client, "Client left all rooms");
                self.handler.on_leave_all(&rooms, &client);
            }
            NotifyEvent::Backend(BackendEvent::Subscribed(room)) => {
                debug!(room = %room, "Backend subscribed");
                if self.handler.on_backend_subscribed(&room) {
                    self.publish_subscriptions();
                }
            }
            NotifyEvent::Backend(BackendEvent::Unsubscribed(room)) => {
                debug!(room = %room, "Backend unsubscribed");
                if self.handler.on_backend_unsubscribed(&room) {
                    self.publish_subscriptions();
                }
            }
            NotifyEvent::Backend(BackendEvent::Message { room, payload }) => {
                debug!(room = %room, "Backend message");
                let delivered = self.router.on_message(&room, payload)?;
                debug!(room = %room, recipients = delivered, "Message delivered");
            }
        }
        Ok(())
    }

    /// Process every event already queued, without waiting.
    ///
    /// Rejected messages are logged and skipped. Returns the number of
    /// events processed.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.inbox.try_recv() {
            self.dispatch(event);
            processed += 1;
        }
        processed
    }

    /// Process events until every bound collaborator has dropped its sink.
    ///
    /// Collaborators usually live as long as Notify itself, so prefer
    /// [`Notify::run_until`] or [`Notify::spawn`] when the loop has to stop.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await;
    }

    /// Process events until `shutdown` resolves or the queue closes.
    ///
    /// Events already queued when `shutdown` resolves are still processed.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Notify event loop started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    let drained = self.process_pending();
                    debug!(drained, "Notify shutdown requested");
                    break;
                }

                event = self.inbox.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }

        info!("Notify event loop stopped");
    }

    /// Run the event loop on a background task.
    ///
    /// The loop stops on [`NotifyHandle::shutdown`], or when the handle is
    /// dropped.
    #[must_use]
    pub fn spawn(self) -> NotifyHandle {
        let queries = self.queries();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(async move {
            // Err means the handle was dropped, which stops the loop too
            let _ = stopped.await;
        }));
        NotifyHandle {
            queries,
            stop,
            task,
        }
    }

    fn dispatch(&mut self, event: NotifyEvent) {
        if let Err(e) = self.handle_event(event) {
            warn!(error = %e, "Dropping invalid message");
        }
    }

    fn publish_subscriptions(&self) {
        let list = self.handler.registry().list();
        self.subscriptions.send_replace(list);
    }
}

/// A Notify instance running on a background task.
pub struct NotifyHandle {
    queries: NotifyQueries,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl NotifyHandle {
    /// Read-only query access.
    #[must_use]
    pub fn queries(&self) -> &NotifyQueries {
        &self.queries
    }

    /// Stop the event loop after the events already queued, and wait for it.
    pub async fn shutdown(self) {
        // The loop may already be gone, in which case there is nothing to stop
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Notify event loop did not stop cleanly");
        }
    }

    /// Stop the event loop immediately, dropping queued events.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the event loop has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
