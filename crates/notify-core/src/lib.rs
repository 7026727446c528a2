//! # notify-core
//!
//! Room subscription multiplexing for the Notify realtime engine.
//!
//! Many local clients grouped into rooms share a single upstream pub/sub
//! backend. Notify keeps at most one backend subscription per room, no matter
//! how many local members it has, and fans every message arriving on a room
//! out to exactly that room's members.
//!
//! - **Registry** - Rooms with a confirmed backend subscription
//! - **Handler** - Membership events to subscribe/unsubscribe intents
//! - **Router** - Message validation and fan-out
//! - **Notify** - Coordinator and single event loop
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  joined/left   ┌─────────────┐  subscribe    ┌───────────┐
//! │ Membership │───────────────▶│             │──────────────▶│           │
//! │  Service   │                │   Notify    │               │  Backend  │
//! │            │◀───────────────│ (one queue) │◀──────────────│  Adapter  │
//! └────────────┘ send_to_client └─────────────┘ acks/messages └───────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use notify_core::Notify;
//!
//! let notify = Notify::builder()
//!     .membership(hub.clone())
//!     .backend(bus.clone())
//!     .build()?;
//! let handle = notify.spawn();
//! println!("{:?}", handle.queries().get_stats());
//! ```

pub mod backend;
pub mod error;
pub mod event;
pub mod handler;
pub mod membership;
pub mod notify;
pub mod registry;
pub mod room;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendAdapter, BackendEvent, Payload};
pub use error::{ConfigurationError, NotifyError, ValidationError};
pub use event::{EventSink, NotifyEvent};
pub use handler::{RoomEventHandler, SubscriptionPolicy};
pub use membership::{MembershipEvent, MembershipService};
pub use notify::{Notify, NotifyBuilder, NotifyConfig, NotifyHandle, NotifyQueries, NotifyStats};
pub use registry::{PendingIntent, SubscriptionRegistry};
pub use room::{validate_room_name, ClientId, RoomId};
pub use router::{MessageRouter, Notification};
