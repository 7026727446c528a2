//! # notify-protocol
//!
//! Wire protocol spoken between Notify servers and their websocket clients.
//!
//! Clients join and leave rooms; the server pushes every notification
//! published on a joined room back as an `event` frame.
//!
//! ## Frame Types
//!
//! - `Subscribe` / `Unsubscribe` - Join or leave a room
//! - `Event` - A notification delivered to a room member
//! - `Ack` / `Error` - Request outcomes
//! - `Ping` / `Pong` / `Connected` - Connection housekeeping
//!
//! Binary websocket messages carry length-prefixed MessagePack; text messages
//! carry the same frames as JSON.
//!
//! ## Example
//!
//! ```rust
//! use notify_protocol::{codec, Frame};
//!
//! let frame = Frame::subscribe(1, "orders:42");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType};

/// Current protocol version, sent in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;
