//! Frame types for the Notify client protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded.
    pub const INVALID_FRAME: u16 = 1001;
    /// The room name was rejected.
    pub const INVALID_ROOM: u16 = 1002;
    /// The client is already in too many rooms.
    pub const TOO_MANY_ROOMS: u16 = 1003;
    /// The client is not a member of the room.
    pub const NOT_IN_ROOM: u16 = 1004;
    /// The client is already a member of the room.
    pub const ALREADY_IN_ROOM: u16 = 1005;
    /// The frame is not valid in this direction.
    pub const UNEXPECTED_FRAME: u16 = 1006;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Subscribe = 0x01,
    Unsubscribe = 0x02,
    Event = 0x03,
    Ack = 0x04,
    Error = 0x05,
    Ping = 0x06,
    Pong = 0x07,
    Connected = 0x08,
}

impl FrameType {
    /// Whether clients may send this frame to the server.
    #[must_use]
    pub fn is_client_frame(self) -> bool {
        matches!(
            self,
            FrameType::Subscribe | FrameType::Unsubscribe | FrameType::Ping | FrameType::Pong
        )
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Join a room.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to join.
        room: String,
    },

    /// Leave a room.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to leave.
        room: String,
    },

    /// A notification published on a room the client is in.
    #[serde(rename = "event")]
    Event {
        /// Event name.
        event: String,
        /// Event data.
        #[serde(default)]
        data: Value,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Sent once after the websocket upgrade.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned client identifier.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Create a Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, room: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            room: room.into(),
        }
    }

    /// Create an Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, room: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            room: room.into(),
        }
    }

    /// Create an Event frame.
    #[must_use]
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Frame::Event {
            event: event.into(),
            data,
        }
    }

    /// Create an Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Create a Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}
