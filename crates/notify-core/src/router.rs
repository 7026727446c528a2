//! Message fan-out for Notify.
//!
//! The router validates messages arriving from the backend and delivers them
//! to every local member of the room they were published on.

use crate::backend::Payload;
use crate::error::ValidationError;
use crate::membership::MembershipService;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::trace;

/// A validated notification ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Event name sent to clients.
    pub event: String,
    /// Event data, `{}` when the publisher omitted it.
    pub data: Value,
}

impl Notification {
    /// Normalize and validate a raw backend payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the payload is not JSON, is null, or
    /// lacks a string `type` field.
    ///
    /// A missing or falsy `data` (`null`, `false`, `0`, `""`) becomes `{}`.
    pub fn parse(room: &str, payload: Payload) -> Result<Self, ValidationError> {
        let value = match payload {
            Payload::Text(text) => {
                serde_json::from_str::<Value>(&text).map_err(|e| ValidationError::Malformed {
                    room: room.to_string(),
                    reason: e.to_string(),
                    payload: text.clone(),
                })?
            }
            Payload::Json(value) => value,
        };

        let mut fields = match value {
            Value::Null => {
                return Err(ValidationError::Empty {
                    room: room.to_string(),
                    payload: Value::Null.to_string(),
                })
            }
            Value::Object(fields) => fields,
            other => {
                return Err(ValidationError::MissingType {
                    room: room.to_string(),
                    payload: other.to_string(),
                })
            }
        };

        let event = match fields.remove("type") {
            Some(Value::String(event)) => event,
            Some(other) => {
                fields.insert("type".to_string(), other);
                return Err(ValidationError::InvalidType {
                    room: room.to_string(),
                    payload: Value::Object(fields).to_string(),
                });
            }
            None => {
                return Err(ValidationError::MissingType {
                    room: room.to_string(),
                    payload: Value::Object(fields).to_string(),
                })
            }
        };

        let data = match fields.remove("data") {
            Some(data) if !is_falsy(&data) => data,
            _ => Value::Object(Map::new()),
        };

        Ok(Self { event, data })
    }
}

/// `null`, `false`, zero and `""` all mean "no data".
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Delivers backend messages to room members.
pub struct MessageRouter {
    membership: Arc<dyn MembershipService>,
}

impl MessageRouter {
    /// Create a router delivering through `membership`.
    #[must_use]
    pub fn new(membership: Arc<dyn MembershipService>) -> Self {
        Self { membership }
    }

    /// Validate a message and fan it out to the members of `room`.
    ///
    /// Members are resolved once; joins or leaves after that point do not
    /// affect this delivery. Returns the number of clients delivered to.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the payload is malformed, in which
    /// case nobody receives anything.
    pub fn on_message(&self, room: &str, payload: Payload) -> Result<usize, ValidationError> {
        let notification = Notification::parse(room, payload)?;
        Ok(self.deliver(room, &notification))
    }

    /// Fan out an already validated notification.
    pub fn deliver(&self, room: &str, notification: &Notification) -> usize {
        let members = self.membership.members_of(room);

        for member in &members {
            self.membership
                .send_to_client(member, &notification.event, &notification.data);
            trace!(room = %room, client = %member, event = %notification.event, "Delivered");
        }

        members.len()
    }
}
