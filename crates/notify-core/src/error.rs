//! Error types for Notify.

use thiserror::Error;

/// Raised while assembling a [`Notify`](crate::Notify) instance.
///
/// Fatal to startup: nothing is wired until every collaborator is present.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No membership service was supplied.
    #[error("Membership service is required")]
    MissingMembership,

    /// No backend adapter was supplied.
    #[error("Backend adapter is required")]
    MissingBackend,
}

/// Raised when an inbound backend message cannot be delivered.
///
/// Scoped to a single message; the registry and the event loop are unaffected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Payload is not valid JSON.
    #[error("Malformed payload on room {room}: {reason} (payload: {payload})")]
    Malformed {
        /// Room the message arrived on.
        room: String,
        /// Parser error.
        reason: String,
        /// Offending payload.
        payload: String,
    },

    /// Payload parsed to null.
    #[error("Empty payload on room {room} (payload: {payload})")]
    Empty {
        /// Room the message arrived on.
        room: String,
        /// Offending payload.
        payload: String,
    },

    /// Payload has no `type` field.
    #[error("Notification type undefined on room {room} (payload: {payload})")]
    MissingType {
        /// Room the message arrived on.
        room: String,
        /// Offending payload.
        payload: String,
    },

    /// `type` is present but not a string.
    #[error("Notification type must be a string on room {room} (payload: {payload})")]
    InvalidType {
        /// Room the message arrived on.
        room: String,
        /// Offending payload.
        payload: String,
    },
}

/// Errors surfaced by a running Notify instance.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Setup failure.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Message rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event loop has shut down.
    #[error("Notify event loop is closed")]
    Closed,
}
