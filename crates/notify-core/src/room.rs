//! Room and client identifiers.
//!
//! A room is an opaque string key shared between local membership and the
//! backend channel of the same name.

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = String;

/// A connected client identifier.
pub type ClientId = String;

/// Validate a room name before it reaches the membership layer.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    // Printable ASCII only, backend channel names are compared bytewise
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}
