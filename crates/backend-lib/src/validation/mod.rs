// ============================
// relay-backend/src/validation/mod.rs
// ============================
//! Message validation module.

use regex::Regex;
use relay_common::ClientMessage;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

// Common validation constants
const MAX_ID_LENGTH: usize = 64;
const MAX_NAME_LENGTH: usize = 100;
const MAX_EVENT_TYPE_LENGTH: usize = 64;

// Regex patterns for validation
static ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());
static EVENT_TYPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9_]+$").unwrap());

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid meeting ID: {0}")]
    InvalidMeetingId(String),

    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Missing payload field: {0}")]
    MissingPayload(&'static str),

    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

fn validate_id<'a>(
    id: &'a str,
    err: fn(String) -> ValidationError,
    what: &str,
) -> ValidationResult<&'a str> {
    if id.is_empty() {
        return Err(err(format!("{what} must not be empty")));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(err(format!(
            "{what} must be at most {MAX_ID_LENGTH} characters"
        )));
    }
    if !ID_REGEX.is_match(id) {
        return Err(err(format!(
            "{what} must contain only alphanumeric characters, '-' and '_'"
        )));
    }
    Ok(id)
}

/// Validate a meeting ID
pub fn validate_meeting_id(meeting_id: &str) -> ValidationResult<&str> {
    validate_id(meeting_id, ValidationError::InvalidMeetingId, "Meeting ID")
}

/// Validate a user ID
pub fn validate_user_id(user_id: &str) -> ValidationResult<&str> {
    validate_id(user_id, ValidationError::InvalidUserId, "User ID")
}

/// Validate a display name
pub fn validate_name(name: &str) -> ValidationResult<&str> {
    if name.trim().is_empty() {
        return Err(ValidationError::InvalidName(
            "Name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::InvalidName(format!(
            "Name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidName(
            "Name must not contain control characters".to_string(),
        ));
    }
    Ok(name)
}

fn require(value: &Value, field: &'static str) -> ValidationResult<()> {
    if value.is_null() {
        return Err(ValidationError::MissingPayload(field));
    }
    Ok(())
}

/// Check the raw frame size before parsing
pub fn validate_frame_size(size: usize, limit: usize) -> ValidationResult<()> {
    if size > limit {
        return Err(ValidationError::MessageTooLarge { size, limit });
    }
    Ok(())
}

/// Validate a parsed client message
pub fn validate_client_message(msg: &ClientMessage) -> ValidationResult<()> {
    validate_user_id(msg.user_id())?;

    match msg {
        ClientMessage::Join(req) => {
            validate_name(&req.name)?;
        },
        ClientMessage::ConnectionRequest(req) => {
            validate_user_id(&req.other_user_id)?;
            validate_name(&req.name)?;
        },
        ClientMessage::IceCandidate(req) => {
            validate_user_id(&req.other_user_id)?;
            require(&req.candidate, "candidate")?;
        },
        ClientMessage::OfferSdp(req) | ClientMessage::AnswerSdp(req) => {
            validate_user_id(&req.other_user_id)?;
            require(&req.sdp, "sdp")?;
        },
        ClientMessage::StreamChanged(req) => {
            require(&req.stream, "stream")?;
        },
        ClientMessage::UserLeft(_) | ClientMessage::EndMeeting(_) => {},
        ClientMessage::Event(event) => {
            if event.kind.len() > MAX_EVENT_TYPE_LENGTH || !EVENT_TYPE_REGEX.is_match(&event.kind)
            {
                return Err(ValidationError::InvalidEventType(event.kind.clone()));
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::{CustomEvent, JoinRequest, SdpRequest};
    use serde_json::json;

    #[test]
    fn test_validate_meeting_id() {
        assert!(validate_meeting_id("6f9b2c1e-0d7a-4c55-9a43-1b2e4d9c7f10").is_ok());
        assert!(validate_meeting_id("room_42").is_ok());
        assert!(validate_meeting_id("").is_err());
        assert!(validate_meeting_id("../etc").is_err());
        assert!(validate_meeting_id(&"a".repeat(MAX_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Ada Lovelace").is_ok());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("bad\nname").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_client_message() {
        let join = ClientMessage::Join(JoinRequest {
            user_id: "alice".to_string(),
            name: "Alice".to_string(),
        });
        assert!(validate_client_message(&join).is_ok());

        let offer = ClientMessage::OfferSdp(SdpRequest {
            user_id: "alice".to_string(),
            other_user_id: "bob".to_string(),
            sdp: serde_json::Value::Null,
        });
        assert_eq!(
            validate_client_message(&offer),
            Err(ValidationError::MissingPayload("sdp"))
        );

        let spoofed = ClientMessage::OfferSdp(SdpRequest {
            user_id: "alice".to_string(),
            other_user_id: "bob smith".to_string(),
            sdp: json!("v=0"),
        });
        assert!(matches!(
            validate_client_message(&spoofed),
            Err(ValidationError::InvalidUserId(_))
        ));
    }

    #[test]
    fn test_validate_event_type() {
        let event = |kind: &str| {
            ClientMessage::Event(CustomEvent {
                kind: kind.to_string(),
                user_id: "alice".to_string(),
                data: serde_json::Map::new(),
            })
        };
        assert!(validate_client_message(&event("HAND_RAISED")).is_ok());
        assert!(validate_client_message(&event("hand-raised")).is_err());
    }

    #[test]
    fn test_validate_frame_size() {
        assert!(validate_frame_size(10, 10).is_ok());
        assert_eq!(
            validate_frame_size(11, 10),
            Err(ValidationError::MessageTooLarge { size: 11, limit: 10 })
        );
    }
}
