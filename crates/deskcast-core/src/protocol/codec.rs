//! JSON codec for the browser-facing protocol.
//!
//! Wire format: one WebSocket text frame carries exactly one message,
//!
//! ```text
//! {"event": "<tag>", "payload": { ... }}
//! ```
//!
//! Decoding happens in two steps so that errors can say *what* went wrong:
//! first the frame is parsed as generic JSON and its `"event"` tag extracted,
//! then the whole object is deserialised into a typed [`ClientMessage`].

use serde_json::Value;
use thiserror::Error;

use crate::protocol::event::CLIENT_EVENTS;
use crate::protocol::messages::{ClientMessage, ServerMessage};

/// Largest text frame the server accepts from a browser, in bytes.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame exceeds [`MAX_MESSAGE_LEN`].
    #[error("message too large: {len} bytes (limit {max})")]
    TooLarge { len: usize, max: usize },

    /// The frame is not a JSON object with a string `"event"` field.
    #[error("missing or non-string \"event\" field")]
    MissingEvent,

    /// The `"event"` tag is not one a browser may send.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The tag is known but the payload does not match its schema.
    #[error("malformed payload for {event}: {reason}")]
    MalformedPayload { event: String, reason: String },

    /// The frame is not valid JSON at all.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A server message could not be serialised.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// The event tag the failed frame carried, if it got that far.
    pub fn event(&self) -> Option<&str> {
        match self {
            ProtocolError::UnknownEvent(event) => Some(event),
            ProtocolError::MalformedPayload { event, .. } => Some(event),
            _ => None,
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one text frame received from a browser.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the frame is oversized, not JSON, lacks an
/// `"event"` tag, names an unknown event, or carries a malformed payload.
///
/// # Examples
///
/// ```rust
/// use deskcast_core::protocol::{decode_client_message, ClientMessage};
///
/// let msg = decode_client_message(r#"{"event":"control/move","payload":{"x":10,"y":20}}"#).unwrap();
/// assert_eq!(msg, ClientMessage::Move { x: 10, y: 20 });
/// ```
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::TooLarge {
            len: text.len(),
            max: MAX_MESSAGE_LEN,
        });
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingEvent)?
        .to_string();

    if !CLIENT_EVENTS.contains(&event.as_str()) {
        return Err(ProtocolError::UnknownEvent(event));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::MalformedPayload {
        event,
        reason: e.to_string(),
    })
}

/// Encodes a server message into the text of one WebSocket frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails, which only
/// happens for payloads containing non-string map keys.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::screen::{KeyboardModifiers, ScreenConfiguration};
    use crate::protocol::messages::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_decode_unit_event_without_payload() {
        let msg = decode_client_message(r#"{"event":"control/request"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ControlRequest);
    }

    #[test]
    fn test_decode_unicast() {
        let msg = decode_client_message(
            r#"{"event":"send/unicast","payload":{"receiver":"bob","subject":"chat","body":{"text":"hi"}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SendUnicast {
                receiver: "bob".into(),
                subject: "chat".into(),
                body: json!({"text": "hi"}),
            }
        );
    }

    #[test]
    fn test_decode_screen_size_change() {
        let msg = decode_client_message(
            r#"{"event":"screen/size_change","payload":{"width":1920,"height":1080,"rate":60}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::ScreenSizeChange(ScreenConfiguration::new(1920, 1080, 60))
        );
    }

    #[test]
    fn test_decode_partial_modifiers() {
        let msg = decode_client_message(
            r#"{"event":"keyboard/modifiers","payload":{"num_lock":true}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::KeyboardModifiers(KeyboardModifiers {
                num_lock: Some(true),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(matches!(
            decode_client_message("{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_event() {
        assert_eq!(
            decode_client_message(r#"{"payload":{}}"#),
            Err(ProtocolError::MissingEvent)
        );
    }

    #[test]
    fn test_decode_rejects_server_only_event() {
        let err = decode_client_message(r#"{"event":"control/locked","payload":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownEvent("control/locked".into()));
        assert_eq!(err.event(), Some("control/locked"));
    }

    #[test]
    fn test_decode_rejects_bad_payload_and_reports_event() {
        let err =
            decode_client_message(r#"{"event":"control/move","payload":{"x":"left"}}"#).unwrap_err();
        assert_eq!(err.event(), Some("control/move"));
        assert!(matches!(err, ProtocolError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let big = format!(
            r#"{{"event":"send/broadcast","payload":{{"subject":"x","body":"{}"}}}}"#,
            "a".repeat(MAX_MESSAGE_LEN)
        );
        assert!(matches!(
            decode_client_message(&big),
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_error_reply() {
        let text = encode_server_message(&ServerMessage::error(
            Some("control/request"),
            ErrorKind::ControlDenied,
            "held by alice",
        ))
        .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["event"], "system/error");
        assert_eq!(v["payload"]["kind"], "control_denied");
        assert_eq!(v["payload"]["event"], "control/request");
    }
}
