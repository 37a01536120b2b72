//! Realtime status channel frames.

use serde::Deserialize;

use crate::StatusMessage;

/// WebSocket close code for a normal, expected closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeFrame {
    /// Content-free frame; counts as liveness only
    Keepalive,
    /// Status push
    Status(StatusMessage),
    /// Anything else the server sent; counts as liveness only
    Unrecognized(String),
}

#[derive(Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: String,
}

impl RealtimeFrame {
    /// Decode a text frame.
    ///
    /// Accepted keepalives: an empty frame, `{}` or a `{"type": ...}` object
    /// without a `status` field.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return RealtimeFrame::Keepalive;
        }

        if let Ok(message) = serde_json::from_str::<StatusMessage>(trimmed) {
            return RealtimeFrame::Status(message);
        }

        match serde_json::from_str::<ControlFrame>(trimmed) {
            Ok(control) if matches!(control.kind.as_str(), "keepalive" | "ping" | "pong") => {
                RealtimeFrame::Keepalive
            }
            _ => RealtimeFrame::Unrecognized(trimmed.to_string()),
        }
    }

    pub fn is_keepalive(&self) -> bool {
        matches!(self, RealtimeFrame::Keepalive)
    }
}

/// Something that happened on the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// Inbound frame
    Frame(RealtimeFrame),
    /// Connection closed; `code` is absent when the socket dropped without a
    /// close handshake
    Closed { code: Option<u16>, reason: String },
}

impl RealtimeEvent {
    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        RealtimeEvent::Closed {
            code,
            reason: reason.into(),
        }
    }

    pub fn status(message: StatusMessage) -> Self {
        RealtimeEvent::Frame(RealtimeFrame::Status(message))
    }

    pub fn keepalive() -> Self {
        RealtimeEvent::Frame(RealtimeFrame::Keepalive)
    }

    /// Normal closure (code 1000) is not a channel failure.
    pub fn is_normal_close(&self) -> bool {
        matches!(self, RealtimeEvent::Closed { code: Some(CLOSE_NORMAL), .. })
    }
}
