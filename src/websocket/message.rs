use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};

/// Frames queued for a connection's writer task.
///
/// Relay payloads stay as `Utf8Bytes` so a broadcast clones a refcount
/// rather than the text for every target.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(Utf8Bytes),
    Close { code: u16, reason: &'static str },
}

impl OutboundMessage {
    pub fn close(code: u16, reason: &'static str) -> Self {
        Self::Close { code, reason }
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Payload of a text frame, if this is one
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::Close { .. } => None,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text),
            Self::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}
