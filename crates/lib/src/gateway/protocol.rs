//! Live channel protocol: events carried by groups and their client encoding.

use serde::{Deserialize, Serialize};

/// An event published to a group. Tag names match the event types clients already know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GroupEvent {
    /// A message in a customer conversation (`chat_<id>` groups).
    #[serde(rename = "chat.message")]
    ChatMessage { message: serde_json::Value },
    /// A notification for all agents (`notifications` group).
    #[serde(rename = "notification.message")]
    NotificationMessage { notification: serde_json::Value },
}

impl GroupEvent {
    pub fn chat<T: Serialize>(message: &T) -> serde_json::Result<Self> {
        Ok(GroupEvent::ChatMessage {
            message: serde_json::to_value(message)?,
        })
    }

    pub fn notification<T: Serialize>(notification: &T) -> serde_json::Result<Self> {
        Ok(GroupEvent::NotificationMessage {
            notification: serde_json::to_value(notification)?,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GroupEvent::ChatMessage { .. } => "chat.message",
            GroupEvent::NotificationMessage { .. } => "notification.message",
        }
    }

    /// The JSON payload carried by the event.
    pub fn payload(&self) -> &serde_json::Value {
        match self {
            GroupEvent::ChatMessage { message } => message,
            GroupEvent::NotificationMessage { notification } => notification,
        }
    }

    /// Text frame sent to a client: the bare payload, without the envelope.
    pub fn encode(&self) -> String {
        self.payload().to_string()
    }
}

/// Why an inbound client frame was dropped.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("binary frames are not supported")]
    Binary,
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound text frame into a structured payload.
pub fn decode_frame(text: &str) -> Result<serde_json::Value, FrameError> {
    Ok(serde_json::from_str(text)?)
}
