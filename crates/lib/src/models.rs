//! Persisted records: customers, agents, messages, notifications.
//!
//! Field names follow the JSON shape agent clients already consume (snake_case,
//! `customer`/`agent` as foreign ids, `timestamp` for creation time).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type CustomerId = i64;
pub type AgentId = i64;
pub type MessageId = i64;
pub type NotificationId = i64;

/// A WhatsApp contact, keyed by phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub phone_number: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Support agent. The token is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(skip)]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
    Received,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
            MessageStatus::Received => "received",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            "received" => Ok(MessageStatus::Received),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Customer,
    Agent,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Agent => "agent",
        }
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(SenderType::Customer),
            "agent" => Ok(SenderType::Agent),
            other => Err(format!("unknown sender type: {}", other)),
        }
    }
}

/// One message in a customer conversation, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub customer: CustomerId,
    pub agent: Option<AgentId>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub sender_type: SenderType,
    pub whatsapp_message_id: Option<String>,
}

/// Fields needed to create a message row.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub customer: CustomerId,
    pub agent: Option<AgentId>,
    pub content: String,
    pub status: MessageStatus,
    pub sender_type: SenderType,
    pub whatsapp_message_id: Option<String>,
}

/// The mutable part of a message. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    pub status: Option<MessageStatus>,
    pub whatsapp_message_id: Option<String>,
}

/// "New message from ..." entry shown to agents until marked read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub customer: CustomerId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Agent as embedded in message payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
        }
    }
}

/// A message with its customer and agent embedded. This is what REST replies and
/// live chat frames carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetails {
    pub id: MessageId,
    pub customer: CustomerId,
    pub customer_details: Customer,
    pub agent: Option<AgentId>,
    pub agent_details: Option<AgentSummary>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub sender_type: SenderType,
    pub whatsapp_message_id: Option<String>,
}

impl MessageDetails {
    pub fn new(message: Message, customer: Customer, agent: Option<AgentSummary>) -> Self {
        Self {
            id: message.id,
            customer: message.customer,
            customer_details: customer,
            agent: message.agent,
            agent_details: agent,
            content: message.content,
            timestamp: message.timestamp,
            status: message.status,
            sender_type: message.sender_type,
            whatsapp_message_id: message.whatsapp_message_id,
        }
    }
}

/// Accept an id as a JSON number or a numeric string (`5` or `"5"`). Blank strings and null are `None`.
pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(i64),
        Text(String),
    }

    match Option::<IdRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdRepr::Number(id)) => Ok(Some(id)),
        Some(IdRepr::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid id: {:?}", text)))
        }
    }
}

/// Placeholder display name for a customer first seen on an inbound message.
pub fn placeholder_customer_name(id: CustomerId) -> String {
    format!("Customer {}", id)
}

/// Notification text for a new inbound message.
pub fn new_message_notification(customer: &Customer) -> String {
    format!("New message from {}", customer.name)
}
