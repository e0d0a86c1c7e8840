//! Provider channel (WhatsApp via Twilio).
//!
//! Inbound: webhook form payloads are signature-checked and turned into [`InboundMessage`].
//! Outbound: agent replies go through a [`MessageSender`]; the gateway only depends on the trait.

mod inbound;
pub mod signature;
mod whatsapp;

pub use inbound::{parse_form, strip_scheme, InboundMessage, WHATSAPP_SCHEME};
pub use whatsapp::WhatsAppSender;

use async_trait::async_trait;

/// Why an outbound send failed. Rendered as the error detail returned to the agent.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("send request failed: {0}")]
    Transport(String),
    #[error("provider rejected message: {status} {body}")]
    Provider { status: u16, body: String },
}

/// The provider's send API as the gateway sees it.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send `body` to the WhatsApp number `to`; returns the provider message id.
    async fn send(&self, body: &str, to: &str) -> Result<String, SendError>;
}
