//! Gateway: HTTP + WebSocket surface of the relay.
//!
//! Single port serves the provider webhook, the agent REST API and the live
//! WebSocket channels. Live fan-out goes through the [`GroupRegistry`].

mod api;
mod auth;
pub mod groups;
pub mod live;
mod outbound;
pub mod protocol;
mod server;
#[cfg(test)]
mod testing;
mod webhook;

pub use groups::{chat_group, Delivery, GroupRegistry, NOTIFICATIONS_GROUP};
pub use outbound::{send_agent_message, SendMessageRequest};
pub use protocol::GroupEvent;
pub use server::{build_router, run_gateway, serve, GatewayState};
pub use webhook::{ingest, request_url};
