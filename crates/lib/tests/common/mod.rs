//! Shared helpers: a gateway on an ephemeral port backed by in-memory SQLite.
#![allow(dead_code)]

use async_trait::async_trait;
use relay::channels::{MessageSender, SendError};
use relay::config::Config;
use relay::gateway::{self, GatewayState};
use std::sync::Arc;

pub const AUTH_TOKEN: &str = "integration-auth-token";

pub struct FakeSender(pub Result<String, String>);

#[async_trait]
impl MessageSender for FakeSender {
    async fn send(&self, _body: &str, _to: &str) -> Result<String, SendError> {
        self.0.clone().map_err(|detail| SendError::Provider {
            status: 503,
            body: detail,
        })
    }
}

/// Start a gateway; returns its port and the shared state. The server task runs until the test ends.
pub async fn spawn_gateway(config: Config, sender: FakeSender) -> (u16, GatewayState) {
    let store = relay::store::connect_memory().await.expect("in-memory store");
    let mut state = GatewayState::new(config, Arc::new(store), Arc::new(sender));
    state.webhook_token = Some(AUTH_TOKEN.to_string());
    state.debug = false;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let port = listener.local_addr().expect("local_addr").port();
    let served = state.clone();
    tokio::spawn(async move {
        let _ = gateway::serve(listener, served, std::future::pending()).await;
    });
    (port, state)
}
