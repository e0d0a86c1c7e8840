//! Test doubles shared by the gateway unit tests.

use crate::channels::{MessageSender, SendError};
use crate::config::Config;
use crate::gateway::server::GatewayState;
use crate::store;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub(crate) const TEST_AUTH_TOKEN: &str = "test-auth-token";

/// Records every send and answers with a fixed outcome.
pub(crate) struct FakeSender {
    outcome: Result<String, String>,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeSender {
    pub fn ok(sid: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(sid.to_string()),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(detail: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(detail.to_string()),
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl MessageSender for FakeSender {
    async fn send(&self, body: &str, to: &str) -> Result<String, SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((body.to_string(), to.to_string()));
        self.outcome.clone().map_err(SendError::Transport)
    }
}

/// Fresh in-memory state: auth mode none, signatures checked against [`TEST_AUTH_TOKEN`].
pub(crate) async fn test_state(sender: Arc<FakeSender>) -> GatewayState {
    let store = store::connect_memory().await.unwrap();
    let mut state = GatewayState::new(Config::default(), Arc::new(store), sender);
    state.webhook_token = Some(TEST_AUTH_TOKEN.to_string());
    state.debug = false;
    state
}
