//! WhatsApp channel: outbound sends through the Twilio Messages API.

use crate::channels::inbound::WHATSAPP_SCHEME;
use crate::channels::{MessageSender, SendError};
use crate::config::WhatsAppCredentials;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const TWILIO_API_BASE: &str = "https://api.twilio.com";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct CreateMessageResponse {
    sid: String,
}

/// Twilio-backed sender. Missing credentials surface as a send error, not at startup.
pub struct WhatsAppSender {
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(credentials: WhatsAppCredentials, api_base: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            account_sid: credentials.account_sid,
            auth_token: credentials.auth_token,
            from_number: credentials.from_number,
            api_base: api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| TWILIO_API_BASE.to_string()),
            client,
        }
    }

    fn messages_url(&self, account_sid: &str) -> String {
        format!("{}/2010-04-01/Accounts/{}/Messages.json", self.api_base, account_sid)
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    async fn send(&self, body: &str, to: &str) -> Result<String, SendError> {
        let sid = self
            .account_sid
            .as_deref()
            .ok_or(SendError::NotConfigured("twilio account sid"))?;
        let token = self
            .auth_token
            .as_deref()
            .ok_or(SendError::NotConfigured("twilio auth token"))?;
        let from = self
            .from_number
            .as_deref()
            .ok_or(SendError::NotConfigured("whatsapp sender number"))?;
        let form = [
            ("From", format!("{}{}", WHATSAPP_SCHEME, from)),
            ("To", format!("{}{}", WHATSAPP_SCHEME, to)),
            ("Body", body.to_string()),
        ];
        let res = self
            .client
            .post(self.messages_url(sid))
            .basic_auth(sid, Some(token))
            .form(&form)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(SendError::Provider { status, body });
        }
        let data: CreateMessageResponse = res
            .json()
            .await
            .map_err(|e| SendError::Transport(format!("invalid provider response: {}", e)))?;
        log::debug!("whatsapp message accepted by provider: {}", data.sid);
        Ok(data.sid)
    }
}
