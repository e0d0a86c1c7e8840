//! Provider webhook: authenticate, persist, fan out.

use crate::channels::signature::{self, SIGNATURE_HEADER};
use crate::channels::{parse_form, InboundMessage};
use crate::error::ApiError;
use crate::gateway::groups::{chat_group, NOTIFICATIONS_GROUP};
use crate::gateway::protocol::GroupEvent;
use crate::gateway::server::GatewayState;
use crate::models::{
    new_message_notification, Message, MessageDetails, MessageStatus, NewMessage, Notification,
    SenderType,
};
use crate::store::get_or_create_customer;
use axum::{
    body::Bytes,
    extract::State,
    http::{header::HOST, HeaderMap, StatusCode, Uri},
};

/// POST /api/webhooks/twilio: form body `From`, `Body`, `MessageSid`.
/// 403 on a bad signature, 200 once the message and notification are stored.
pub async fn twilio_webhook(
    State(state): State<GatewayState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let params = parse_form(&body);
    if !state.debug {
        let Some(token) = state.webhook_token.as_deref() else {
            log::warn!("webhook rejected: no Twilio auth token configured");
            return Err(ApiError::Forbidden);
        };
        let url = request_url(
            state.config.channels.whatsapp.webhook_base_url.as_deref(),
            &uri,
            &headers,
        );
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !signature::validate(token, &url, &params, provided) {
            log::warn!("webhook rejected: signature mismatch for {}", url);
            return Err(ApiError::Forbidden);
        }
    }
    ingest(&state, InboundMessage::from_params(&params)).await?;
    Ok(StatusCode::OK)
}

/// Absolute URL the provider signed. A configured public base wins over the Host header,
/// since proxies rewrite the host and scheme.
pub fn request_url(base: Option<&str>, uri: &Uri, headers: &HeaderMap) -> String {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    if let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) {
        return format!("{}{}", base.trim_end_matches('/'), path);
    }
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let https = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|p| p.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false);
    format!("{}://{}{}", if https { "https" } else { "http" }, host, path)
}

/// Store an inbound message and publish it. Fan-out is best effort; only store errors fail.
pub async fn ingest(
    state: &GatewayState,
    inbound: InboundMessage,
) -> Result<(Message, Notification), ApiError> {
    let customer = get_or_create_customer(state.store.as_ref(), &inbound.from).await?;
    let message = state
        .store
        .create_message(NewMessage {
            customer: customer.id,
            agent: None,
            content: inbound.body,
            status: MessageStatus::Received,
            sender_type: SenderType::Customer,
            whatsapp_message_id: Some(inbound.message_sid),
        })
        .await?;
    let notification = state
        .store
        .create_notification(customer.id, &new_message_notification(&customer))
        .await?;
    log::info!(
        "inbound message {} from customer {} stored",
        message.id,
        customer.id
    );

    let details = MessageDetails::new(message.clone(), customer.clone(), None);
    match GroupEvent::chat(&details) {
        Ok(event) => {
            state.groups.broadcast(&chat_group(customer.id), event);
        }
        Err(e) => log::warn!("encoding message {} for fan-out: {}", message.id, e),
    }
    match GroupEvent::notification(&notification) {
        Ok(event) => {
            state.groups.broadcast(NOTIFICATIONS_GROUP, event);
        }
        Err(e) => log::warn!("encoding notification {} for fan-out: {}", notification.id, e),
    }
    Ok((message, notification))
}
