//! Agent replies: persist first, then hand to the provider.

use crate::error::ApiError;
use crate::gateway::server::GatewayState;
use crate::models::{
    deserialize_optional_id, Agent, AgentSummary, CustomerId, Message, MessageDetails,
    MessageStatus, MessageUpdate, NewMessage, SenderType,
};
use serde::Deserialize;

/// Body of `POST /api/messages`.
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub customer_id: Option<CustomerId>,
    pub content: Option<String>,
}

/// Persist an agent message and send it. The row survives a provider failure with status `failed`.
pub async fn send_agent_message(
    state: &GatewayState,
    agent: Option<&Agent>,
    request: SendMessageRequest,
) -> Result<MessageDetails, ApiError> {
    let (Some(customer_id), Some(content)) = (
        request.customer_id,
        request.content.filter(|c| !c.trim().is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "customer_id and content are required".to_string(),
        ));
    };
    let customer = state
        .store
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("customer {} not found", customer_id)))?;

    let message = state
        .store
        .create_message(NewMessage {
            customer: customer.id,
            agent: agent.map(|a| a.id),
            content,
            status: MessageStatus::Sent,
            sender_type: SenderType::Agent,
            whatsapp_message_id: None,
        })
        .await?;

    match state.sender.send(&message.content, &customer.phone_number).await {
        Ok(sid) => {
            log::info!("message {} sent to customer {} as {}", message.id, customer.id, sid);
            let update = MessageUpdate {
                whatsapp_message_id: Some(sid.clone()),
                ..Default::default()
            };
            let updated = state.store.update_message(message.id, update).await?;
            let stored = updated.unwrap_or(Message {
                whatsapp_message_id: Some(sid),
                ..message
            });
            Ok(MessageDetails::new(stored, customer, agent.map(AgentSummary::from)))
        }
        Err(e) => {
            log::warn!("sending message {} to customer {} failed: {}", message.id, customer.id, e);
            let update = MessageUpdate {
                status: Some(MessageStatus::Failed),
                ..Default::default()
            };
            state.store.update_message(message.id, update).await?;
            Err(ApiError::ExternalService(e.to_string()))
        }
    }
}
