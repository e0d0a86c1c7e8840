//! REST endpoints for agent clients: customers, messages, notifications.

use crate::error::ApiError;
use crate::gateway::auth;
use crate::gateway::outbound::{self, SendMessageRequest};
use crate::gateway::server::GatewayState;
use crate::models::{deserialize_optional_id, CustomerId, MessageDetails, Notification, NotificationId};
use crate::store::message_details;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct CustomerQuery {
    /// Kept as text so a malformed id renders as a JSON 400 like every other error.
    pub customer_id: Option<String>,
}

impl CustomerQuery {
    fn customer_id(&self) -> Result<Option<CustomerId>, ApiError> {
        match self.customer_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ApiError::BadRequest(format!("invalid customer_id: {}", raw))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<NotificationId>,
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// GET /api/customers lists every customer; `?customer_id=` returns one.
pub async fn customers(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<CustomerQuery>,
) -> Result<Response, ApiError> {
    auth::authenticate(&state, &headers, None).await?;
    match query.customer_id()? {
        Some(id) => {
            let customer = state
                .store
                .get_customer(id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("customer {} not found", id)))?;
            Ok(Json(customer).into_response())
        }
        None => Ok(Json(state.store.list_customers().await?).into_response()),
    }
}

/// GET /api/messages?customer_id=: one conversation, oldest first. Unknown customers have no messages.
pub async fn list_messages(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<CustomerQuery>,
) -> Result<Json<Vec<MessageDetails>>, ApiError> {
    auth::authenticate(&state, &headers, None).await?;
    let id = query
        .customer_id()?
        .ok_or_else(|| ApiError::BadRequest("customer_id is required".to_string()))?;
    let Some(customer) = state.store.get_customer(id).await? else {
        return Ok(Json(Vec::new()));
    };
    let messages = state.store.list_messages(id).await?;
    Ok(Json(message_details(state.store.as_ref(), &customer, messages).await?))
}

/// POST /api/messages: send an agent reply. 201 with the stored message.
pub async fn create_message(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<MessageDetails>), ApiError> {
    let agent = auth::authenticate(&state, &headers, None).await?;
    let request: SendMessageRequest = parse_body(&body)?;
    let message = outbound::send_agent_message(&state, agent.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/notifications: unread, oldest first.
pub async fn list_notifications(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Notification>>, ApiError> {
    auth::authenticate(&state, &headers, None).await?;
    Ok(Json(state.store.list_unread_notifications().await?))
}

/// POST /api/notifications `{id}`: mark one notification read.
pub async fn mark_notification_read(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Notification>, ApiError> {
    auth::authenticate(&state, &headers, None).await?;
    let request: MarkReadRequest = parse_body(&body)?;
    let id = request
        .id
        .ok_or_else(|| ApiError::BadRequest("id is required".to_string()))?;
    let notification = state
        .store
        .mark_notification_read(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("notification {} not found", id)))?;
    Ok(Json(notification))
}
