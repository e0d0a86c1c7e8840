//! Agent authentication for REST and live endpoints.
//!
//! With `gateway.auth.mode = "token"` every request must carry an agent token:
//! `Authorization: Bearer <token>`, or `?token=` on WebSocket URLs where browsers
//! cannot set headers. With mode `none` callers are anonymous.

use crate::config::GatewayAuthMode;
use crate::error::ApiError;
use crate::gateway::server::GatewayState;
use crate::models::Agent;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Token presented by the caller: bearer header first, then the query parameter.
pub fn presented_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    bearer
        .or(query_token.map(str::trim))
        .filter(|t| !t.is_empty())
}

/// Resolve the calling agent. `Ok(None)` means anonymous (auth mode none).
pub async fn authenticate(
    state: &GatewayState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<Option<Agent>, ApiError> {
    if state.config.gateway.auth.mode != GatewayAuthMode::Token {
        return Ok(None);
    }
    let token = presented_token(headers, query_token)
        .ok_or_else(|| ApiError::Unauthorized("missing agent token".to_string()))?;
    match state.store.find_agent_by_token(token).await? {
        Some(agent) => Ok(Some(agent)),
        None => {
            log::debug!("rejected unknown agent token");
            Err(ApiError::Unauthorized("unknown agent token".to_string()))
        }
    }
}
