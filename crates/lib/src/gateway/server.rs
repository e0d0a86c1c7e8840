//! Gateway HTTP + WebSocket server (single port).

use crate::channels::{MessageSender, WhatsAppSender};
use crate::config::{self, Config, GatewayAuthMode};
use crate::error::ApiError;
use crate::gateway::api;
use crate::gateway::auth::{self, TokenQuery};
use crate::gateway::groups::GroupRegistry;
use crate::gateway::live::{self, Binding, LiveConnection, WsTransport};
use crate::gateway::webhook;
use crate::models::CustomerId;
use crate::store::{self, Store};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared state for the gateway (config, store, provider sender, live groups).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub sender: Arc<dyn MessageSender>,
    pub groups: Arc<GroupRegistry>,
    /// Twilio auth token used to check webhook signatures. None rejects every webhook unless debug.
    pub webhook_token: Option<String>,
    /// Skips webhook signature validation.
    pub debug: bool,
}

impl GatewayState {
    pub fn new(config: Config, store: Arc<dyn Store>, sender: Arc<dyn MessageSender>) -> Self {
        let webhook_token = config::resolve_whatsapp_credentials(&config).auth_token;
        let debug = config::resolve_debug(&config);
        let groups = Arc::new(GroupRegistry::new(config.live.mailbox_capacity));
        Self {
            config: Arc::new(config),
            store,
            sender,
            groups,
            webhook_token,
            debug,
        }
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/webhooks/twilio", post(webhook::twilio_webhook))
        .route("/api/customers", get(api::customers))
        .route("/api/messages", get(api::list_messages).post(api::create_message))
        .route(
            "/api/notifications",
            get(api::list_notifications).post(api::mark_notification_read),
        )
        .route("/ws/chat/:customer_id", get(ws_chat))
        .route("/ws/notifications", get(ws_notifications))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// When bind is not loopback, agent token auth must be enabled or startup fails.
/// Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` locates the default database next to the config file.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config.gateway.auth.mode != GatewayAuthMode::Token {
        anyhow::bail!(
            "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and add agents with `relay agent add`)",
            bind
        );
    }

    let database_url = config::resolve_database_url(&config, &config_path);
    let store = store::connect(&database_url).await?;
    log::info!("store ready at {}", database_url);

    let credentials = config::resolve_whatsapp_credentials(&config);
    let sender = WhatsAppSender::new(credentials, config.channels.whatsapp.api_base.clone());

    let state = GatewayState::new(config, Arc::new(store), Arc::new(sender));
    if state.debug {
        log::warn!("debug mode: webhook signatures are NOT validated");
    } else if state.webhook_token.is_none() {
        log::warn!("no Twilio auth token configured; webhook requests will be rejected");
    }

    let bind_addr = format!("{}:{}", bind, state.config.gateway.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    serve(listener, state, shutdown_signal()).await
}

/// Serve the gateway on an already bound listener until `shutdown` completes.
/// On shutdown every live connection is closed before the server drains.
pub async fn serve<F>(listener: TcpListener, state: GatewayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let groups = state.groups.clone();
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("shutdown requested, closing live connections");
            groups.close_all();
        })
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// GET / returns a simple health JSON for load balancers and uptime checks.
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "groups": state.groups.group_count(),
        "port": state.config.gateway.port,
    }))
}

/// GET /ws/chat/:customer_id joins `chat_<id>` and upgrades.
async fn ws_chat(
    State(state): State<GatewayState>,
    Path(customer_id): Path<CustomerId>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    auth::authenticate(&state, &headers, query.token.as_deref()).await?;
    Ok(upgrade(ws, Binding::Chat { customer_id }, &state))
}

/// GET /ws/notifications joins the global notification group and upgrades.
async fn ws_notifications(
    State(state): State<GatewayState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    auth::authenticate(&state, &headers, query.token.as_deref()).await?;
    Ok(upgrade(ws, Binding::Notifications, &state))
}

/// The group join happens here, before the upgrade completes. If the upgrade never
/// happens the connection is dropped with the callback and leaves again.
fn upgrade(ws: WebSocketUpgrade, binding: Binding, state: &GatewayState) -> Response {
    let mut conn = LiveConnection::new(binding, state.groups.clone());
    conn.open();
    ws.on_upgrade(move |socket| live::serve(WsTransport(socket), conn))
}
