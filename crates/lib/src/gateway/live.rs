//! Live connections: one client socket bound to one group.
//!
//! State machine: `Connecting` (mailbox allocated) -> `Open` (joined, frames flow) -> `Closed`
//! (left, mailbox closed). `close` is idempotent and also runs on drop, so every exit path
//! leaves the group.

use crate::gateway::groups::{chat_group, ConnectionId, Delivery, GroupRegistry, Member, NOTIFICATIONS_GROUP};
use crate::gateway::protocol::{decode_frame, FrameError, GroupEvent};
use crate::models::CustomerId;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Duplex frame channel to one client. The WebSocket upgrade is the accept step.
#[async_trait]
pub trait Transport: Send {
    /// Next client frame; `None` once the client closed or the transport failed.
    async fn recv(&mut self) -> Option<Frame>;
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self);
}

/// Transport over an axum WebSocket.
pub struct WsTransport(pub WebSocket);

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.0.recv().await? {
                Ok(Message::Text(t)) => return Some(Frame::Text(t)),
                Ok(Message::Binary(b)) => return Some(Frame::Binary(b)),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => return None,
                Err(e) => {
                    log::debug!("ws receive error: {}", e);
                    return None;
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
    }
}

/// Which group a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Chat { customer_id: CustomerId },
    Notifications,
}

impl Binding {
    pub fn group(&self) -> String {
        match self {
            Binding::Chat { customer_id } => chat_group(*customer_id),
            Binding::Notifications => NOTIFICATIONS_GROUP.to_string(),
        }
    }

    /// Wrap a client payload as this group's event kind.
    pub fn event(&self, payload: serde_json::Value) -> GroupEvent {
        match self {
            Binding::Chat { .. } => GroupEvent::ChatMessage { message: payload },
            Binding::Notifications => GroupEvent::NotificationMessage {
                notification: payload,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Connecting,
    Open,
    Closed,
}

pub struct LiveConnection {
    id: ConnectionId,
    binding: Binding,
    group: String,
    state: LiveState,
    /// Held only while connecting; once joined the group owns the sending side.
    member: Option<Member>,
    mailbox: mpsc::Receiver<Arc<GroupEvent>>,
    groups: Arc<GroupRegistry>,
}

impl LiveConnection {
    pub fn new(binding: Binding, groups: Arc<GroupRegistry>) -> Self {
        let (member, mailbox) = groups.connection();
        Self {
            id: member.id(),
            binding,
            group: binding.group(),
            state: LiveState::Connecting,
            member: Some(member),
            mailbox,
            groups,
        }
    }

    /// Join the bound group. Call before accepting the transport.
    pub fn open(&mut self) {
        if self.state != LiveState::Connecting {
            return;
        }
        if let Some(member) = self.member.take() {
            self.groups.join(&self.group, &member);
        }
        self.state = LiveState::Open;
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn state(&self) -> LiveState {
        self.state
    }

    /// Re-publish a client frame to the bound group. Undecodable frames are dropped.
    pub fn on_frame(&self, frame: Frame) -> Option<Delivery> {
        if self.state != LiveState::Open {
            return None;
        }
        let decoded = match frame {
            Frame::Text(text) => decode_frame(&text),
            Frame::Binary(_) => Err(FrameError::Binary),
        };
        match decoded {
            Ok(payload) => Some(self.groups.broadcast(&self.group, self.binding.event(payload))),
            Err(e) => {
                log::debug!("{}: dropping client frame: {}", self.id, e);
                None
            }
        }
    }

    /// Next event addressed to this connection; `None` once it was removed from its group.
    pub async fn next_event(&mut self) -> Option<Arc<GroupEvent>> {
        self.mailbox.recv().await
    }

    /// Leave the group and release the mailbox. Safe from any state, any number of times.
    pub fn close(&mut self) {
        if self.state == LiveState::Closed {
            return;
        }
        if self.state == LiveState::Open {
            self.groups.leave(&self.group, self.id);
        }
        self.member = None;
        self.mailbox.close();
        self.state = LiveState::Closed;
        log::debug!("{} closed ({})", self.id, self.group);
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pump frames between an open connection and its transport until either side ends.
pub async fn serve<T: Transport>(mut transport: T, mut conn: LiveConnection) {
    conn.open();
    log::info!("{} open on {}", conn.id(), conn.group());
    loop {
        tokio::select! {
            biased;

            event = conn.next_event() => {
                let Some(event) = event else {
                    log::debug!("{}: removed from {}", conn.id(), conn.group());
                    break;
                };
                if let Err(e) = transport.send(event.encode()).await {
                    log::debug!("{}: {}", conn.id(), e);
                    break;
                }
            }
            frame = transport.recv() => {
                let Some(frame) = frame else { break };
                conn.on_frame(frame);
            }
        }
    }
    conn.close();
    transport.close().await;
    log::info!("{} disconnected", conn.id());
}
