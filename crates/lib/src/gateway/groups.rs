//! Group registry: named sets of live connections and best-effort fan-out.
//!
//! Each connection owns a bounded mailbox. Broadcast snapshots a group's members
//! under the group's shard lock, then delivers with `try_send` outside it, so a
//! slow or dead member never blocks the others or broadcasts to other groups.

use crate::gateway::protocol::GroupEvent;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Global notification group.
pub const NOTIFICATIONS_GROUP: &str = "notifications";

/// Consecutive drops tolerated for one member before it is evicted as a slow consumer.
/// A successful delivery resets the count.
pub const MAX_DROPS: u32 = 100;

/// Group for one customer conversation.
pub fn chat_group(customer_id: i64) -> String {
    format!("chat_{}", customer_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending side of a connection's mailbox, as stored in group member sets.
#[derive(Debug, Clone)]
pub struct Member {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<GroupEvent>>,
    drops: Arc<AtomicU32>,
}

impl Member {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Outcome of one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Members whose mailbox was full; the payload was skipped for them.
    pub dropped: usize,
    /// Members removed from the group (closed mailbox or too many drops).
    pub evicted: usize,
}

pub struct GroupRegistry {
    groups: DashMap<String, HashMap<ConnectionId, Member>>,
    next_id: AtomicU64,
    mailbox_capacity: usize,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

impl GroupRegistry {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            groups: DashMap::new(),
            next_id: AtomicU64::new(1),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Allocate a connection identity and its mailbox. The receiver yields `None`
    /// once the connection is no longer a member of any group.
    pub fn connection(&self) -> (Member, mpsc::Receiver<Arc<GroupEvent>>) {
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let member = Member {
            id,
            tx,
            drops: Arc::new(AtomicU32::new(0)),
        };
        (member, rx)
    }

    /// Add `member` to `group`, creating the group if needed. Joining twice is one join.
    pub fn join(&self, group: &str, member: &Member) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(member.id, member.clone());
        log::debug!("{} joined {}", member.id, group);
    }

    /// Remove `id` from `group`. Unknown group or non-member is a no-op. Empty groups are dropped.
    pub fn leave(&self, group: &str, id: ConnectionId) {
        let removed = match self.groups.get_mut(group) {
            Some(mut members) => members.remove(&id).is_some(),
            None => false,
        };
        self.groups.remove_if(group, |_, members| members.is_empty());
        if removed {
            log::debug!("{} left {}", id, group);
        }
    }

    /// Offer `event` to every current member of `group`.
    pub fn broadcast(&self, group: &str, event: GroupEvent) -> Delivery {
        let members: Vec<Member> = match self.groups.get(group) {
            Some(m) => m.values().cloned().collect(),
            None => return Delivery::default(),
        };
        let event = Arc::new(event);
        let mut report = Delivery::default();
        let mut evict = Vec::new();
        for member in &members {
            match member.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    member.drops.store(0, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    let drops = member.drops.fetch_add(1, Ordering::Relaxed) + 1;
                    if drops >= MAX_DROPS {
                        log::warn!("{} in {}: evicting slow client after {} drops", member.id, group, drops);
                        evict.push(member.id);
                    } else {
                        log::warn!("{} in {}: mailbox full, event dropped", member.id, group);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("{} in {}: connection gone, removing", member.id, group);
                    evict.push(member.id);
                }
            }
        }
        report.evicted = evict.len();
        for id in evict {
            self.leave(group, id);
        }
        log::debug!(
            "broadcast {} to {}: delivered={} dropped={} evicted={}",
            event.kind(),
            group,
            report.delivered,
            report.dropped,
            report.evicted
        );
        report
    }

    /// Member ids of `group`, sorted.
    pub fn members(&self, group: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .groups
            .get(group)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Drop every membership so all live connections see their mailbox close.
    pub fn close_all(&self) {
        let n = self.groups.len();
        self.groups.clear();
        log::info!("closed {} group(s)", n);
    }
}
