//! Persistent store consumed by the gateway.
//!
//! Every method is a single atomic operation. The customer upsert is split in two
//! (`find_customer_by_phone`, then `create_customer_if_absent`) and the second step
//! must be safe against concurrent first contact from the same phone number.

mod sqlite;

pub use sqlite::{connect, connect_memory, SqliteStore};

use crate::models::{
    Agent, AgentId, AgentSummary, Customer, CustomerId, Message, MessageDetails, MessageId,
    MessageUpdate, NewMessage, Notification, NotificationId,
};
use async_trait::async_trait;
use std::collections::HashMap;

pub type StoreResult<T> = Result<T, sqlx::Error>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>>;

    /// Insert a customer for `phone` unless one exists, naming a new row `Customer {id}`.
    /// Returns the row and whether this call created it. Never yields two rows for one phone.
    async fn create_customer_if_absent(&self, phone: &str) -> StoreResult<(Customer, bool)>;

    async fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>>;

    async fn list_customers(&self) -> StoreResult<Vec<Customer>>;

    async fn create_message(&self, new: NewMessage) -> StoreResult<Message>;

    /// Apply status / provider id changes. `None` when the message does not exist.
    async fn update_message(
        &self,
        id: MessageId,
        update: MessageUpdate,
    ) -> StoreResult<Option<Message>>;

    /// Messages for a customer, oldest first.
    async fn list_messages(&self, customer: CustomerId) -> StoreResult<Vec<Message>>;

    async fn create_notification(
        &self,
        customer: CustomerId,
        content: &str,
    ) -> StoreResult<Notification>;

    /// Unread notifications across all customers, oldest first.
    async fn list_unread_notifications(&self) -> StoreResult<Vec<Notification>>;

    async fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> StoreResult<Option<Notification>>;

    /// Create an agent with a fresh bearer token.
    async fn create_agent(&self, name: &str) -> StoreResult<Agent>;

    async fn find_agent_by_token(&self, token: &str) -> StoreResult<Option<Agent>>;

    async fn get_agent(&self, id: AgentId) -> StoreResult<Option<Agent>>;

    async fn list_agents(&self) -> StoreResult<Vec<Agent>>;

    /// Delete an agent; their messages keep existing with `agent = null`.
    async fn remove_agent(&self, id: AgentId) -> StoreResult<bool>;
}

/// Look up the customer for `phone`, creating it on first contact.
pub async fn get_or_create_customer(store: &dyn Store, phone: &str) -> StoreResult<Customer> {
    if let Some(c) = store.find_customer_by_phone(phone).await? {
        return Ok(c);
    }
    let (customer, created) = store.create_customer_if_absent(phone).await?;
    if created {
        log::info!("new customer {} ({})", customer.id, customer.phone_number);
    }
    Ok(customer)
}

/// Attach customer and agent details to messages of one conversation.
/// Agents removed since the message was written show as `null`.
pub async fn message_details(
    store: &dyn Store,
    customer: &Customer,
    messages: Vec<Message>,
) -> StoreResult<Vec<MessageDetails>> {
    let mut agents: HashMap<AgentId, Option<AgentSummary>> = HashMap::new();
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let agent = match message.agent {
            Some(id) => {
                if !agents.contains_key(&id) {
                    let found = store.get_agent(id).await?;
                    agents.insert(id, found.as_ref().map(AgentSummary::from));
                }
                agents.get(&id).cloned().flatten()
            }
            None => None,
        };
        out.push(MessageDetails::new(message, customer.clone(), agent));
    }
    Ok(out)
}
