//! SQLite store (sqlx). Schema is created on connect.

use super::{Store, StoreResult};
use crate::models::{
    placeholder_customer_name, Agent, AgentId, Customer, CustomerId, Message, MessageId,
    MessageStatus, MessageUpdate, NewMessage, Notification, NotificationId, SenderType,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        phone_number TEXT NOT NULL UNIQUE,
        name         TEXT NOT NULL DEFAULT '',
        created_at   TEXT NOT NULL
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        name       TEXT NOT NULL UNIQUE,
        token      TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );"#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_id         INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
        agent_id            INTEGER REFERENCES agents(id) ON DELETE SET NULL,
        content             TEXT NOT NULL,
        created_at          TEXT NOT NULL,
        status              TEXT NOT NULL,
        sender_type         TEXT NOT NULL,
        whatsapp_message_id TEXT
    );"#,
    r#"
    CREATE INDEX IF NOT EXISTS messages_customer_created
        ON messages (customer_id, created_at, id);"#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        customer_id INTEGER NOT NULL REFERENCES customers(id) ON DELETE CASCADE,
        content     TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        is_read     INTEGER NOT NULL DEFAULT 0
    );"#,
    r#"
    CREATE INDEX IF NOT EXISTS notifications_unread_created
        ON notifications (is_read, created_at, id);"#,
];

/// Connect to `url` (e.g. `sqlite://relay.db?mode=rwc`) and apply the schema.
pub async fn connect(url: &str) -> anyhow::Result<SqliteStore> {
    use anyhow::Context;
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parse database url {}", url))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("connect to sqlite via {}", url))?;
    let store = SqliteStore { pool };
    store.migrate().await.context("run migrations")?;
    Ok(store)
}

/// Private in-memory database (tests, throwaway runs). One pinned connection keeps the data alive.
pub async fn connect_memory() -> anyhow::Result<SqliteStore> {
    use anyhow::Context;
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("open in-memory sqlite")?;
    let store = SqliteStore { pool };
    store.migrate().await.context("run migrations")?;
    Ok(store)
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> StoreResult<()> {
        for stmt in MIGRATIONS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        sqlx::query(&format!("{} WHERE id = ?", SELECT_MESSAGE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| message_from_row(&row))
            .transpose()
    }

    async fn get_notification(&self, id: NotificationId) -> StoreResult<Option<Notification>> {
        sqlx::query(&format!("{} WHERE id = ?", SELECT_NOTIFICATION))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| notification_from_row(&row))
            .transpose()
    }
}

const SELECT_CUSTOMER: &str = "SELECT id, phone_number, name, created_at FROM customers";
const SELECT_AGENT: &str = "SELECT id, name, token, created_at FROM agents";
const SELECT_MESSAGE: &str = "SELECT id, customer_id, agent_id, content, created_at, status, sender_type, whatsapp_message_id FROM messages";
const SELECT_NOTIFICATION: &str =
    "SELECT id, customer_id, content, created_at, is_read FROM notifications";

/// Creation time at microsecond precision, so what we return equals what we store.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that TEXT ordering is time ordering.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_err(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> sqlx::Error {
    sqlx::Error::Decode(e.into())
}

fn ts_from_row(row: &SqliteRow, col: &str) -> StoreResult<DateTime<Utc>> {
    let s: String = row.try_get(col)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(decode_err)
}

fn customer_from_row(row: &SqliteRow) -> StoreResult<Customer> {
    Ok(Customer {
        id: row.try_get("id")?,
        phone_number: row.try_get("phone_number")?,
        name: row.try_get("name")?,
        created_at: ts_from_row(row, "created_at")?,
    })
}

fn agent_from_row(row: &SqliteRow) -> StoreResult<Agent> {
    Ok(Agent {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        token: row.try_get("token")?,
        created_at: ts_from_row(row, "created_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> StoreResult<Message> {
    let status: String = row.try_get("status")?;
    let sender_type: String = row.try_get("sender_type")?;
    Ok(Message {
        id: row.try_get("id")?,
        customer: row.try_get("customer_id")?,
        agent: row.try_get("agent_id")?,
        content: row.try_get("content")?,
        timestamp: ts_from_row(row, "created_at")?,
        status: MessageStatus::from_str(&status).map_err(decode_err)?,
        sender_type: SenderType::from_str(&sender_type).map_err(decode_err)?,
        whatsapp_message_id: row.try_get("whatsapp_message_id")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> StoreResult<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        customer: row.try_get("customer_id")?,
        content: row.try_get("content")?,
        timestamp: ts_from_row(row, "created_at")?,
        is_read: row.try_get("is_read")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_customer_by_phone(&self, phone: &str) -> StoreResult<Option<Customer>> {
        sqlx::query(&format!("{} WHERE phone_number = ?", SELECT_CUSTOMER))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| customer_from_row(&row))
            .transpose()
    }

    async fn create_customer_if_absent(&self, phone: &str) -> StoreResult<(Customer, bool)> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO customers (phone_number, name, created_at) VALUES (?, '', ?) \
             ON CONFLICT(phone_number) DO NOTHING",
        )
        .bind(phone)
        .bind(encode_ts(&now()))
        .execute(&mut *tx)
        .await?;
        let created = inserted.rows_affected() == 1;
        if created {
            let id = inserted.last_insert_rowid();
            sqlx::query("UPDATE customers SET name = ? WHERE id = ?")
                .bind(placeholder_customer_name(id))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        let row = sqlx::query(&format!("{} WHERE phone_number = ?", SELECT_CUSTOMER))
            .bind(phone)
            .fetch_one(&mut *tx)
            .await?;
        let customer = customer_from_row(&row)?;
        tx.commit().await?;
        Ok((customer, created))
    }

    async fn get_customer(&self, id: CustomerId) -> StoreResult<Option<Customer>> {
        sqlx::query(&format!("{} WHERE id = ?", SELECT_CUSTOMER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| customer_from_row(&row))
            .transpose()
    }

    async fn list_customers(&self) -> StoreResult<Vec<Customer>> {
        sqlx::query(&format!("{} ORDER BY created_at, id", SELECT_CUSTOMER))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(customer_from_row)
            .collect()
    }

    async fn create_message(&self, new: NewMessage) -> StoreResult<Message> {
        let timestamp = now();
        let res = sqlx::query(
            "INSERT INTO messages (customer_id, agent_id, content, created_at, status, sender_type, whatsapp_message_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.customer)
        .bind(new.agent)
        .bind(&new.content)
        .bind(encode_ts(&timestamp))
        .bind(new.status.as_str())
        .bind(new.sender_type.as_str())
        .bind(&new.whatsapp_message_id)
        .execute(&self.pool)
        .await?;
        Ok(Message {
            id: res.last_insert_rowid(),
            customer: new.customer,
            agent: new.agent,
            content: new.content,
            timestamp,
            status: new.status,
            sender_type: new.sender_type,
            whatsapp_message_id: new.whatsapp_message_id,
        })
    }

    async fn update_message(
        &self,
        id: MessageId,
        update: MessageUpdate,
    ) -> StoreResult<Option<Message>> {
        let res = sqlx::query(
            "UPDATE messages SET status = COALESCE(?, status), \
             whatsapp_message_id = COALESCE(?, whatsapp_message_id) WHERE id = ?",
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.whatsapp_message_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_message(id).await
    }

    async fn list_messages(&self, customer: CustomerId) -> StoreResult<Vec<Message>> {
        sqlx::query(&format!(
            "{} WHERE customer_id = ? ORDER BY created_at, id",
            SELECT_MESSAGE
        ))
        .bind(customer)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(message_from_row)
        .collect()
    }

    async fn create_notification(
        &self,
        customer: CustomerId,
        content: &str,
    ) -> StoreResult<Notification> {
        let timestamp = now();
        let res = sqlx::query(
            "INSERT INTO notifications (customer_id, content, created_at, is_read) VALUES (?, ?, ?, 0)",
        )
        .bind(customer)
        .bind(content)
        .bind(encode_ts(&timestamp))
        .execute(&self.pool)
        .await?;
        Ok(Notification {
            id: res.last_insert_rowid(),
            customer,
            content: content.to_string(),
            timestamp,
            is_read: false,
        })
    }

    async fn list_unread_notifications(&self) -> StoreResult<Vec<Notification>> {
        sqlx::query(&format!(
            "{} WHERE is_read = 0 ORDER BY created_at, id",
            SELECT_NOTIFICATION
        ))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(notification_from_row)
        .collect()
    }

    async fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> StoreResult<Option<Notification>> {
        let res = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_notification(id).await
    }

    async fn create_agent(&self, name: &str) -> StoreResult<Agent> {
        let token = uuid::Uuid::new_v4().to_string();
        let created_at = now();
        let res = sqlx::query("INSERT INTO agents (name, token, created_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(&token)
            .bind(encode_ts(&created_at))
            .execute(&self.pool)
            .await?;
        Ok(Agent {
            id: res.last_insert_rowid(),
            name: name.to_string(),
            token,
            created_at,
        })
    }

    async fn find_agent_by_token(&self, token: &str) -> StoreResult<Option<Agent>> {
        sqlx::query(&format!("{} WHERE token = ?", SELECT_AGENT))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| agent_from_row(&row))
            .transpose()
    }

    async fn get_agent(&self, id: AgentId) -> StoreResult<Option<Agent>> {
        sqlx::query(&format!("{} WHERE id = ?", SELECT_AGENT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| agent_from_row(&row))
            .transpose()
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        sqlx::query(&format!("{} ORDER BY id", SELECT_AGENT))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(agent_from_row)
            .collect()
    }

    async fn remove_agent(&self, id: AgentId) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentSummary;
    use crate::store::{get_or_create_customer, message_details};

    fn inbound(customer: CustomerId, content: &str) -> NewMessage {
        NewMessage {
            customer,
            agent: None,
            content: content.to_string(),
            status: MessageStatus::Received,
            sender_type: SenderType::Customer,
            whatsapp_message_id: None,
        }
    }

    #[tokio::test]
    async fn first_contact_creates_named_customer_once() {
        let store = connect_memory().await.unwrap();
        let (c1, created1) = store.create_customer_if_absent("+15551234567").await.unwrap();
        let (c2, created2) = store.create_customer_if_absent("+15551234567").await.unwrap();
        assert!(created1);
        assert!(!created2);
        assert_eq!(c1, c2);
        assert_eq!(c1.name, format!("Customer {}", c1.id));
        assert_eq!(store.list_customers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_or_create_returns_existing_row() {
        let store = connect_memory().await.unwrap();
        let a = get_or_create_customer(&store, "+1").await.unwrap();
        let b = get_or_create_customer(&store, "+1").await.unwrap();
        let c = get_or_create_customer(&store, "+2").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn messages_come_back_oldest_first() {
        let store = connect_memory().await.unwrap();
        let (a, _) = store.create_customer_if_absent("+1").await.unwrap();
        let (b, _) = store.create_customer_if_absent("+2").await.unwrap();
        for i in 0..5 {
            store.create_message(inbound(a.id, &format!("a{}", i))).await.unwrap();
            store.create_message(inbound(b.id, &format!("b{}", i))).await.unwrap();
            store.create_notification(a.id, "n").await.unwrap();
        }
        let msgs = store.list_messages(a.id).await.unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a0", "a1", "a2", "a3", "a4"]);
        assert!(msgs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let notes = store.list_unread_notifications().await.unwrap();
        assert_eq!(notes.len(), 5);
        assert!(notes.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn update_message_changes_only_given_fields() {
        let store = connect_memory().await.unwrap();
        let (c, _) = store.create_customer_if_absent("+1").await.unwrap();
        let m = store.create_message(inbound(c.id, "hi")).await.unwrap();
        let updated = store
            .update_message(
                m.id,
                MessageUpdate {
                    status: None,
                    whatsapp_message_id: Some("EXT1".to_string()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, MessageStatus::Received);
        assert_eq!(updated.whatsapp_message_id.as_deref(), Some("EXT1"));
        assert_eq!(updated.timestamp, m.timestamp);
        assert!(store
            .update_message(9999, MessageUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn mark_read_hides_notification() {
        let store = connect_memory().await.unwrap();
        let (c, _) = store.create_customer_if_absent("+1").await.unwrap();
        let n = store.create_notification(c.id, "New message from x").await.unwrap();
        let read = store.mark_notification_read(n.id).await.unwrap().unwrap();
        assert!(read.is_read);
        assert!(store.list_unread_notifications().await.unwrap().is_empty());
        assert!(store.mark_notification_read(n.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removing_agent_keeps_their_messages() {
        let store = connect_memory().await.unwrap();
        let agent = store.create_agent("ana").await.unwrap();
        assert_eq!(
            store.find_agent_by_token(&agent.token).await.unwrap().map(|a| a.id),
            Some(agent.id)
        );
        let (c, _) = store.create_customer_if_absent("+1").await.unwrap();
        let m = store
            .create_message(NewMessage {
                agent: Some(agent.id),
                status: MessageStatus::Sent,
                sender_type: SenderType::Agent,
                ..inbound(c.id, "reply")
            })
            .await
            .unwrap();
        assert!(store.remove_agent(agent.id).await.unwrap());
        let msgs = store.list_messages(c.id).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, m.id);
        assert_eq!(msgs[0].agent, None);
        assert!(!store.remove_agent(agent.id).await.unwrap());
    }

    #[tokio::test]
    async fn message_details_embed_customer_and_agent() {
        let store = connect_memory().await.unwrap();
        let agent = store.create_agent("ana").await.unwrap();
        let (c, _) = store.create_customer_if_absent("+1").await.unwrap();
        store.create_message(inbound(c.id, "question")).await.unwrap();
        store
            .create_message(NewMessage {
                agent: Some(agent.id),
                status: MessageStatus::Sent,
                sender_type: SenderType::Agent,
                ..inbound(c.id, "answer")
            })
            .await
            .unwrap();

        let msgs = store.list_messages(c.id).await.unwrap();
        let details = message_details(&store, &c, msgs).await.unwrap();
        assert_eq!(details.len(), 2);
        assert!(details.iter().all(|d| d.customer_details == c));
        assert_eq!(details[0].agent_details, None);
        assert_eq!(
            details[1].agent_details,
            Some(AgentSummary {
                id: agent.id,
                name: "ana".to_string()
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_contact_yields_one_customer() {
        let dir = std::env::temp_dir().join(format!("relay-store-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.join("relay.db").to_string_lossy());
        let store = std::sync::Arc::new(connect(&url).await.unwrap());

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { get_or_create_customer(store.as_ref(), "+15550001111").await })
            })
            .collect();
        let mut ids = std::collections::BTreeSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap().id);
        }
        assert_eq!(ids.len(), 1);
        assert_eq!(store.list_customers().await.unwrap().len(), 1);

        store.pool().close().await;
        let _ = std::fs::remove_dir_all(dir);
    }
}
