//! Integration tests: signed provider webhook through to live notification clients,
//! and agent replies through the REST API.

mod common;

use common::{spawn_gateway, FakeSender, AUTH_TOKEN};
use futures_util::StreamExt;
use relay::channels::signature::{compute_signature, SIGNATURE_HEADER};
use relay::config::Config;
use relay::gateway::{chat_group, NOTIFICATIONS_GROUP};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn inbound_form() -> Vec<(String, String)> {
    vec![
        ("From".into(), "whatsapp:+15551234567".into()),
        ("Body".into(), "Hello".into()),
        ("MessageSid".into(), "SM123".into()),
    ]
}

async fn post_webhook(port: u16, token: &str) -> reqwest::Response {
    let url = format!("http://127.0.0.1:{}/api/webhooks/twilio", port);
    let params = inbound_form();
    let sig = compute_signature(token, &url, &params).expect("signature");
    reqwest::Client::new()
        .post(&url)
        .header(SIGNATURE_HEADER, sig)
        .form(&params)
        .send()
        .await
        .expect("webhook request")
}

#[tokio::test]
async fn signed_webhook_reaches_notification_clients() {
    let (port, state) = spawn_gateway(Config::default(), FakeSender(Ok("unused".into()))).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws/notifications", port))
        .await
        .expect("ws connect");
    assert_eq!(state.groups.members(NOTIFICATIONS_GROUP).len(), 1);

    let resp = post_webhook(port, AUTH_TOKEN).await;
    assert_eq!(resp.status(), 200);

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("notification within 5s")
        .expect("stream open")
        .expect("frame");
    let WsMessage::Text(text) = frame else {
        panic!("expected text frame, got {:?}", frame);
    };
    let notification: Value = serde_json::from_str(&text).expect("bare notification JSON");
    let customer_id = notification["customer"].as_i64().expect("customer id");
    assert_eq!(
        notification["content"],
        format!("New message from Customer {}", customer_id)
    );
    assert_eq!(notification["is_read"], false);

    let client = reqwest::Client::new();
    let messages: Value = client
        .get(format!(
            "http://127.0.0.1:{}/api/messages?customer_id={}",
            port, customer_id
        ))
        .send()
        .await
        .expect("list messages")
        .json()
        .await
        .expect("messages JSON");
    assert_eq!(messages.as_array().map(Vec::len), Some(1));
    assert_eq!(messages[0]["content"], "Hello");
    assert_eq!(messages[0]["sender_type"], "customer");
    assert_eq!(messages[0]["status"], "received");
    assert_eq!(messages[0]["whatsapp_message_id"], "SM123");
    assert_eq!(messages[0]["customer_details"]["id"], customer_id);
    assert_eq!(messages[0]["customer_details"]["phone_number"], "+15551234567");
    assert!(messages[0]["agent_details"].is_null());

    let customer: Value = client
        .get(format!(
            "http://127.0.0.1:{}/api/customers?customer_id={}",
            port, customer_id
        ))
        .send()
        .await
        .expect("get customer")
        .json()
        .await
        .expect("customer JSON");
    assert_eq!(customer["phone_number"], "+15551234567");
}

#[tokio::test]
async fn signed_webhook_reaches_chat_clients() {
    let (port, state) = spawn_gateway(Config::default(), FakeSender(Ok("unused".into()))).await;
    let (customer, _) = state
        .store
        .create_customer_if_absent("+15551234567")
        .await
        .expect("customer");

    let (mut ws, _) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws/chat/{}", port, customer.id))
            .await
            .expect("ws connect");
    assert_eq!(state.groups.members(&chat_group(customer.id)).len(), 1);

    let resp = post_webhook(port, AUTH_TOKEN).await;
    assert_eq!(resp.status(), 200);

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("chat message within 5s")
        .expect("stream open")
        .expect("frame");
    let WsMessage::Text(text) = frame else {
        panic!("expected text frame, got {:?}", frame);
    };
    let message: Value = serde_json::from_str(&text).expect("bare message JSON");
    let stored = state.store.list_messages(customer.id).await.expect("list");
    assert_eq!(stored.len(), 1);
    assert_eq!(message["id"], stored[0].id);
    assert_eq!(message["customer"], customer.id);
    assert_eq!(message["content"], "Hello");
    assert_eq!(message["sender_type"], "customer");
    assert_eq!(message["customer_details"]["phone_number"], "+15551234567");
    assert_eq!(message["customer_details"]["name"], customer.name.as_str());
    assert!(message["agent_details"].is_null());
}

#[tokio::test]
async fn forged_webhook_is_forbidden() {
    let (port, state) = spawn_gateway(Config::default(), FakeSender(Ok("unused".into()))).await;

    let resp = post_webhook(port, "not-the-auth-token").await;
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.expect("error JSON");
    assert!(body["error"].is_string());

    assert!(state.store.list_customers().await.expect("list").is_empty());
    assert!(state
        .store
        .list_unread_notifications()
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn agent_reply_success_and_failure() {
    let (port, state) = spawn_gateway(Config::default(), FakeSender(Ok("EXT789".into()))).await;
    let (customer, _) = state
        .store
        .create_customer_if_absent("+15557654321")
        .await
        .expect("customer");
    let url = format!("http://127.0.0.1:{}/api/messages", port);
    let client = reqwest::Client::new();

    let resp = client
        .post(&url)
        .json(&json!({ "customer_id": customer.id, "content": "We are on it" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 201);
    let sent: Value = resp.json().await.expect("message JSON");
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["whatsapp_message_id"], "EXT789");
    assert_eq!(sent["customer_details"]["id"], customer.id);
    assert_eq!(sent["customer_details"]["phone_number"], "+15557654321");
    assert!(sent["agent_details"].is_null());

    let resp = client
        .post(&url)
        .json(&json!({ "customer_id": customer.id.to_string(), "content": "Still on it" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 201);
    let sent: Value = resp.json().await.expect("message JSON");
    assert_eq!(sent["customer"], customer.id);

    let resp = client
        .post(&url)
        .json(&json!({ "customer_id": customer.id }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 400);

    let (port, state) = spawn_gateway(Config::default(), FakeSender(Err("unreachable".into()))).await;
    let (customer, _) = state
        .store
        .create_customer_if_absent("+15557654321")
        .await
        .expect("customer");
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/messages", port))
        .json(&json!({ "customer_id": customer.id, "content": "Hello?" }))
        .send()
        .await
        .expect("send");
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.expect("error JSON");
    assert!(body["error"].as_str().unwrap_or("").contains("unreachable"));

    let rows = state.store.list_messages(customer.id).await.expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status.as_str(), "failed");
}

#[tokio::test]
async fn notification_id_may_be_a_string() {
    let (port, state) = spawn_gateway(Config::default(), FakeSender(Ok("unused".into()))).await;
    let (customer, _) = state
        .store
        .create_customer_if_absent("+15551234567")
        .await
        .expect("customer");
    let notification = state
        .store
        .create_notification(customer.id, "New message from Customer 1")
        .await
        .expect("notification");
    let url = format!("http://127.0.0.1:{}/api/notifications", port);
    let client = reqwest::Client::new();

    let resp = client
        .post(&url)
        .json(&json!({ "id": notification.id.to_string() }))
        .send()
        .await
        .expect("mark read");
    assert_eq!(resp.status(), 200);
    let read: Value = resp.json().await.expect("notification JSON");
    assert_eq!(read["id"], notification.id);
    assert_eq!(read["is_read"], true);

    let resp = client
        .post(&url)
        .json(&json!({ "id": "not-a-number" }))
        .send()
        .await
        .expect("mark read");
    assert_eq!(resp.status(), 400);

    let unread: Value = client
        .get(&url)
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("notifications JSON");
    assert_eq!(unread.as_array().map(Vec::len), Some(0));
}
