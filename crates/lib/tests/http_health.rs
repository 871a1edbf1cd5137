//! Integration test: serve the HTTP router on a free port, check health JSON and webhook ingestion.
//! Does not contact Telegram; the channel is only used to record and convert updates.

use bridge::bridge::{http_router, HttpState};
use bridge::channels::{InboundMessage, TelegramChannel};
use bridge::feed::SourceFeed;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn serve(mode: &'static str, secret: Option<&str>) -> (SocketAddr, Arc<TelegramChannel>, mpsc::Receiver<InboundMessage>) {
    let telegram = Arc::new(TelegramChannel::new("test-token", Some("http://127.0.0.1:9".to_string())));
    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let state = HttpState {
        telegram: telegram.clone(),
        inbound_tx,
        webhook_secret: secret.map(String::from),
        telegram_mode: mode,
        port: 0,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, http_router(state)).await;
    });
    (addr, telegram, inbound_rx)
}

fn update_json() -> serde_json::Value {
    serde_json::json!({
        "update_id": 100,
        "message": {
            "message_id": 42,
            "date": 1_700_000_000,
            "chat": { "id": -1001, "title": "News" },
            "from": { "id": 7, "first_name": "Jana" },
            "text": "Hello"
        }
    })
}

#[tokio::test]
async fn health_reports_running_and_mode() {
    let (addr, _telegram, _rx) = serve("polling", None).await;
    let client = reqwest::Client::new();
    let resp = client.get(format!("http://{}/", addr)).send().await.expect("GET /");
    assert!(resp.status().is_success());
    let json: serde_json::Value = resp.json().await.expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("telegramMode").and_then(|v| v.as_str()), Some("polling"));

    let resp = client
        .post(format!("http://{}/telegram/webhook", addr))
        .json(&update_json())
        .send()
        .await
        .expect("POST webhook");
    assert_eq!(resp.status().as_u16(), 404, "webhook route is only served in webhook mode");
}

#[tokio::test]
async fn webhook_checks_secret_and_queues_messages() {
    let (addr, telegram, mut rx) = serve("webhook", Some("s3cret")).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/telegram/webhook", addr);

    let resp = client.post(&url).json(&update_json()).send().await.expect("POST without secret");
    assert_eq!(resp.status().as_u16(), 403);

    let resp = client
        .post(&url)
        .header("X-Telegram-Bot-Api-Secret-Token", "s3cret")
        .body("not json")
        .send()
        .await
        .expect("POST garbage");
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .post(&url)
        .header("X-Telegram-Bot-Api-Secret-Token", "s3cret")
        .json(&update_json())
        .send()
        .await
        .expect("POST update");
    assert!(resp.status().is_success());

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message queued in time")
        .expect("channel open");
    assert_eq!(msg.chat_id, -1001);
    assert_eq!(msg.text.as_deref(), Some("Hello"));
    assert_eq!(msg.sender.display_name(), "Jana");

    let latest = telegram.latest_message(-1001).await.expect("latest recorded");
    assert_eq!(latest.message_id, 42);
}
