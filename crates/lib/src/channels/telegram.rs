//! Telegram channel: long-poll getUpdates (or webhook updates), media download via getFile.
//!
//! Every ingested message is recorded before it is handed to the bridge: the latest message per
//! chat answers the album-completion check, and a bounded cache of recent messages answers reply
//! lookups (the Bot API has no history fetch).

use crate::channels::inbound::{InboundMessage, MediaKind, MediaRef, QuotedMessage, SenderIdentity};
use crate::channels::registry::ChannelHandle;
use crate::feed::{FeedError, LatestMessage, SourceFeed};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;
const RECENT_CAPACITY: usize = 512;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub channel_post: Option<TelegramMessage>,
}

impl TelegramUpdate {
    pub fn into_message(self) -> Option<TelegramMessage> {
        self.message.or(self.channel_post)
    }
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub sender_chat: Option<TelegramChat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub is_topic_message: bool,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub video: Option<TelegramFile>,
    #[serde(default)]
    pub animation: Option<TelegramFile>,
    #[serde(default)]
    pub document: Option<TelegramFile>,
    #[serde(default)]
    pub audio: Option<TelegramFile>,
    #[serde(default)]
    pub voice: Option<TelegramFile>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl TelegramChat {
    fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.first_name.clone())
            .unwrap_or_else(|| "Unknown Chat".to_string())
    }
}

impl TelegramMessage {
    fn sender(&self) -> SenderIdentity {
        match (&self.from, &self.sender_chat) {
            (_, Some(chat)) => SenderIdentity {
                title: Some(chat.display_name()),
                ..Default::default()
            },
            (Some(user), None) => SenderIdentity {
                first_name: Some(user.first_name.clone()),
                last_name: user.last_name.clone(),
                username: user.username.clone(),
                title: None,
            },
            (None, None) => SenderIdentity::default(),
        }
    }

    fn media(&self) -> Vec<MediaRef> {
        let mut out = Vec::new();
        if let Some(largest) = self.photo.iter().max_by_key(|p| p.width * p.height) {
            out.push(MediaRef {
                file_id: largest.file_id.clone(),
                file_name: None,
                kind: MediaKind::Photo,
            });
        }
        let files = [
            (&self.video, MediaKind::Video),
            (&self.animation, MediaKind::Animation),
            (&self.document, MediaKind::Document),
            (&self.audio, MediaKind::Audio),
            (&self.voice, MediaKind::Voice),
        ];
        for (file, kind) in files {
            if let Some(f) = file {
                out.push(MediaRef {
                    file_id: f.file_id.clone(),
                    file_name: f.file_name.clone(),
                    kind,
                });
            }
            // An animation is also delivered as a document; keep one copy.
            if kind == MediaKind::Animation && file.is_some() {
                break;
            }
        }
        out
    }

    /// Reply ids in the "topic root vs real reply" shape the bridge expects.
    fn reply_ids(&self) -> (Option<i64>, Option<i64>) {
        let replied = self.reply_to_message.as_ref().map(|m| m.message_id);
        match self.message_thread_id.filter(|_| self.is_topic_message) {
            Some(thread) => {
                let reply_to = replied.or(Some(thread));
                let top = if reply_to != Some(thread) { Some(thread) } else { None };
                (reply_to, top)
            }
            None => (replied, None),
        }
    }

    fn quoted(&self) -> QuotedMessage {
        QuotedMessage {
            sender_name: self.sender().display_name(),
            text: self
                .text
                .clone()
                .or_else(|| self.caption.clone())
                .unwrap_or_default(),
        }
    }

    pub fn to_inbound(&self) -> InboundMessage {
        let (reply_to_message_id, reply_top_id) = self.reply_ids();
        InboundMessage {
            chat_id: self.chat.id,
            chat_name: self.chat.display_name(),
            message_id: self.message_id,
            group_id: self.media_group_id.clone(),
            sender: self.sender(),
            text: self.text.clone().or_else(|| self.caption.clone()),
            media: self.media(),
            date: DateTime::from_timestamp(self.date, 0).unwrap_or_default(),
            reply_to_message_id,
            reply_top_id,
        }
    }
}

/// Latest message per chat plus a bounded cache of recent messages.
#[derive(Default)]
struct RecentMessages {
    latest: HashMap<i64, LatestMessage>,
    cache: VecDeque<((i64, i64), QuotedMessage)>,
}

impl RecentMessages {
    fn remember(&mut self, chat_id: i64, message_id: i64, quoted: QuotedMessage) {
        if self.cache.iter().any(|(k, _)| *k == (chat_id, message_id)) {
            return;
        }
        if self.cache.len() >= RECENT_CAPACITY {
            self.cache.pop_front();
        }
        self.cache.push_back(((chat_id, message_id), quoted));
    }

    fn record(&mut self, msg: &TelegramMessage) {
        if let Some(original) = &msg.reply_to_message {
            self.remember(original.chat.id, original.message_id, original.quoted());
        }
        self.remember(msg.chat.id, msg.message_id, msg.quoted());
        self.latest.insert(
            msg.chat.id,
            LatestMessage {
                message_id: msg.message_id,
                group_id: msg.media_group_id.clone(),
            },
        );
    }

    fn lookup(&self, chat_id: i64, message_id: i64) -> Option<QuotedMessage> {
        self.cache
            .iter()
            .find(|(k, _)| *k == (chat_id, message_id))
            .map(|(_, q)| q.clone())
    }
}

/// Telegram channel connector: long-polls for updates and downloads media for the bridge.
pub struct TelegramChannel {
    id: String,
    token: String,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
    recent: Mutex<RecentMessages>,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            id: "telegram".to_string(),
            token: token.into(),
            api_base: api_base
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
            recent: Mutex::new(RecentMessages::default()),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Record an update and convert it; `None` for updates without a message.
    pub fn ingest(&self, update: TelegramUpdate) -> Option<InboundMessage> {
        let msg = update.into_message()?;
        match self.recent.lock() {
            Ok(mut recent) => recent.record(&msg),
            Err(e) => log::warn!("telegram: recent-message cache poisoned: {}", e),
        }
        Some(msg.to_inbound())
    }

    /// Start the getUpdates long-poll loop and forward messages to the bridge. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundMessage>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(&self, offset: Option<i64>) -> Result<(Vec<TelegramUpdate>, Option<i64>), FeedError> {
        let mut url = format!(
            "{}?timeout={}&allowed_updates=%5B%22message%22%2C%22channel_post%22%5D",
            self.method_url("getUpdates"),
            LONG_POLL_TIMEOUT
        );
        if let Some(off) = offset {
            url = format!("{}&offset={}", url, off);
        }
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FeedError::Api(format!("getUpdates failed: {} {}", status, body)));
        }
        let data: ApiResponse<Vec<TelegramUpdate>> = res.json().await?;
        if !data.ok {
            return Err(FeedError::Api(format!(
                "getUpdates returned ok: false ({})",
                data.description.unwrap_or_default()
            )));
        }
        let updates = data.result.unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    async fn post_method(&self, method: &str, body: &serde_json::Value) -> Result<(), FeedError> {
        let res = self.client.post(self.method_url(method)).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FeedError::Api(format!("{} failed: {} {}", method, status, body)));
        }
        Ok(())
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), FeedError> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.post_method("setWebhook", &body).await
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), FeedError> {
        self.post_method("deleteWebhook", &serde_json::json!({})).await
    }

    async fn file_path(&self, file_id: &str) -> Result<String, FeedError> {
        let res = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(FeedError::Api(format!("getFile failed: {} {}", status, body)));
        }
        let data: ApiResponse<FileInfo> = res.json().await?;
        data.result
            .and_then(|f| f.file_path)
            .ok_or_else(|| FeedError::Api(format!("getFile returned no path for {}", file_id)))
    }
}

/// Unused name inside `dir` for `name` ("a.jpg", then "1_a.jpg", …).
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let mut candidate = dir.join(name);
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}", n, name));
        n += 1;
    }
    candidate
}

#[async_trait]
impl SourceFeed for TelegramChannel {
    async fn download_media(&self, media: &MediaRef, dir: &Path) -> Result<PathBuf, FeedError> {
        let remote = self.file_path(&media.file_id).await?;
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, remote);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(FeedError::Api(format!("file download failed: {}", status)));
        }
        let bytes = res.bytes().await?;
        let name = media
            .file_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| remote.rsplit('/').next().filter(|n| !n.is_empty()).map(String::from))
            .unwrap_or_else(|| format!("{}.{}", media.file_id, media.kind.default_extension()));
        let path = unique_path(dir, &name);
        tokio::fs::write(&path, &bytes).await?;
        log::debug!("telegram: downloaded {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    async fn fetch_message(&self, chat_id: i64, message_id: i64) -> Result<QuotedMessage, FeedError> {
        self.recent
            .lock()
            .ok()
            .and_then(|r| r.lookup(chat_id, message_id))
            .ok_or(FeedError::NotFound { chat_id, message_id })
    }

    async fn latest_message(&self, chat_id: i64) -> Option<LatestMessage> {
        self.recent.lock().ok()?.latest.get(&chat_id).cloned()
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next.or(offset);
                // Record the whole batch first so album checks see the final part.
                let inbound: Vec<InboundMessage> = updates
                    .into_iter()
                    .filter_map(|u| channel.ingest(u))
                    .collect();
                for msg in inbound {
                    if inbound_tx.send(msg).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(json: serde_json::Value) -> TelegramUpdate {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn converts_album_part_with_caption() {
        let u = update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "date": 1_700_000_000,
                "chat": { "id": -100, "title": "News" },
                "from": { "id": 5, "first_name": "Jana", "username": "jn" },
                "media_group_id": "G1",
                "caption": "album",
                "photo": [
                    { "file_id": "small", "width": 90, "height": 90 },
                    { "file_id": "large", "width": 1280, "height": 960 }
                ]
            }
        }));
        let channel = TelegramChannel::new("t", None);
        let m = channel.ingest(u).unwrap();
        assert_eq!(m.chat_name, "News");
        assert_eq!(m.group_id.as_deref(), Some("G1"));
        assert_eq!(m.text.as_deref(), Some("album"));
        assert_eq!(m.sender.display_name(), "Jana (@jn)");
        assert_eq!(m.media.len(), 1);
        assert_eq!(m.media[0].file_id, "large");
        assert_eq!(m.date.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn ingest_records_latest_and_reply_cache() {
        let channel = TelegramChannel::new("t", None);
        let u = update(serde_json::json!({
            "update_id": 2,
            "message": {
                "message_id": 30,
                "date": 1,
                "chat": { "id": -5 },
                "from": { "id": 7, "first_name": "Eva" },
                "text": "can someone swap?",
                "message_thread_id": 3,
                "is_topic_message": true,
                "reply_to_message": {
                    "message_id": 21,
                    "date": 0,
                    "chat": { "id": -5 },
                    "from": { "id": 8, "first_name": "Petr" },
                    "text": "I'm sick tomorrow"
                }
            }
        }));
        let m = channel.ingest(u).unwrap();
        assert_eq!(m.reply_to_message_id, Some(21));
        assert_eq!(m.reply_top_id, Some(3));
        assert!(m.is_real_reply());
        assert_eq!(m.topic_id(), Some(3));

        let latest = channel.latest_message(-5).await.unwrap();
        assert_eq!(latest.message_id, 30);
        let q = channel.fetch_message(-5, 21).await.unwrap();
        assert_eq!(q.sender_name, "Petr");
        assert_eq!(q.text, "I'm sick tomorrow");
        assert!(channel.fetch_message(-5, 999).await.is_err());
    }

    #[test]
    fn plain_topic_message_points_at_root() {
        let u = update(serde_json::json!({
            "update_id": 3,
            "message": {
                "message_id": 31,
                "date": 1,
                "chat": { "id": -5 },
                "text": "hi",
                "message_thread_id": 3,
                "is_topic_message": true,
                "reply_to_message": { "message_id": 3, "date": 0, "chat": { "id": -5 } }
            }
        }));
        let m = TelegramChannel::new("t", None).ingest(u).unwrap();
        assert_eq!(m.reply_to_message_id, Some(3));
        assert_eq!(m.reply_top_id, None);
        assert_eq!(m.topic_id(), Some(3));
        assert!(!m.is_real_reply());
        assert_eq!(m.sender.display_name(), "Unknown Sender");
    }

    #[test]
    fn channel_post_uses_sender_chat() {
        let u = update(serde_json::json!({
            "update_id": 4,
            "channel_post": {
                "message_id": 1,
                "date": 1,
                "chat": { "id": -9, "title": "Announcements" },
                "sender_chat": { "id": -9, "title": "Announcements" },
                "document": { "file_id": "doc", "file_name": ".env" }
            }
        }));
        let m = TelegramChannel::new("t", None).ingest(u).unwrap();
        assert_eq!(m.sender.display_name(), "Announcements");
        assert_eq!(m.media[0].file_name.as_deref(), Some(".env"));
        assert_eq!(m.media[0].kind, MediaKind::Document);
    }

    #[test]
    fn update_without_message_yields_nothing() {
        let u = update(serde_json::json!({ "update_id": 5 }));
        assert!(TelegramChannel::new("t", None).ingest(u).is_none());
    }
}
