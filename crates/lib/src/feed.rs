//! Source event feed seam: what the bridge needs from the monitored chat service beyond the event stream.

use crate::channels::{MediaRef, QuotedMessage};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Most recent message the feed has received for a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestMessage {
    pub message_id: i64,
    pub group_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
    #[error("writing media: {0}")]
    Io(#[from] std::io::Error),
    #[error("message {message_id} in chat {chat_id} not available")]
    NotFound { chat_id: i64, message_id: i64 },
}

#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Download a media payload into `dir`; returns the written file path.
    async fn download_media(&self, media: &MediaRef, dir: &Path) -> Result<PathBuf, FeedError>;

    /// Look up an earlier message (used for reply quotes).
    async fn fetch_message(&self, chat_id: i64, message_id: i64) -> Result<QuotedMessage, FeedError>;

    /// Latest message received for `chat_id`, if any.
    async fn latest_message(&self, chat_id: i64) -> Option<LatestMessage>;
}
