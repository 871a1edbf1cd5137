//! Inbound message from a monitored source chat: delivered to the bridge loop for aggregation and review.

use chrono::{DateTime, Utc};

/// Kind of media attached to a source message (drives the fallback file extension).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Document,
    Audio,
    Voice,
}

impl MediaKind {
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video | MediaKind::Animation => "mp4",
            MediaKind::Document => "bin",
            MediaKind::Audio => "mp3",
            MediaKind::Voice => "ogg",
        }
    }
}

/// Reference to a media payload; bytes are fetched on demand through the source feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    /// Original file name when the source carries one (documents, audio, video).
    pub file_name: Option<String>,
    pub kind: MediaKind,
}

/// Who sent a message: a user (first/last/username) or a chat posting as itself (title).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderIdentity {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub title: Option<String>,
}

impl SenderIdentity {
    /// "First Last (@username)" for users, the title for chats, otherwise "Unknown Sender".
    pub fn display_name(&self) -> String {
        if let Some(first) = &self.first_name {
            let mut name = first.clone();
            if let Some(last) = self.last_name.as_deref().filter(|s| !s.is_empty()) {
                name.push(' ');
                name.push_str(last);
            }
            if let Some(user) = self.username.as_deref().filter(|s| !s.is_empty()) {
                name.push_str(&format!(" (@{})", user));
            }
            name
        } else if let Some(title) = &self.title {
            title.clone()
        } else {
            "Unknown Sender".to_string()
        }
    }
}

/// A message captured from a source chat. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub chat_name: String,
    pub message_id: i64,
    /// Album identifier shared by all parts of a media group.
    pub group_id: Option<String>,
    pub sender: SenderIdentity,
    /// Text or media caption.
    pub text: Option<String>,
    pub media: Vec<MediaRef>,
    pub date: DateTime<Utc>,
    /// Message this one replies to; inside a forum topic this is the topic root for plain topic messages.
    pub reply_to_message_id: Option<i64>,
    /// Topic root, set only when replying to a message inside a topic.
    pub reply_top_id: Option<i64>,
}

impl InboundMessage {
    /// Topic/thread the message belongs to, if any.
    pub fn topic_id(&self) -> Option<i64> {
        self.reply_top_id.or(self.reply_to_message_id)
    }

    /// True when this replies to another message inside a topic (not merely to the topic root).
    pub fn is_real_reply(&self) -> bool {
        match self.reply_top_id {
            Some(top) => self.reply_to_message_id.is_some_and(|id| id != top),
            None => false,
        }
    }
}

/// Original message quoted by a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedMessage {
    pub sender_name: String,
    pub text: String,
}

#[cfg(test)]
pub(crate) fn text_message(chat_id: i64, message_id: i64, text: &str) -> InboundMessage {
    InboundMessage {
        chat_id,
        chat_name: "Source".to_string(),
        message_id,
        group_id: None,
        sender: SenderIdentity {
            first_name: Some("Jana".to_string()),
            ..Default::default()
        },
        text: Some(text.to_string()),
        media: Vec::new(),
        date: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        reply_to_message_id: None,
        reply_top_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_user_with_handle() {
        let s = SenderIdentity {
            first_name: Some("Jana".into()),
            last_name: Some("Novak".into()),
            username: Some("jnovak".into()),
            title: None,
        };
        assert_eq!(s.display_name(), "Jana Novak (@jnovak)");
    }

    #[test]
    fn display_name_fallbacks() {
        let chat = SenderIdentity {
            title: Some("News".into()),
            ..Default::default()
        };
        assert_eq!(chat.display_name(), "News");
        assert_eq!(SenderIdentity::default().display_name(), "Unknown Sender");
    }

    #[test]
    fn topic_and_real_reply() {
        let mut m = text_message(1, 50, "hi");
        m.reply_to_message_id = Some(7);
        assert_eq!(m.topic_id(), Some(7));
        assert!(!m.is_real_reply());

        m.reply_to_message_id = Some(42);
        m.reply_top_id = Some(7);
        assert_eq!(m.topic_id(), Some(7));
        assert!(m.is_real_reply());
    }
}
