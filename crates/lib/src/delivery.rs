//! Destination delivery seam (Discord): message content types and the operations the bridge performs.

use async_trait::async_trait;
use serde::Serialize;

/// Embed field (name/value pair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Rich embed, serialized in the shape the Discord API expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: Some(title.into()),
            color: Some(color),
            ..Default::default()
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn without_footer(&self) -> Self {
        Self {
            footer: None,
            ..self.clone()
        }
    }

    /// No title, description or fields: nothing worth showing.
    pub fn is_empty(&self) -> bool {
        self.title.as_deref().map_or(true, str::is_empty)
            && self.description.as_deref().map_or(true, str::is_empty)
            && self.fields.is_empty()
    }
}

/// Message body: optional plain content plus embeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

impl MessageContent {
    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

impl From<Embed> for MessageContent {
    fn from(embed: Embed) -> Self {
        Self::embed(embed)
    }
}

/// File to upload with a message. Bytes live only for the duration of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// A message the destination service accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostedMessage {
    pub channel_id: String,
    pub message_id: String,
}

/// A file stored with a posted message, as the destination hosts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttachment {
    pub file_name: String,
    pub url: String,
}

/// Result of a send: the new message and its hosted attachments, in upload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message: PostedMessage,
    pub attachments: Vec<RemoteAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: Option<String>,
}

/// Reaction added to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// Slash command invocation, with string-valued options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    pub token: String,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub command: String,
    pub options: Vec<(String, String)>,
}

impl Interaction {
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Slash command definition registered with the destination service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOption {
    /// 3 = string.
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    pub description: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<CommandChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandChoice {
    pub name: String,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("discord request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("discord api error: {0}")]
    Api(String),
    #[error("invalid discord endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("encoding payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Operations on the destination chat service.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &MessageContent,
        attachments: &[Attachment],
    ) -> Result<SentMessage, DeliveryError>;

    async fn edit_message(
        &self,
        message: &PostedMessage,
        content: &MessageContent,
    ) -> Result<(), DeliveryError>;

    async fn add_reaction(&self, message: &PostedMessage, emoji: &str) -> Result<(), DeliveryError>;

    async fn clear_reactions(&self, message: &PostedMessage) -> Result<(), DeliveryError>;

    async fn remove_user_reaction(
        &self,
        message: &PostedMessage,
        emoji: &str,
        user_id: &str,
    ) -> Result<(), DeliveryError>;

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, DeliveryError>;

    /// Current attachment links of a posted message (hosted links expire, so re-read before use).
    async fn fetch_attachments(&self, message: &PostedMessage) -> Result<Vec<RemoteAttachment>, DeliveryError>;

    async fn download_attachment(&self, attachment: &RemoteAttachment) -> Result<Attachment, DeliveryError>;

    async fn fetch_user_name(&self, user_id: &str) -> Result<String, DeliveryError>;

    /// Acknowledge an interaction now; the response is filled in later.
    async fn defer_interaction(&self, interaction: &Interaction) -> Result<(), DeliveryError>;

    /// Replace a deferred interaction response; returns the resulting message.
    async fn edit_interaction_response(
        &self,
        interaction: &Interaction,
        content: &MessageContent,
    ) -> Result<PostedMessage, DeliveryError>;

    async fn register_commands(
        &self,
        application_id: &str,
        commands: &[CommandSpec],
    ) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_serializes_discord_shape() {
        let e = Embed::new("News", 0xcc8800)
            .description("Hello")
            .field("Date", "01.01.2024 10:00", false)
            .footer("React with ✅ to approve");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["title"], "News");
        assert_eq!(v["color"], 0xcc8800);
        assert_eq!(v["fields"][0]["name"], "Date");
        assert_eq!(v["footer"]["text"], "React with ✅ to approve");
        assert!(serde_json::to_value(Embed::default()).unwrap().get("fields").is_none());
    }

    #[test]
    fn empty_embed_detection() {
        assert!(Embed::default().is_empty());
        assert!(!Embed::default().description("x").is_empty());
        assert!(Embed::default().footer("only footer").is_empty());
    }
}
