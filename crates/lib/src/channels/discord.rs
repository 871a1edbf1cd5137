//! Discord REST client (API v10): the bridge's destination delivery.

use crate::delivery::{
    Attachment, ChannelInfo, CommandSpec, Delivery, DeliveryError, Interaction, MessageContent,
    PostedMessage, RemoteAttachment, SentMessage,
};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
/// Interaction callback type: acknowledge now, edit the response later.
const DEFERRED_CHANNEL_MESSAGE: u8 = 5;

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    channel_id: String,
    #[serde(default)]
    attachments: Vec<AttachmentResponse>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    filename: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Clone)]
pub struct DiscordClient {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>, api_base: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            api_base: api_base
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DISCORD_API_BASE.to_string()),
        }
    }

    /// API url from path segments; each segment is percent-encoded (emoji, tokens).
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DeliveryError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| DeliveryError::InvalidEndpoint(format!("{}: {}", self.api_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| DeliveryError::InvalidEndpoint(self.api_base.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn check(res: reqwest::Response, what: &str) -> Result<reqwest::Response, DeliveryError> {
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Api(format!("{}: {} {}", what, status, body)));
        }
        Ok(res)
    }

    async fn send_json(
        &self,
        method: Method,
        segments: &[&str],
        body: &serde_json::Value,
        what: &str,
    ) -> Result<reqwest::Response, DeliveryError> {
        let url = self.endpoint(segments)?;
        let res = self.request(method, url).json(body).send().await?;
        Self::check(res, what).await
    }

    async fn send_empty(&self, method: Method, segments: &[&str], what: &str) -> Result<(), DeliveryError> {
        let url = self.endpoint(segments)?;
        let res = self.request(method, url).send().await?;
        Self::check(res, what).await?;
        Ok(())
    }
}

/// `payload_json` for a multipart upload: the message body plus one attachment stub per file.
fn multipart_payload(content: &MessageContent, attachments: &[Attachment]) -> Result<String, DeliveryError> {
    let mut payload = serde_json::to_value(content)?;
    let stubs: Vec<serde_json::Value> = attachments
        .iter()
        .enumerate()
        .map(|(i, a)| serde_json::json!({ "id": i, "filename": a.file_name }))
        .collect();
    payload["attachments"] = serde_json::Value::Array(stubs);
    Ok(serde_json::to_string(&payload)?)
}

fn hosted(attachments: Vec<AttachmentResponse>) -> Vec<RemoteAttachment> {
    attachments
        .into_iter()
        .map(|a| RemoteAttachment {
            file_name: a.filename,
            url: a.url,
        })
        .collect()
}

fn posted(msg: MessageResponse) -> PostedMessage {
    PostedMessage {
        channel_id: msg.channel_id,
        message_id: msg.id,
    }
}

#[async_trait]
impl Delivery for DiscordClient {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &MessageContent,
        attachments: &[Attachment],
    ) -> Result<SentMessage, DeliveryError> {
        let segments = ["channels", channel_id, "messages"];
        let res = if attachments.is_empty() {
            let body = serde_json::to_value(content)?;
            self.send_json(Method::POST, &segments, &body, "create message").await?
        } else {
            let mut form = reqwest::multipart::Form::new()
                .text("payload_json", multipart_payload(content, attachments)?);
            for (i, a) in attachments.iter().enumerate() {
                let part = reqwest::multipart::Part::bytes(a.data.clone()).file_name(a.file_name.clone());
                form = form.part(format!("files[{}]", i), part);
            }
            let url = self.endpoint(&segments)?;
            let res = self.request(Method::POST, url).multipart(form).send().await?;
            Self::check(res, "create message with files").await?
        };
        let mut msg: MessageResponse = res.json().await?;
        log::debug!(
            "discord: posted message {} to {} with {} file(s)",
            msg.id,
            msg.channel_id,
            msg.attachments.len()
        );
        let attachments = hosted(std::mem::take(&mut msg.attachments));
        Ok(SentMessage {
            message: posted(msg),
            attachments,
        })
    }

    async fn edit_message(&self, message: &PostedMessage, content: &MessageContent) -> Result<(), DeliveryError> {
        let body = serde_json::to_value(content)?;
        self.send_json(
            Method::PATCH,
            &["channels", &message.channel_id, "messages", &message.message_id],
            &body,
            "edit message",
        )
        .await?;
        Ok(())
    }

    async fn add_reaction(&self, message: &PostedMessage, emoji: &str) -> Result<(), DeliveryError> {
        self.send_empty(
            Method::PUT,
            &["channels", &message.channel_id, "messages", &message.message_id, "reactions", emoji, "@me"],
            "add reaction",
        )
        .await
    }

    async fn clear_reactions(&self, message: &PostedMessage) -> Result<(), DeliveryError> {
        self.send_empty(
            Method::DELETE,
            &["channels", &message.channel_id, "messages", &message.message_id, "reactions"],
            "clear reactions",
        )
        .await
    }

    async fn remove_user_reaction(
        &self,
        message: &PostedMessage,
        emoji: &str,
        user_id: &str,
    ) -> Result<(), DeliveryError> {
        self.send_empty(
            Method::DELETE,
            &["channels", &message.channel_id, "messages", &message.message_id, "reactions", emoji, user_id],
            "remove user reaction",
        )
        .await
    }

    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo, DeliveryError> {
        let url = self.endpoint(&["channels", channel_id])?;
        let res = Self::check(self.request(Method::GET, url).send().await?, "fetch channel").await?;
        let channel: ChannelResponse = res.json().await?;
        Ok(ChannelInfo {
            id: channel.id,
            name: channel.name,
        })
    }

    async fn fetch_attachments(&self, message: &PostedMessage) -> Result<Vec<RemoteAttachment>, DeliveryError> {
        let url = self.endpoint(&["channels", &message.channel_id, "messages", &message.message_id])?;
        let res = Self::check(self.request(Method::GET, url).send().await?, "fetch message").await?;
        let msg: MessageResponse = res.json().await?;
        Ok(hosted(msg.attachments))
    }

    async fn download_attachment(&self, attachment: &RemoteAttachment) -> Result<Attachment, DeliveryError> {
        let res = self.client.get(&attachment.url).send().await?;
        let res = Self::check(res, "download attachment").await?;
        let data = res.bytes().await?.to_vec();
        Ok(Attachment {
            file_name: attachment.file_name.clone(),
            data,
        })
    }

    async fn fetch_user_name(&self, user_id: &str) -> Result<String, DeliveryError> {
        let url = self.endpoint(&["users", user_id])?;
        let res = Self::check(self.request(Method::GET, url).send().await?, "fetch user").await?;
        let user: UserResponse = res.json().await?;
        Ok(user.global_name.filter(|n| !n.is_empty()).unwrap_or(user.username))
    }

    async fn defer_interaction(&self, interaction: &Interaction) -> Result<(), DeliveryError> {
        let body = serde_json::json!({ "type": DEFERRED_CHANNEL_MESSAGE });
        self.send_json(
            Method::POST,
            &["interactions", &interaction.id, &interaction.token, "callback"],
            &body,
            "defer interaction",
        )
        .await?;
        Ok(())
    }

    async fn edit_interaction_response(
        &self,
        interaction: &Interaction,
        content: &MessageContent,
    ) -> Result<PostedMessage, DeliveryError> {
        let body = serde_json::to_value(content)?;
        let res = self
            .send_json(
                Method::PATCH,
                &["webhooks", &interaction.application_id, &interaction.token, "messages", "@original"],
                &body,
                "edit interaction response",
            )
            .await?;
        let msg: MessageResponse = res.json().await?;
        Ok(posted(msg))
    }

    async fn register_commands(&self, application_id: &str, commands: &[CommandSpec]) -> Result<(), DeliveryError> {
        let body = serde_json::to_value(commands)?;
        self.send_json(
            Method::PUT,
            &["applications", application_id, "commands"],
            &body,
            "register commands",
        )
        .await?;
        log::info!("discord: registered {} slash command(s)", commands.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::Embed;

    #[test]
    fn emoji_segment_is_percent_encoded() {
        let client = DiscordClient::new("t", None);
        let url = client
            .endpoint(&["channels", "1", "messages", "2", "reactions", "✅", "@me"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v10/channels/1/messages/2/reactions/%E2%9C%85/@me"
        );
    }

    #[test]
    fn custom_api_base_keeps_its_path() {
        let client = DiscordClient::new("t", Some("http://127.0.0.1:9000/api/".to_string()));
        let url = client.endpoint(&["users", "42"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/api/users/42");
    }

    #[test]
    fn invalid_api_base_is_reported() {
        let client = DiscordClient::new("t", Some("not a url".to_string()));
        assert!(matches!(
            client.endpoint(&["users"]),
            Err(DeliveryError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn multipart_payload_lists_attachments_in_order() {
        let content = MessageContent::embed(Embed::new("News", 1).description("Hello"));
        let files = vec![
            Attachment { file_name: "a.jpg".into(), data: vec![1] },
            Attachment { file_name: "prefix.env".into(), data: vec![2] },
        ];
        let payload: serde_json::Value =
            serde_json::from_str(&multipart_payload(&content, &files).unwrap()).unwrap();
        assert_eq!(payload["embeds"][0]["description"], "Hello");
        assert_eq!(payload["attachments"][0]["id"], 0);
        assert_eq!(payload["attachments"][1]["filename"], "prefix.env");
    }

    #[test]
    fn message_response_lists_hosted_files() {
        let msg: MessageResponse = serde_json::from_value(serde_json::json!({
            "id": "9",
            "channel_id": "1",
            "attachments": [
                { "id": "a1", "filename": "f1.jpg", "url": "https://cdn.example/1/f1.jpg?ex=1" },
                { "id": "a2", "filename": "f2.jpg", "url": "https://cdn.example/1/f2.jpg?ex=1" }
            ]
        }))
        .unwrap();
        let files = hosted(msg.attachments);
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].file_name, "f2.jpg");
        assert_eq!(files[1].url, "https://cdn.example/1/f2.jpg?ex=1");

        let bare: MessageResponse = serde_json::from_value(serde_json::json!({ "id": "9", "channel_id": "1" })).unwrap();
        assert!(bare.attachments.is_empty());
    }
}
