//! Review request building: turn a completed unit into a Discord post.
//!
//! Approval routes produce a [`ReviewArtifact`] (posted to the review channel with a ✅ invite);
//! direct routes publish straight away. Units outside the route's topic are dropped silently.

use crate::approval::{ApprovalStatus, APPROVE_EMOJI};
use crate::channels::{InboundMessage, QuotedMessage};
use crate::delivery::{Delivery, DeliveryError, Embed, MessageContent, PostedMessage, RemoteAttachment};
use crate::feed::SourceFeed;
use crate::media::{load_attachments, prepare_attachments, CompletedUnit};
use crate::routing::{Route, RouteMatch, RouteMode, RouteTable};
use chrono::{DateTime, FixedOffset, Utc};
use std::path::PathBuf;

/// Footer on pending review posts; stripped from the published copy.
pub const APPROVAL_FOOTER: &str = "React with ✅ to approve";

const NO_TEXT: &str = "[No text content]";
const NO_QUOTED_TEXT: &str = "[Media / No text]";

/// A posted review awaiting (or past) approval.
#[derive(Debug, Clone)]
pub struct ReviewArtifact {
    pub review: PostedMessage,
    pub route_name: String,
    pub source_chat_id: i64,
    pub source_message_ids: Vec<i64>,
    /// Review content without the approval footer.
    pub embed: Embed,
    /// Files as hosted on the review message; the bytes are not kept.
    pub attachments: Vec<RemoteAttachment>,
    pub status: ApprovalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unmonitored,
    OutsideTopic,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Review(ReviewArtifact),
    Forwarded(PostedMessage),
    Dropped(DropReason),
}

/// `DD.MM.YYYY HH:MM` in the display offset.
pub fn format_timestamp(date: DateTime<Utc>, offset: FixedOffset) -> String {
    date.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string()
}

fn reply_field(quoted: &QuotedMessage) -> (String, String) {
    (
        format!("↩️ Replying to {}", quoted.sender_name),
        format!(">>> {}", quoted.text),
    )
}

fn body_text(message: &InboundMessage) -> String {
    message
        .text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(NO_TEXT)
        .to_string()
}

/// Review embed for an approval route (no footer).
pub fn render_review(
    route: &Route,
    message: &InboundMessage,
    quoted: Option<&QuotedMessage>,
    offset: FixedOffset,
) -> Embed {
    let mut embed = Embed::new(&route.title, route.color)
        .description(body_text(message))
        .field("Sender", message.sender.display_name(), true)
        .field("Chat", &message.chat_name, true);
    if let Some(q) = quoted {
        let (name, value) = reply_field(q);
        embed = embed.field(name, value, false);
    }
    embed.field("Date", format_timestamp(message.date, offset), false)
}

/// Embed for a direct route: sender as title.
pub fn render_direct(
    route: &Route,
    message: &InboundMessage,
    quoted: Option<&QuotedMessage>,
    offset: FixedOffset,
) -> Embed {
    let mut embed = Embed::new(message.sender.display_name(), route.color).description(body_text(message));
    if let Some(q) = quoted {
        let (name, value) = reply_field(q);
        embed = embed.field(name, value, false);
    }
    embed.field("Date", format_timestamp(message.date, offset), false)
}

/// Builds and posts review requests.
pub struct ReviewBuilder {
    routes: RouteTable,
    offset: FixedOffset,
    downloads_dir: PathBuf,
}

impl ReviewBuilder {
    pub fn new(routes: RouteTable, offset: FixedOffset, downloads_dir: PathBuf) -> Self {
        Self {
            routes,
            offset,
            downloads_dir,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Route, stage, render and post a unit. Staged files are removed when this returns, whether
    /// or not the post went through.
    pub async fn submit(
        &self,
        unit: CompletedUnit,
        feed: &dyn SourceFeed,
        delivery: &dyn Delivery,
    ) -> Result<BuildOutcome, DeliveryError> {
        let message = &unit.primary;
        let route = match self.routes.resolve(message.chat_id, message.topic_id()) {
            RouteMatch::Matched(r) => r,
            RouteMatch::OutsideTopic => {
                log::info!(
                    "review: message {} in chat {} not in the configured topic, ignoring",
                    message.message_id,
                    message.chat_id
                );
                return Ok(BuildOutcome::Dropped(DropReason::OutsideTopic));
            }
            RouteMatch::Unmonitored => {
                log::debug!("review: chat {} is not routed, ignoring", message.chat_id);
                return Ok(BuildOutcome::Dropped(DropReason::Unmonitored));
            }
        };

        let quoted = self.quoted_original(message, feed).await;
        let staged = unit.stage(&self.downloads_dir, feed).await;
        let attachments = load_attachments(&prepare_attachments(&staged.files)).await;

        match route.mode {
            RouteMode::Direct => {
                let embed = render_direct(route, message, quoted.as_ref(), self.offset);
                let sent = delivery
                    .send_message(&route.target_channel_id, &MessageContent::embed(embed), &attachments)
                    .await?;
                log::info!(
                    "review: forwarded message {} directly to channel {} ({})",
                    message.message_id,
                    route.target_channel_id,
                    route.name
                );
                Ok(BuildOutcome::Forwarded(sent.message))
            }
            RouteMode::Approval => {
                let embed = render_review(route, message, quoted.as_ref(), self.offset);
                let pending = embed.clone().footer(APPROVAL_FOOTER);
                let sent = delivery
                    .send_message(&route.target_channel_id, &MessageContent::embed(pending), &attachments)
                    .await?;
                let posted = sent.message;
                if let Err(e) = delivery.add_reaction(&posted, APPROVE_EMOJI).await {
                    log::warn!("review: adding approval reaction to {} failed: {}", posted.message_id, e);
                }
                log::info!(
                    "review: posted message {} for review as {} in channel {}",
                    message.message_id,
                    posted.message_id,
                    posted.channel_id
                );
                Ok(BuildOutcome::Review(ReviewArtifact {
                    review: posted,
                    route_name: route.name.clone(),
                    source_chat_id: message.chat_id,
                    source_message_ids: unit.message_ids.clone(),
                    embed,
                    attachments: sent.attachments,
                    status: ApprovalStatus::Pending,
                }))
            }
        }
    }

    async fn quoted_original(&self, message: &InboundMessage, feed: &dyn SourceFeed) -> Option<QuotedMessage> {
        if !message.is_real_reply() {
            return None;
        }
        let reply_to = message.reply_to_message_id?;
        match feed.fetch_message(message.chat_id, reply_to).await {
            Ok(mut q) => {
                if q.text.trim().is_empty() {
                    q.text = NO_QUOTED_TEXT.to_string();
                }
                Some(q)
            }
            Err(e) => {
                log::warn!("review: could not fetch original message {}: {}", reply_to, e);
                None
            }
        }
    }
}
