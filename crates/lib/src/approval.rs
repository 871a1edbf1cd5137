//! Approval state tracking: review message id → artifact, driven by reaction events.
//!
//! A ✅ from someone other than the bridge on a pending review starts an [`ApprovalJob`]: forward
//! the content to the final channel, stamp the approver into the review footer and clear the
//! reactions. The tracker only changes state when the job reports back through
//! [`ApprovalTracker::finish`]; while a job is out, further ✅s on that review are ignored.
//! Approved is terminal.

use crate::delivery::{
    Attachment, Delivery, DeliveryError, Embed, MessageContent, PostedMessage, ReactionEvent,
    RemoteAttachment,
};
use crate::review::ReviewArtifact;
use std::collections::{HashMap, HashSet};

/// The only reaction that approves a review.
pub const APPROVE_EMOJI: &str = "✅";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved { by: String },
}

/// Review message id → artifact.
#[derive(Debug, Default)]
pub struct ApprovalIndex {
    entries: HashMap<String, ReviewArtifact>,
}

impl ApprovalIndex {
    pub fn insert(&mut self, artifact: ReviewArtifact) {
        self.entries.insert(artifact.review.message_id.clone(), artifact);
    }

    pub fn get(&self, message_id: &str) -> Option<&ReviewArtifact> {
        self.entries.get(message_id)
    }

    fn get_mut(&mut self, message_id: &str) -> Option<&mut ReviewArtifact> {
        self.entries.get_mut(message_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Own identity unknown yet, or the reactor is the bridge.
    OwnReaction,
    OtherEmoji,
    UnknownMessage,
    WrongChannel,
    AlreadyApproved,
    /// An approval for this review is already running.
    InProgress,
    EmptyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    Ignored(IgnoreReason),
    Approved { forwarded: PostedMessage, by: String },
    /// Transition attempted but the forward could not be made; the artifact stays pending.
    Failed,
}

/// A successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub forwarded: PostedMessage,
    pub by: String,
}

/// What a finished [`ApprovalJob`] reports back to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalResult {
    pub message_id: String,
    pub published: Option<Published>,
}

/// Everything needed to publish one review, detached from the tracker.
#[derive(Debug, Clone)]
pub struct ApprovalJob {
    review: PostedMessage,
    embed: Embed,
    attachments: Vec<RemoteAttachment>,
    final_channel_id: String,
    approver_id: String,
}

impl ApprovalJob {
    pub fn review(&self) -> &PostedMessage {
        &self.review
    }

    /// Fetch the final channel, resolve the approver, forward, then stamp the footer and clear
    /// reactions. Failures before the forward leave the review pending; later ones are only logged.
    pub async fn run(self, delivery: &dyn Delivery) -> ApprovalResult {
        let published = self.publish(delivery).await;
        ApprovalResult {
            message_id: self.review.message_id,
            published,
        }
    }

    async fn publish(&self, delivery: &dyn Delivery) -> Option<Published> {
        let message_id = &self.review.message_id;
        if let Err(e) = delivery.fetch_channel(&self.final_channel_id).await {
            log::error!("approval: final channel {} not available: {}", self.final_channel_id, e);
            return None;
        }
        let approver = match delivery.fetch_user_name(&self.approver_id).await {
            Ok(name) => name,
            Err(e) => {
                log::debug!("approval: resolving user {} failed: {}", self.approver_id, e);
                format!("<@{}>", self.approver_id)
            }
        };

        let files = match self.collect_files(delivery).await {
            Ok(files) => files,
            Err(e) => {
                log::error!("approval: fetching files of review {} failed: {}", message_id, e);
                return None;
            }
        };
        let content = MessageContent::embed(self.embed.without_footer());
        let forwarded = match delivery.send_message(&self.final_channel_id, &content, &files).await {
            Ok(sent) => sent.message,
            Err(e) => {
                log::error!("approval: forwarding {} to final channel failed: {}", message_id, e);
                return None;
            }
        };
        drop(files);

        let stamped = self
            .embed
            .clone()
            .footer(format!("{} Approved by {}", APPROVE_EMOJI, approver));
        if let Err(e) = delivery
            .edit_message(&self.review, &MessageContent::embed(stamped))
            .await
        {
            log::warn!("approval: updating review footer failed: {}", e);
        }
        if let Err(e) = delivery.clear_reactions(&self.review).await {
            log::warn!("approval: clearing reactions failed: {}", e);
        }
        Some(Published {
            forwarded,
            by: approver,
        })
    }

    /// Download the review's files through its current links, falling back to the links recorded
    /// at posting time.
    async fn collect_files(&self, delivery: &dyn Delivery) -> Result<Vec<Attachment>, DeliveryError> {
        if self.attachments.is_empty() {
            return Ok(Vec::new());
        }
        let links = match delivery.fetch_attachments(&self.review).await {
            Ok(current) if current.len() == self.attachments.len() => current,
            Ok(current) => {
                log::warn!(
                    "approval: review {} now has {} file(s), expected {}",
                    self.review.message_id,
                    current.len(),
                    self.attachments.len()
                );
                self.attachments.clone()
            }
            Err(e) => {
                log::debug!("approval: refreshing links of {} failed: {}", self.review.message_id, e);
                self.attachments.clone()
            }
        };
        let mut files = Vec::with_capacity(links.len());
        for link in &links {
            files.push(delivery.download_attachment(link).await?);
        }
        Ok(files)
    }
}

pub struct ApprovalTracker {
    index: ApprovalIndex,
    final_channel_id: String,
    self_user_id: Option<String>,
    in_progress: HashSet<String>,
}

impl ApprovalTracker {
    pub fn new(final_channel_id: impl Into<String>) -> Self {
        Self {
            index: ApprovalIndex::default(),
            final_channel_id: final_channel_id.into(),
            self_user_id: None,
            in_progress: HashSet::new(),
        }
    }

    pub fn set_self_user_id(&mut self, user_id: impl Into<String>) {
        self.self_user_id = Some(user_id.into());
    }

    pub fn track(&mut self, artifact: ReviewArtifact) {
        self.index.insert(artifact);
    }

    pub fn index(&self) -> &ApprovalIndex {
        &self.index
    }

    /// Check a reaction against the approval guards. On success the review is marked in progress
    /// until [`finish`](Self::finish) is called with the job's result.
    pub fn begin(&mut self, event: &ReactionEvent) -> Result<ApprovalJob, IgnoreReason> {
        match self.self_user_id.as_deref() {
            Some(me) if me != event.user_id => {}
            _ => return Err(IgnoreReason::OwnReaction),
        }
        if event.emoji != APPROVE_EMOJI {
            return Err(IgnoreReason::OtherEmoji);
        }
        let Some(artifact) = self.index.get(&event.message_id) else {
            return Err(IgnoreReason::UnknownMessage);
        };
        if artifact.review.channel_id != event.channel_id {
            return Err(IgnoreReason::WrongChannel);
        }
        if artifact.status != ApprovalStatus::Pending {
            log::debug!("approval: {} already approved, ignoring", event.message_id);
            return Err(IgnoreReason::AlreadyApproved);
        }
        if self.in_progress.contains(&event.message_id) {
            return Err(IgnoreReason::InProgress);
        }
        if artifact.embed.is_empty() {
            return Err(IgnoreReason::EmptyBody);
        }
        let job = ApprovalJob {
            review: artifact.review.clone(),
            embed: artifact.embed.clone(),
            attachments: artifact.attachments.clone(),
            final_channel_id: self.final_channel_id.clone(),
            approver_id: event.user_id.clone(),
        };
        self.in_progress.insert(event.message_id.clone());
        Ok(job)
    }

    /// Apply a job's result: approved (links released) or back to plain pending.
    pub fn finish(&mut self, result: ApprovalResult) -> ReactionOutcome {
        self.in_progress.remove(&result.message_id);
        let Some(published) = result.published else {
            return ReactionOutcome::Failed;
        };
        let Some(artifact) = self.index.get_mut(&result.message_id) else {
            return ReactionOutcome::Failed;
        };
        artifact.status = ApprovalStatus::Approved {
            by: published.by.clone(),
        };
        artifact.attachments = Vec::new();
        log::info!(
            "approval: {} (route {}, chat {}, message(s) {:?}) approved by {}, published as {}",
            result.message_id,
            artifact.route_name,
            artifact.source_chat_id,
            artifact.source_message_ids,
            published.by,
            published.forwarded.message_id
        );
        ReactionOutcome::Approved {
            forwarded: published.forwarded,
            by: published.by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::tests::RecordingDelivery;
    use crate::review::APPROVAL_FOOTER;

    fn artifact(message_id: &str, attachments: Vec<RemoteAttachment>) -> ReviewArtifact {
        ReviewArtifact {
            review: PostedMessage {
                channel_id: "review-1".into(),
                message_id: message_id.into(),
            },
            route_name: "news".into(),
            source_chat_id: -1,
            source_message_ids: vec![1],
            embed: Embed::new("📰 News", 1).description("Hello"),
            attachments,
            status: ApprovalStatus::Pending,
        }
    }

    fn check(message_id: &str, user: &str) -> ReactionEvent {
        ReactionEvent {
            channel_id: "review-1".into(),
            message_id: message_id.into(),
            user_id: user.into(),
            emoji: APPROVE_EMOJI.into(),
        }
    }

    /// Tracker with review "r1" whose two files are hosted on the fake.
    fn setup() -> (ApprovalTracker, RecordingDelivery) {
        let d = RecordingDelivery::default();
        let files = d.host("r1", &[("a.jpg", &[1u8][..]), ("b.jpg", &[2u8][..])]);
        let mut t = ApprovalTracker::new("final");
        t.set_self_user_id("bot");
        t.track(artifact("r1", files));
        (t, d)
    }

    async fn react(t: &mut ApprovalTracker, ev: &ReactionEvent, d: &RecordingDelivery) -> ReactionOutcome {
        match t.begin(ev) {
            Ok(job) => {
                let result = job.run(d).await;
                t.finish(result)
            }
            Err(reason) => ReactionOutcome::Ignored(reason),
        }
    }

    #[tokio::test]
    async fn approval_forwards_stamps_and_clears() {
        let (mut t, d) = setup();
        let outcome = react(&mut t, &check("r1", "42"), &d).await;
        assert!(matches!(outcome, ReactionOutcome::Approved { ref by, .. } if by == "user-42"));

        let published = d.sent_to("final");
        assert_eq!(published.len(), 1);
        assert!(published[0].0.embeds[0].footer.is_none());
        assert_eq!(published[0].0.embeds[0].description.as_deref(), Some("Hello"));
        let files: Vec<(&str, &[u8])> = published[0]
            .1
            .iter()
            .map(|a| (a.file_name.as_str(), a.data.as_slice()))
            .collect();
        assert_eq!(files, vec![("a.jpg", &[1u8][..]), ("b.jpg", &[2u8][..])]);

        let edits = d.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        let footer = edits[0].1.embeds[0].footer.as_ref().unwrap();
        assert!(footer.text.starts_with("✅ Approved by user-42"));
        assert_ne!(footer.text, APPROVAL_FOOTER);
        assert_eq!(d.cleared.lock().unwrap().len(), 1);
        let approved = t.index().get("r1").unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved { by: "user-42".into() });
        assert!(approved.attachments.is_empty());
    }

    #[tokio::test]
    async fn files_are_fetched_through_current_links() {
        let d = RecordingDelivery::default();
        let stale = vec![RemoteAttachment {
            file_name: "a.jpg".into(),
            url: "https://cdn.test/expired/a.jpg".into(),
        }];
        d.host("r1", &[("a.jpg", &b"fresh"[..])]);
        let mut t = ApprovalTracker::new("final");
        t.set_self_user_id("bot");
        t.track(artifact("r1", stale));

        assert!(matches!(react(&mut t, &check("r1", "42"), &d).await, ReactionOutcome::Approved { .. }));
        assert_eq!(d.sent_to("final")[0].1[0].data, b"fresh".to_vec());
    }

    #[tokio::test]
    async fn unreachable_files_keep_pending() {
        let d = RecordingDelivery::default();
        let gone = vec![RemoteAttachment {
            file_name: "a.jpg".into(),
            url: "https://cdn.test/gone/a.jpg".into(),
        }];
        let mut t = ApprovalTracker::new("final");
        t.set_self_user_id("bot");
        t.track(artifact("r1", gone));

        assert_eq!(react(&mut t, &check("r1", "42"), &d).await, ReactionOutcome::Failed);
        assert_eq!(t.index().pending(), 1);
        assert!(d.sent_to("final").is_empty());
    }

    #[tokio::test]
    async fn repeated_checkmark_forwards_once() {
        let (mut t, d) = setup();
        react(&mut t, &check("r1", "42"), &d).await;
        let second = react(&mut t, &check("r1", "43"), &d).await;
        assert_eq!(second, ReactionOutcome::Ignored(IgnoreReason::AlreadyApproved));
        assert_eq!(d.sent_to("final").len(), 1);
        assert_eq!(d.cleared.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkmark_during_running_approval_is_ignored() {
        let (mut t, d) = setup();
        let job = t.begin(&check("r1", "42")).unwrap();
        assert_eq!(t.begin(&check("r1", "43")).unwrap_err(), IgnoreReason::InProgress);

        let outcome = t.finish(job.run(&d).await);
        assert!(matches!(outcome, ReactionOutcome::Approved { .. }));
        assert_eq!(d.sent_to("final").len(), 1);
        assert_eq!(t.begin(&check("r1", "43")).unwrap_err(), IgnoreReason::AlreadyApproved);
    }

    #[tokio::test]
    async fn own_reaction_never_approves() {
        let (mut t, d) = setup();
        let outcome = react(&mut t, &check("r1", "bot"), &d).await;
        assert_eq!(outcome, ReactionOutcome::Ignored(IgnoreReason::OwnReaction));
        assert!(d.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_identity_ignores_everything() {
        let mut t = ApprovalTracker::new("final");
        t.track(artifact("r1", Vec::new()));
        assert_eq!(t.begin(&check("r1", "42")).unwrap_err(), IgnoreReason::OwnReaction);
    }

    #[tokio::test]
    async fn other_emoji_never_approves() {
        let (mut t, d) = setup();
        let mut ev = check("r1", "42");
        ev.emoji = "👍".into();
        assert_eq!(react(&mut t, &ev, &d).await, ReactionOutcome::Ignored(IgnoreReason::OtherEmoji));
        assert_eq!(t.index().pending(), 1);
    }

    #[tokio::test]
    async fn wrong_channel_or_unknown_message_ignored() {
        let (mut t, d) = setup();
        let mut ev = check("r1", "42");
        ev.channel_id = "elsewhere".into();
        assert_eq!(react(&mut t, &ev, &d).await, ReactionOutcome::Ignored(IgnoreReason::WrongChannel));
        assert_eq!(
            react(&mut t, &check("nope", "42"), &d).await,
            ReactionOutcome::Ignored(IgnoreReason::UnknownMessage)
        );
    }

    #[tokio::test]
    async fn missing_final_channel_keeps_pending() {
        let (mut t, d) = setup();
        d.missing_channels.lock().unwrap().push("final".into());
        assert_eq!(react(&mut t, &check("r1", "42"), &d).await, ReactionOutcome::Failed);
        assert_eq!(t.index().pending(), 1);
        assert!(d.sent.lock().unwrap().is_empty());

        d.missing_channels.lock().unwrap().clear();
        assert!(matches!(
            react(&mut t, &check("r1", "42"), &d).await,
            ReactionOutcome::Approved { .. }
        ));
    }

    #[tokio::test]
    async fn empty_body_is_noop() {
        let mut t = ApprovalTracker::new("final");
        t.set_self_user_id("bot");
        let mut a = artifact("r2", Vec::new());
        a.embed = Embed::default();
        t.track(a);
        assert_eq!(t.begin(&check("r2", "42")).unwrap_err(), IgnoreReason::EmptyBody);
    }
}
