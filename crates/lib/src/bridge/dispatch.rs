//! Bridge state and event dispatch.
//!
//! All state lives in [`Bridge`] and is changed one event at a time by the server loop. Network
//! work (staging and posting, approvals, command answers, page turns) runs in spawned tasks; results
//! that change state come back through the [`Completion`] queue, so a stalled call holds up only its
//! own flow.

use crate::approval::{ApprovalResult, ApprovalTracker, ReactionOutcome};
use crate::channels::{DiscordEvent, InboundMessage};
use crate::config::Settings;
use crate::delivery::{
    CommandChoice, CommandOption, CommandSpec, Delivery, DeliveryError, Interaction, MessageContent,
    PostedMessage, ReactionEvent,
};
use crate::feed::SourceFeed;
use crate::media::{CompletedUnit, MediaGroupAggregator};
use crate::review::{BuildOutcome, ReviewBuilder};
use crate::routing::{RouteMatch, RouteTable};
use crate::schedule::{
    fetch_failed_embed, no_data_embed, render_location, today_order, unusable_outcome, Pager,
    ScheduleEntry, ScheduleSource, ScrapeOutcome, NEXT_EMOJI, PREVIOUS_EMOJI,
};
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub const SCHEDULE_COMMAND: &str = "schedule";
pub const SCHEDULE_TODAY_COMMAND: &str = "schedule_today";
const LOCATION_OPTION: &str = "location";
/// Discord accepts at most 25 choices per option.
const MAX_CHOICES: usize = 25;
const MAX_PAGERS: usize = 64;

/// What a slash command asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRequest {
    Location(String),
    Today,
}

/// A finished scrape, routed back into the loop together with the interaction it answers.
#[derive(Debug)]
pub struct ScheduleReply {
    pub interaction: Interaction,
    pub request: ScheduleRequest,
    pub result: Result<ScrapeOutcome, String>,
}

/// Result of spawned work, applied to the bridge state by [`Bridge::handle_completion`].
#[derive(Debug)]
pub enum Completion {
    Schedule(ScheduleReply),
    Submitted {
        source_message_id: i64,
        outcome: Result<BuildOutcome, DeliveryError>,
    },
    Approval(ApprovalResult),
    PagerPosted {
        message: PostedMessage,
        pager: Pager,
    },
}

/// Slash commands registered on READY.
pub fn schedule_commands(locations: &[String]) -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: SCHEDULE_COMMAND.to_string(),
            description: "Show this week's shifts for one location".to_string(),
            options: vec![CommandOption {
                kind: 3,
                name: LOCATION_OPTION.to_string(),
                description: "Location".to_string(),
                required: true,
                choices: locations
                    .iter()
                    .take(MAX_CHOICES)
                    .map(|l| CommandChoice {
                        name: l.clone(),
                        value: l.clone(),
                    })
                    .collect(),
            }],
        },
        CommandSpec {
            name: SCHEDULE_TODAY_COMMAND.to_string(),
            description: "Page through today's shifts by location".to_string(),
            options: Vec::new(),
        },
    ]
}

struct OpenPager {
    message: PostedMessage,
    pager: Pager,
}

pub struct Bridge {
    feed: Arc<dyn SourceFeed>,
    delivery: Arc<dyn Delivery>,
    schedule_source: Arc<dyn ScheduleSource>,
    completions: mpsc::Sender<Completion>,
    aggregator: MediaGroupAggregator,
    builder: Arc<ReviewBuilder>,
    tracker: ApprovalTracker,
    locations: Vec<String>,
    offset: FixedOffset,
    self_user_id: Option<String>,
    entries: Vec<ScheduleEntry>,
    pagers: HashMap<String, OpenPager>,
    pager_order: VecDeque<String>,
}

impl Bridge {
    pub fn new(
        settings: &Settings,
        feed: Arc<dyn SourceFeed>,
        delivery: Arc<dyn Delivery>,
        schedule_source: Arc<dyn ScheduleSource>,
        completions: mpsc::Sender<Completion>,
    ) -> Self {
        Self {
            feed,
            delivery,
            schedule_source,
            completions,
            aggregator: MediaGroupAggregator::new(
                settings.telegram.reference_chat_id,
                settings.media_group_settle,
                settings.media_group_grace,
            ),
            builder: Arc::new(ReviewBuilder::new(
                RouteTable::new(settings.routes.clone()),
                settings.display_offset,
                settings.downloads_dir.clone(),
            )),
            tracker: ApprovalTracker::new(settings.discord.final_channel_id.clone()),
            locations: settings.schedule.locations.clone(),
            offset: settings.display_offset,
            self_user_id: None,
            entries: Vec::new(),
            pagers: HashMap::new(),
            pager_order: VecDeque::new(),
        }
    }

    pub fn tracker(&self) -> &ApprovalTracker {
        &self.tracker
    }

    pub fn pending_groups(&self) -> usize {
        self.aggregator.pending_groups()
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn open_pagers(&self) -> usize {
        self.pagers.len()
    }

    /// A message from the source feed. Unrouted messages are dropped before aggregation.
    pub async fn handle_inbound(&mut self, message: InboundMessage) {
        match self.builder.routes().resolve(message.chat_id, message.topic_id()) {
            RouteMatch::Matched(_) => {}
            RouteMatch::OutsideTopic => {
                log::info!(
                    "bridge: message {} in chat {} outside the configured topic, dropped",
                    message.message_id,
                    message.chat_id
                );
                return;
            }
            RouteMatch::Unmonitored => {
                log::debug!("bridge: chat {} not monitored", message.chat_id);
                return;
            }
        }
        if let Some(unit) = self.aggregator.observe(message, self.feed.as_ref(), Instant::now()).await {
            self.spawn_submit(unit);
        }
    }

    /// Periodic housekeeping: check settled albums and flush those idle past the grace period.
    pub async fn handle_tick(&mut self, now: Instant) {
        let mut units = self.aggregator.take_settled(self.feed.as_ref(), now).await;
        units.extend(self.aggregator.take_expired(now));
        for unit in units {
            self.spawn_submit(unit);
        }
    }

    fn spawn_submit(&self, unit: CompletedUnit) {
        let builder = self.builder.clone();
        let feed = self.feed.clone();
        let delivery = self.delivery.clone();
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let source_message_id = unit.primary.message_id;
            let outcome = builder.submit(unit, feed.as_ref(), delivery.as_ref()).await;
            let done = Completion::Submitted {
                source_message_id,
                outcome,
            };
            if tx.send(done).await.is_err() {
                log::debug!("bridge: loop gone before message {} was recorded", source_message_id);
            }
        });
    }

    /// Apply the result of spawned work.
    pub async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Schedule(reply) => self.handle_schedule_reply(reply).await,
            Completion::Submitted {
                source_message_id,
                outcome,
            } => match outcome {
                Ok(BuildOutcome::Review(artifact)) => self.tracker.track(artifact),
                Ok(BuildOutcome::Forwarded(_)) | Ok(BuildOutcome::Dropped(_)) => {}
                Err(e) => log::error!("bridge: posting message {} failed: {}", source_message_id, e),
            },
            Completion::Approval(result) => {
                let message_id = result.message_id.clone();
                match self.tracker.finish(result) {
                    ReactionOutcome::Approved { by, .. } => {
                        log::debug!("bridge: review {} approved by {}", message_id, by)
                    }
                    ReactionOutcome::Failed => {
                        log::debug!("bridge: review {} stays pending", message_id)
                    }
                    ReactionOutcome::Ignored(_) => {}
                }
            }
            Completion::PagerPosted { message, pager } => self.open_pager(message, pager),
        }
    }

    pub async fn handle_discord(&mut self, event: DiscordEvent) {
        match event {
            DiscordEvent::Ready {
                user_id,
                application_id,
            } => {
                log::info!("bridge: discord ready as {}", user_id);
                self.tracker.set_self_user_id(user_id.clone());
                self.self_user_id = Some(user_id);
                let commands = schedule_commands(&self.locations);
                let delivery = self.delivery.clone();
                tokio::spawn(async move {
                    if let Err(e) = delivery.register_commands(&application_id, &commands).await {
                        log::error!("bridge: registering slash commands failed: {}", e);
                    }
                });
            }
            DiscordEvent::ReactionAdd(reaction) => {
                if self.pagers.contains_key(&reaction.message_id) {
                    self.turn_page(&reaction);
                    return;
                }
                match self.tracker.begin(&reaction) {
                    Ok(job) => {
                        log::debug!("bridge: approving review {}", job.review().message_id);
                        let delivery = self.delivery.clone();
                        let tx = self.completions.clone();
                        tokio::spawn(async move {
                            let result = job.run(delivery.as_ref()).await;
                            if tx.send(Completion::Approval(result)).await.is_err() {
                                log::debug!("bridge: loop gone before approval result");
                            }
                        });
                    }
                    Err(reason) => {
                        log::debug!("bridge: reaction on {} ignored: {:?}", reaction.message_id, reason)
                    }
                }
            }
            DiscordEvent::Interaction(interaction) => self.handle_command(interaction),
        }
    }

    /// Defer the response and scrape off the loop; the result comes back as a [`ScheduleReply`].
    pub fn handle_command(&mut self, interaction: Interaction) {
        let request = match interaction.command.as_str() {
            SCHEDULE_COMMAND => ScheduleRequest::Location(
                interaction.option(LOCATION_OPTION).unwrap_or_default().to_string(),
            ),
            SCHEDULE_TODAY_COMMAND => ScheduleRequest::Today,
            other => {
                log::debug!("bridge: unknown command /{}", other);
                return;
            }
        };
        let delivery = self.delivery.clone();
        let source = self.schedule_source.clone();
        let tx = self.completions.clone();
        tokio::spawn(async move {
            if let Err(e) = delivery.defer_interaction(&interaction).await {
                log::error!("bridge: deferring /{} failed: {}", interaction.command, e);
                return;
            }
            let result = source.fetch().await.map_err(|e| e.to_string());
            let reply = ScheduleReply {
                interaction,
                request,
                result,
            };
            if tx.send(Completion::Schedule(reply)).await.is_err() {
                log::debug!("bridge: loop gone before schedule reply");
            }
        });
    }

    pub async fn handle_schedule_reply(&mut self, reply: ScheduleReply) {
        self.handle_schedule_reply_at(reply, Utc::now()).await
    }

    /// Answer a deferred command; `now` picks "today" in the display offset.
    pub async fn handle_schedule_reply_at(&mut self, reply: ScheduleReply, now: DateTime<Utc>) {
        let interaction = reply.interaction;
        let outcome = match reply.result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("bridge: schedule scrape failed: {}", e);
                self.spawn_respond(interaction, fetch_failed_embed().into());
                return;
            }
        };
        let unusable = unusable_outcome(&outcome);
        if let ScrapeOutcome::Loaded(entries) = outcome {
            self.entries = entries;
        }
        if let Some(embed) = unusable {
            self.spawn_respond(interaction, embed.into());
            return;
        }

        match reply.request {
            ScheduleRequest::Location(location) => {
                let embed = render_location(&self.entries, &location);
                self.spawn_respond(interaction, embed.into());
            }
            ScheduleRequest::Today => {
                let day = today_order(now.with_timezone(&self.offset));
                let Some(pager) = Pager::for_day(&self.entries, day, &self.locations) else {
                    self.spawn_respond(interaction, no_data_embed().into());
                    return;
                };
                let Some(first) = pager.current().cloned() else {
                    return;
                };
                let delivery = self.delivery.clone();
                let tx = self.completions.clone();
                tokio::spawn(async move {
                    let Some(posted) = respond(delivery.as_ref(), &interaction, first.into()).await else {
                        return;
                    };
                    if pager.len() < 2 {
                        return;
                    }
                    let message = posted.clone();
                    if tx.send(Completion::PagerPosted { message, pager }).await.is_err() {
                        return;
                    }
                    for emoji in [PREVIOUS_EMOJI, NEXT_EMOJI] {
                        if let Err(e) = delivery.add_reaction(&posted, emoji).await {
                            log::warn!("bridge: adding pager reaction failed: {}", e);
                        }
                    }
                });
            }
        }
    }

    fn spawn_respond(&self, interaction: Interaction, content: MessageContent) {
        let delivery = self.delivery.clone();
        tokio::spawn(async move {
            respond(delivery.as_ref(), &interaction, content).await;
        });
    }

    fn open_pager(&mut self, message: PostedMessage, pager: Pager) {
        if self.pager_order.len() >= MAX_PAGERS {
            if let Some(oldest) = self.pager_order.pop_front() {
                self.pagers.remove(&oldest);
            }
        }
        self.pager_order.push_back(message.message_id.clone());
        self.pagers
            .insert(message.message_id.clone(), OpenPager { message, pager });
    }

    fn turn_page(&mut self, reaction: &ReactionEvent) {
        match self.self_user_id.as_deref() {
            Some(me) if me != reaction.user_id => {}
            _ => return,
        }
        let Some(open) = self.pagers.get_mut(&reaction.message_id) else {
            return;
        };
        let Some(page) = open.pager.turn(&reaction.emoji).cloned() else {
            return;
        };
        let message = open.message.clone();
        let delivery = self.delivery.clone();
        let emoji = reaction.emoji.clone();
        let user_id = reaction.user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = delivery.edit_message(&message, &page.into()).await {
                log::warn!("bridge: turning page on {} failed: {}", message.message_id, e);
            }
            if let Err(e) = delivery.remove_user_reaction(&message, &emoji, &user_id).await {
                log::debug!("bridge: removing page reaction failed: {}", e);
            }
        });
    }
}

async fn respond(delivery: &dyn Delivery, interaction: &Interaction, content: MessageContent) -> Option<PostedMessage> {
    match delivery.edit_interaction_response(interaction, &content).await {
        Ok(posted) => Some(posted),
        Err(e) => {
            log::error!("bridge: answering /{} failed: {}", interaction.command, e);
            None
        }
    }
}
