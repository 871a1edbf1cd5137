//! Media staging and album reassembly.
//!
//! Messages that share a group id are accumulated until the group is judged complete, then emitted
//! as one [`CompletedUnit`]. Completion follows the feed's "latest message" lookup: when the most
//! recent message received in the reference chat is the group's last part, the album is done. With
//! a settle window the lookup waits until the group has been quiet that long, so parts still in
//! flight (webhook deliveries, the next `getUpdates` batch) are not cut off. Groups left idle past
//! the grace period are flushed by [`MediaGroupAggregator::take_expired`]. Emitted group ids are
//! remembered for a while and late parts of those groups are dropped.
//!
//! Aggregation only looks at message metadata. Files are downloaded when a unit is staged, into a
//! per-group (or per-message) directory that is removed when the [`StagedMedia`] is dropped.

use crate::channels::{InboundMessage, MediaRef};
use crate::delivery::Attachment;
use crate::feed::SourceFeed;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Prepended to file names starting with a dot; the destination rejects hidden-only names.
pub const HIDDEN_FILE_PREFIX: &str = "prefix";

/// How many emitted group ids are remembered for straggler detection.
const COMPLETED_MEMORY: usize = 256;

/// Staging directory removed on drop.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Create `<root>/<name>` (and parents).
    pub fn create(root: &Path, name: &str) -> std::io::Result<Self> {
        let path = root.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("media: failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Upload name for a staged file.
pub fn safe_file_name(name: &str) -> String {
    if name.starts_with('.') {
        format!("{}{}", HIDDEN_FILE_PREFIX, name)
    } else {
        name.to_string()
    }
}

/// A staged file paired with the name it is uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub upload_name: String,
}

/// Map a staged listing to upload handles, keeping order. Nothing is renamed on disk.
pub fn prepare_attachments(listing: &[PathBuf]) -> Vec<StagedFile> {
    listing
        .iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy();
            Some(StagedFile {
                path: path.clone(),
                upload_name: safe_file_name(&name),
            })
        })
        .collect()
}

/// Read staged files into memory. Unreadable files are logged and skipped.
pub async fn load_attachments(files: &[StagedFile]) -> Vec<Attachment> {
    let mut out = Vec::with_capacity(files.len());
    for f in files {
        match tokio::fs::read(&f.path).await {
            Ok(data) => out.push(Attachment {
                file_name: f.upload_name.clone(),
                data,
            }),
            Err(e) => log::warn!("media: reading {}: {}", f.path.display(), e),
        }
    }
    out
}

/// One media item of a unit and the message carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPart {
    pub message_id: i64,
    pub media: MediaRef,
}

/// One consolidated inbound unit: a single message or a whole album.
#[derive(Debug, Clone)]
pub struct CompletedUnit {
    /// Member that carries the text (album caption), else the first member.
    pub primary: InboundMessage,
    /// All member message ids in arrival order.
    pub message_ids: Vec<i64>,
    /// Media of every member, in arrival order.
    pub parts: Vec<MediaPart>,
    staging_name: String,
}

impl CompletedUnit {
    pub fn single(message: InboundMessage) -> Self {
        let staging_name = format!("message_{}_{}", message.chat_id, message.message_id);
        Self {
            message_ids: vec![message.message_id],
            parts: parts_of(&message),
            primary: message,
            staging_name,
        }
    }

    /// Directory name under the downloads root: `group_<id>` or `message_<chat>_<id>`.
    pub fn staging_name(&self) -> &str {
        &self.staging_name
    }

    /// Download every part into `<root>/<staging name>`, in order. Failed downloads are logged
    /// and skipped; a unit without media creates no directory.
    pub async fn stage(&self, root: &Path, feed: &dyn SourceFeed) -> StagedMedia {
        if self.parts.is_empty() {
            return StagedMedia::default();
        }
        let dir = match StagingDir::create(root, &self.staging_name) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("media: creating staging dir {}: {}", self.staging_name, e);
                return StagedMedia::default();
            }
        };
        let mut files = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match feed.download_media(&part.media, dir.path()).await {
                Ok(path) => files.push(path),
                Err(e) => log::warn!(
                    "media: download failed for message {} in chat {}: {}",
                    part.message_id,
                    self.primary.chat_id,
                    e
                ),
            }
        }
        StagedMedia { files, dir: Some(dir) }
    }
}

fn parts_of(message: &InboundMessage) -> Vec<MediaPart> {
    message
        .media
        .iter()
        .map(|m| MediaPart {
            message_id: message.message_id,
            media: m.clone(),
        })
        .collect()
}

/// Downloaded files of a unit; the directory goes away with this value.
#[derive(Debug, Default)]
pub struct StagedMedia {
    pub files: Vec<PathBuf>,
    dir: Option<StagingDir>,
}

impl StagedMedia {
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(StagingDir::path)
    }
}

/// Album members collected so far.
#[derive(Debug)]
struct MediaGroup {
    members: Vec<InboundMessage>,
    last_arrival: Instant,
}

impl MediaGroup {
    fn into_unit(self, group_id: &str) -> Option<CompletedUnit> {
        let message_ids: Vec<i64> = self.members.iter().map(|m| m.message_id).collect();
        let parts: Vec<MediaPart> = self.members.iter().flat_map(parts_of).collect();
        let primary_idx = self
            .members
            .iter()
            .position(|m| m.text.as_deref().is_some_and(|t| !t.is_empty()))
            .unwrap_or(0);
        let primary = self.members.into_iter().nth(primary_idx)?;
        Some(CompletedUnit {
            primary,
            message_ids,
            parts,
            staging_name: format!("group_{}", group_id),
        })
    }
}

/// Accumulates grouped messages; owns the pending groups.
pub struct MediaGroupAggregator {
    reference_chat_id: Option<i64>,
    settle: Duration,
    grace: Option<Duration>,
    groups: HashMap<String, MediaGroup>,
    completed: VecDeque<String>,
}

impl MediaGroupAggregator {
    /// `settle` of zero checks on every part; otherwise [`take_settled`](Self::take_settled) does.
    pub fn new(reference_chat_id: Option<i64>, settle: Duration, grace: Option<Duration>) -> Self {
        Self {
            reference_chat_id,
            settle,
            grace,
            groups: HashMap::new(),
            completed: VecDeque::new(),
        }
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Feed one message in. Returns a unit when the message completes one.
    pub async fn observe(
        &mut self,
        message: InboundMessage,
        feed: &dyn SourceFeed,
        now: Instant,
    ) -> Option<CompletedUnit> {
        let Some(group_id) = message.group_id.clone() else {
            return Some(CompletedUnit::single(message));
        };
        if self.completed.contains(&group_id) {
            log::warn!(
                "media: message {} belongs to group {} which was already emitted, dropped",
                message.message_id,
                group_id
            );
            return None;
        }

        let group = self.groups.entry(group_id.clone()).or_insert_with(|| MediaGroup {
            members: Vec::new(),
            last_arrival: now,
        });
        group.last_arrival = now;
        group.members.push(message);
        let parts = group.members.len();

        if self.settle.is_zero() && self.latest_is_last(&group_id, feed).await {
            return self.finish(&group_id);
        }
        log::debug!("media: group {} pending ({} part(s) so far)", group_id, parts);
        None
    }

    /// Check groups that have been quiet for the settle window; complete ones are emitted.
    pub async fn take_settled(&mut self, feed: &dyn SourceFeed, now: Instant) -> Vec<CompletedUnit> {
        let quiet: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, g)| now.saturating_duration_since(g.last_arrival) >= self.settle)
            .map(|(id, _)| id.clone())
            .collect();
        let mut out = Vec::new();
        for id in quiet {
            if self.latest_is_last(&id, feed).await {
                out.extend(self.finish(&id));
            }
        }
        out
    }

    /// Remove and return groups idle for longer than the grace period.
    pub fn take_expired(&mut self, now: Instant) -> Vec<CompletedUnit> {
        let Some(grace) = self.grace else {
            return Vec::new();
        };
        let expired: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, g)| now.saturating_duration_since(g.last_arrival) >= grace)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                log::warn!("media: group {} flushed after grace period", id);
                self.finish(&id)
            })
            .collect()
    }

    async fn latest_is_last(&self, group_id: &str, feed: &dyn SourceFeed) -> bool {
        let Some(last) = self.groups.get(group_id).and_then(|g| g.members.last()) else {
            return false;
        };
        let message_id = last.message_id;
        let reference = self.reference_chat_id.unwrap_or(last.chat_id);
        feed.latest_message(reference)
            .await
            .is_some_and(|l| l.message_id == message_id && l.group_id.as_deref() == Some(group_id))
    }

    fn finish(&mut self, group_id: &str) -> Option<CompletedUnit> {
        let group = self.groups.remove(group_id)?;
        if self.completed.len() >= COMPLETED_MEMORY {
            self.completed.pop_front();
        }
        self.completed.push_back(group_id.to_string());
        log::info!("media: group {} complete with {} part(s)", group_id, group.members.len());
        group.into_unit(group_id)
    }
}
