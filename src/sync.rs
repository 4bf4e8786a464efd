//! Keeps published previews in sync with the messages that produced them.
//!
//! Three gateway events drive everything: a created message grows previews,
//! an edit diffs the link sets and reconciles, a delete retracts. The
//! controller owns the correlation store and talks to the metadata fetcher
//! and reply publisher through trait seams so the whole flow is testable
//! without a network.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::extract::{extract_links, is_no_preview, is_spoiler};
use crate::store::{CorrelationStore, ReplyHandle};

/// One chat message as the controller sees it. The gateway layer reduces
/// platform payloads to exactly this.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: String,
    pub channel_id: String,
    pub content: String,
    /// Authored by this bot itself.
    pub from_self: bool,
    /// The platform already attached its own preview embed.
    pub has_native_embed: bool,
}

/// Metadata about one Instagram post. The scraper yields the literal string
/// "nan" for author fields it could not resolve; the empty string means the
/// field was absent from the payload. Both count as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostMetadata {
    pub thumbnail_url: String,
    pub title: String,
    pub author_name: String,
    pub username: String,
    pub caption: String,
    pub like_count: u64,
}

impl PostMetadata {
    /// Display name for the post author: full name, else username, else a
    /// fixed placeholder.
    pub fn display_author(&self) -> &str {
        if present(&self.author_name) {
            &self.author_name
        } else if present(&self.username) {
            &self.username
        } else {
            "Couldn't get username"
        }
    }
}

fn present(value: &str) -> bool {
    !value.is_empty() && value != "nan"
}

/// Outcome of deleting a previously published reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The reply was already gone platform-side (e.g. removed by a
    /// moderator). Local bookkeeping is cleaned up regardless.
    AlreadyGone,
}

/// Retrieves post metadata from the external platform.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, link: &str) -> anyhow::Result<PostMetadata>;

    /// Raw thumbnail bytes, used for the spoiler attachment path.
    async fn fetch_thumbnail(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Publishes and retracts preview replies on the chat platform.
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish_embed(
        &self,
        link: &str,
        metadata: &PostMetadata,
        reply_to: &MessageView,
    ) -> anyhow::Result<ReplyHandle>;

    async fn publish_attachment(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        caption: &str,
        reply_to: &MessageView,
    ) -> anyhow::Result<ReplyHandle>;

    async fn delete_reply(&self, reply: &ReplyHandle) -> anyhow::Result<DeleteOutcome>;
}

/// Orchestrates created/edited/deleted events against the correlation store
/// and the publisher. Cheap to clone; every event may run on its own task.
#[derive(Clone)]
pub struct SyncController {
    store: CorrelationStore,
    fetcher: Arc<dyn MetadataFetcher>,
    publisher: Arc<dyn ReplyPublisher>,
}

impl SyncController {
    pub fn new(
        store: CorrelationStore,
        fetcher: Arc<dyn MetadataFetcher>,
        publisher: Arc<dyn ReplyPublisher>,
    ) -> Self {
        Self {
            store,
            fetcher,
            publisher,
        }
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    /// A new message arrived: preview every link it carries.
    pub async fn message_created(&self, message: &MessageView) {
        if message.from_self {
            return;
        }
        if message.has_native_embed {
            debug!(message_id = %message.id, "message already has a native embed, skipping");
            return;
        }
        for link in extract_links(&message.content) {
            self.process_link(message, link).await;
        }
    }

    /// A message was edited: retract previews for removed links, publish for
    /// added ones, and retract everything if the platform caught up with its
    /// own embed. `before` is the prior content when the gateway still had it.
    pub async fn message_edited(&self, before: Option<&str>, after: &MessageView) {
        if after.from_self {
            return;
        }

        if let Some(before_text) = before {
            let before_links = unique_links(before_text);
            let after_links = unique_links(&after.content);

            // Removals run before additions so a link that merely moved
            // within the message settles on its newest reply.
            for link in before_links
                .iter()
                .filter(|link| !after_links.contains(link))
            {
                match self.store.remove_link(link) {
                    Some(reply) => {
                        self.retract(&reply, "link removed by edit").await;
                        info!(link, message_id = %after.id, "preview retracted");
                    }
                    None => debug!(link, "removed link had no tracked reply"),
                }
            }

            for link in after_links
                .iter()
                .filter(|link| !before_links.contains(link))
            {
                self.process_link(after, link).await;
            }
        } else {
            debug!(message_id = %after.id, "edit of uncached message, skipping link diff");
        }

        if after.has_native_embed {
            if let Some(replies) = self.store.remove_message(&after.id) {
                info!(message_id = %after.id, count = replies.len(),
                    "native embed arrived, retracting previews");
                for reply in &replies {
                    self.retract(reply, "superseded by native embed").await;
                }
            }
        }
    }

    /// The source message was deleted: retract everything recorded for it.
    pub async fn message_deleted(&self, message_id: &str) {
        match self.store.remove_message(message_id) {
            Some(replies) => {
                info!(message_id, count = replies.len(), "source deleted, retracting previews");
                for reply in &replies {
                    self.retract(reply, "source message deleted").await;
                }
            }
            // Deletes of messages we never replied to are routine.
            None => debug!(message_id, "deleted message had no tracked replies"),
        }
    }

    /// Fetch, publish and record one link. Failures stay local to this link
    /// so siblings in the same message still get their previews.
    async fn process_link(&self, message: &MessageView, link: &str) {
        if is_no_preview(&message.content, link) {
            debug!(link, "author opted out of preview");
            return;
        }

        let spoiler = match is_spoiler(&message.content, link) {
            Ok(spoiler) => spoiler,
            Err(e) => {
                // Caller bug: the link was supposedly extracted from this
                // exact text. Surface it, never swallow it.
                error!(link, message_id = %message.id, error = %e,
                    "spoiler classification contract violated");
                return;
            }
        };

        let metadata = match self.fetcher.fetch(link).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(link, error = %e, "metadata fetch failed, skipping link");
                return;
            }
        };

        let published = if spoiler {
            self.publish_spoiler(message, link, &metadata).await
        } else {
            self.publisher.publish_embed(link, &metadata, message).await
        };

        let reply = match published {
            Ok(reply) => reply,
            Err(e) => {
                warn!(link, error = %e, "publish failed, skipping link");
                return;
            }
        };
        info!(link, reply_id = %reply.message_id, spoiler, "preview published");

        if let Some(displaced) = self.store.record_reply(link, &message.id, reply) {
            // The same link was previewed earlier from another message; that
            // reply would otherwise be orphaned forever.
            self.retract(&displaced, "displaced by newer preview").await;
        }
        self.store.evict();
    }

    /// Spoiler-wrapped links must not leak the image through an embed, so the
    /// thumbnail is re-uploaded as a spoilered attachment instead.
    async fn publish_spoiler(
        &self,
        message: &MessageView,
        link: &str,
        metadata: &PostMetadata,
    ) -> anyhow::Result<ReplyHandle> {
        let bytes = self.fetcher.fetch_thumbnail(&metadata.thumbnail_url).await?;
        let caption = format!(
            "Visit <{link}> to see this image (and possibly more!) on the author's Instagram page.\n\n{}",
            metadata.caption
        );
        self.publisher
            .publish_attachment(bytes, &spoiler_filename(link), &caption, message)
            .await
    }

    async fn retract(&self, reply: &ReplyHandle, reason: &str) {
        match self.publisher.delete_reply(reply).await {
            Ok(DeleteOutcome::Deleted) => {}
            Ok(DeleteOutcome::AlreadyGone) => {
                debug!(reply_id = %reply.message_id, reason, "reply was already gone");
            }
            Err(e) => {
                warn!(reply_id = %reply.message_id, reason, error = %e,
                    "failed to delete reply");
            }
        }
    }
}

/// Attachment filenames prefixed with `SPOILER_` render blurred-until-click.
fn spoiler_filename(link: &str) -> String {
    let shortcode = link
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("post");
    format!("SPOILER_{shortcode}.jpg")
}

/// Link set of a text snapshot: extraction order, first occurrence wins.
fn unique_links(text: &str) -> Vec<&str> {
    let mut links = Vec::new();
    for link in extract_links(text) {
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}
