//! Sync Controller Flow Tests
//!
//! Drives created/edited/deleted events through the controller against
//! in-process collaborators and asserts on both the published/retracted
//! replies and the correlation store left behind.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gramlens::store::{CorrelationStore, ReplyHandle};
use gramlens::sync::{
    DeleteOutcome, MessageView, MetadataFetcher, PostMetadata, ReplyPublisher, SyncController,
};

const LINK_A: &str = "https://www.instagram.com/p/AAA/";
const LINK_B: &str = "https://www.instagram.com/p/BBB/";

// ─────────────────────────────────────────────────────────────────────────────
// In-process collaborators
// ─────────────────────────────────────────────────────────────────────────────

struct StubFetcher {
    fail_links: HashSet<String>,
}

impl StubFetcher {
    fn reliable() -> Self {
        Self {
            fail_links: HashSet::new(),
        }
    }

    fn failing_on(link: &str) -> Self {
        Self {
            fail_links: HashSet::from([link.to_string()]),
        }
    }
}

#[async_trait]
impl MetadataFetcher for StubFetcher {
    async fn fetch(&self, link: &str) -> anyhow::Result<PostMetadata> {
        if self.fail_links.contains(link) {
            anyhow::bail!("scrape failed for {link}");
        }
        Ok(PostMetadata {
            thumbnail_url: format!("{link}media/?size=l"),
            title: String::new(),
            author_name: "Author".into(),
            username: "author".into(),
            caption: "a caption".into(),
            like_count: 3,
        })
    }

    async fn fetch_thumbnail(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        Ok(b"imagebytes".to_vec())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    embeds: Mutex<Vec<String>>,
    attachments: Mutex<Vec<(String, String)>>,
    deleted: Mutex<Vec<String>>,
    fail_publish: bool,
    counter: AtomicU32,
}

impl RecordingPublisher {
    fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    fn next_handle(&self, reply_to: &MessageView) -> ReplyHandle {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        ReplyHandle {
            channel_id: reply_to.channel_id.clone(),
            message_id: format!("reply-{n}"),
        }
    }

    fn embeds(&self) -> Vec<String> {
        self.embeds.lock().unwrap().clone()
    }

    fn attachments(&self) -> Vec<(String, String)> {
        self.attachments.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyPublisher for RecordingPublisher {
    async fn publish_embed(
        &self,
        link: &str,
        _metadata: &PostMetadata,
        reply_to: &MessageView,
    ) -> anyhow::Result<ReplyHandle> {
        if self.fail_publish {
            anyhow::bail!("send rejected");
        }
        self.embeds.lock().unwrap().push(link.to_string());
        Ok(self.next_handle(reply_to))
    }

    async fn publish_attachment(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
        caption: &str,
        reply_to: &MessageView,
    ) -> anyhow::Result<ReplyHandle> {
        if self.fail_publish {
            anyhow::bail!("send rejected");
        }
        self.attachments
            .lock()
            .unwrap()
            .push((filename.to_string(), caption.to_string()));
        Ok(self.next_handle(reply_to))
    }

    async fn delete_reply(&self, reply: &ReplyHandle) -> anyhow::Result<DeleteOutcome> {
        self.deleted.lock().unwrap().push(reply.message_id.clone());
        Ok(DeleteOutcome::AlreadyGone)
    }
}

fn controller_with(
    fetcher: StubFetcher,
    publisher: Arc<RecordingPublisher>,
) -> (SyncController, CorrelationStore) {
    let store = CorrelationStore::with_capacity(100);
    let controller = SyncController::new(store.clone(), Arc::new(fetcher), publisher);
    (controller, store)
}

fn message(id: &str, content: &str) -> MessageView {
    MessageView {
        id: id.to_string(),
        channel_id: "chan-1".to_string(),
        content: content.to_string(),
        from_self: false,
        has_native_embed: false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Created
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn created_publishes_embed_and_records_mapping() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller
        .message_created(&message("m1", &format!("look {LINK_A}")))
        .await;

    assert_eq!(publisher.embeds(), vec![LINK_A.to_string()]);
    let reply = store.reply_for_link(LINK_A).expect("mapping recorded");
    assert_eq!(store.replies_for_message("m1"), vec![reply]);
}

#[tokio::test]
async fn created_publishes_every_link_in_order() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller
        .message_created(&message("m1", &format!("{LINK_A} and {LINK_B}")))
        .await;

    assert_eq!(
        publisher.embeds(),
        vec![LINK_A.to_string(), LINK_B.to_string()]
    );
    assert_eq!(store.replies_for_message("m1").len(), 2);
}

#[tokio::test]
async fn created_skips_no_preview_links() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller
        .message_created(&message("m1", &format!("<{LINK_A}> but {LINK_B}")))
        .await;

    assert_eq!(publisher.embeds(), vec![LINK_B.to_string()]);
    assert_eq!(store.reply_for_link(LINK_A), None);
}

#[tokio::test]
async fn created_ignores_own_and_already_embedded_messages() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    let mut own = message("m1", LINK_A);
    own.from_self = true;
    controller.message_created(&own).await;

    let mut embedded = message("m2", LINK_A);
    embedded.has_native_embed = true;
    controller.message_created(&embedded).await;

    assert!(publisher.embeds().is_empty());
    assert_eq!(store.reply_for_link(LINK_A), None);
}

#[tokio::test]
async fn spoiler_link_is_published_as_attachment() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller
        .message_created(&message("m1", &format!("||{LINK_A}||")))
        .await;

    assert!(publisher.embeds().is_empty());
    let attachments = publisher.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].0, "SPOILER_AAA.jpg");
    assert!(attachments[0].1.contains(&format!("<{LINK_A}>")));
    assert!(store.reply_for_link(LINK_A).is_some());
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure isolation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_failure_skips_link_but_not_its_siblings() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::failing_on(LINK_A), publisher.clone());

    controller
        .message_created(&message("m1", &format!("{LINK_A} {LINK_B}")))
        .await;

    assert_eq!(publisher.embeds(), vec![LINK_B.to_string()]);
    assert_eq!(store.reply_for_link(LINK_A), None);
    assert!(store.reply_for_link(LINK_B).is_some());
}

#[tokio::test]
async fn publish_failure_records_no_mapping() {
    let publisher = Arc::new(RecordingPublisher::failing());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller.message_created(&message("m1", LINK_A)).await;

    assert_eq!(store.reply_for_link(LINK_A), None);
    assert!(store.replies_for_message("m1").is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Edited
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn edit_retracts_removed_link_and_publishes_added_one() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller.message_created(&message("m1", LINK_A)).await;
    let old_reply = store.reply_for_link(LINK_A).expect("recorded");

    controller
        .message_edited(Some(LINK_A), &message("m1", LINK_B))
        .await;

    assert_eq!(publisher.deleted(), vec![old_reply.message_id]);
    assert_eq!(store.reply_for_link(LINK_A), None);
    assert!(store.reply_for_link(LINK_B).is_some());
    assert_eq!(publisher.embeds().last().unwrap(), LINK_B);
}

#[tokio::test]
async fn edit_keeping_a_link_touches_nothing() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller.message_created(&message("m1", LINK_A)).await;
    let reply = store.reply_for_link(LINK_A).expect("recorded");

    controller
        .message_edited(
            Some(LINK_A),
            &message("m1", &format!("{LINK_A} now with words")),
        )
        .await;

    assert!(publisher.deleted().is_empty());
    assert_eq!(store.reply_for_link(LINK_A), Some(reply));
    assert_eq!(publisher.embeds().len(), 1);
}

#[tokio::test]
async fn edit_with_native_embed_retracts_all_replies_for_message() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    let content = format!("{LINK_A} {LINK_B}");
    controller.message_created(&message("m1", &content)).await;
    assert_eq!(store.replies_for_message("m1").len(), 2);

    // Discord caught up and rendered its own preview; links are unchanged so
    // this is independent of any diffing.
    let mut after = message("m1", &content);
    after.has_native_embed = true;
    controller.message_edited(Some(&content), &after).await;

    assert_eq!(publisher.deleted().len(), 2);
    assert!(store.replies_for_message("m1").is_empty());
}

#[tokio::test]
async fn edit_of_uncached_message_only_honors_native_embed() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    // No prior content available: the diff is skipped entirely, so the link
    // in the new content is not treated as added.
    controller.message_edited(None, &message("m1", LINK_A)).await;
    assert!(publisher.embeds().is_empty());
    assert_eq!(store.reply_for_link(LINK_A), None);

    // But a native embed still retracts recorded replies.
    controller.message_created(&message("m2", LINK_B)).await;
    let mut after = message("m2", LINK_B);
    after.has_native_embed = true;
    controller.message_edited(None, &after).await;
    assert_eq!(publisher.deleted().len(), 1);
    assert!(store.replies_for_message("m2").is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Deleted
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_retracts_every_reply_and_clears_tracking() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller
        .message_created(&message("m1", &format!("{LINK_A} {LINK_B}")))
        .await;
    assert_eq!(store.replies_for_message("m1").len(), 2);

    controller.message_deleted("m1").await;

    assert_eq!(publisher.deleted().len(), 2);
    assert!(store.replies_for_message("m1").is_empty());
}

#[tokio::test]
async fn delete_of_untracked_message_is_a_benign_noop() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, _store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller.message_deleted("never-seen").await;

    assert!(publisher.deleted().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Re-seen links
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reseen_link_retracts_the_displaced_reply() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (controller, store) = controller_with(StubFetcher::reliable(), publisher.clone());

    controller.message_created(&message("m1", LINK_A)).await;
    let first = store.reply_for_link(LINK_A).expect("first reply");

    // Same post linked again from another message before the first preview
    // was ever retracted.
    controller.message_created(&message("m2", LINK_A)).await;
    let second = store.reply_for_link(LINK_A).expect("second reply");

    assert_ne!(first, second);
    assert_eq!(publisher.deleted(), vec![first.message_id]);
    // Both source messages still track their own reply.
    assert_eq!(store.replies_for_message("m1").len(), 1);
    assert_eq!(store.replies_for_message("m2").len(), 1);
}
