//! In-memory correlation store: which reply did we post for which link, and
//! which replies belong to which source message.
//!
//! Two maps answer the lookups; two recency queues decide eviction order.
//! The queues may hold duplicate or stale entries (a link recorded twice, a
//! message removed through the delete path) — eviction tolerates both, so the
//! maps stay bounded without the queues needing to be exact.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::DEFAULT_CACHE_CAPACITY;

/// Handle to a reply the bot has published. Opaque to the store beyond
/// carrying enough addressing to delete the reply later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHandle {
    pub channel_id: String,
    pub message_id: String,
}

/// Runtime counters for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Link mappings dropped by capacity eviction.
    pub links_evicted_total: u64,
    /// Message mappings dropped by capacity eviction.
    pub messages_evicted_total: u64,
}

#[derive(Debug)]
struct StoreState {
    link_to_reply: HashMap<String, ReplyHandle>,
    message_to_replies: HashMap<String, Vec<ReplyHandle>>,
    /// Most recently recorded link at the front; eviction pops the back.
    link_queue: VecDeque<String>,
    message_queue: VecDeque<String>,
    capacity: usize,
    stats: StoreStats,
}

impl StoreState {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            link_to_reply: HashMap::new(),
            message_to_replies: HashMap::new(),
            link_queue: VecDeque::new(),
            message_queue: VecDeque::new(),
            capacity: capacity.max(1),
            stats: StoreStats::default(),
        }
    }
}

/// Bounded bidirectional index from links and source messages to published
/// replies. All mutation serializes through one mutex; handles are cheap to
/// clone out so no lock is held across I/O.
#[derive(Debug, Clone)]
pub struct CorrelationStore {
    inner: Arc<Mutex<StoreState>>,
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreState::with_capacity(capacity))),
        }
    }

    /// Record a published reply for `link`, found in message `message_id`.
    ///
    /// Returns the reply previously mapped to `link`, if any: the caller is
    /// responsible for retracting it, otherwise it would be orphaned — the
    /// store itself never performs I/O.
    pub fn record_reply(
        &self,
        link: &str,
        message_id: &str,
        reply: ReplyHandle,
    ) -> Option<ReplyHandle> {
        let mut state = self.lock_state();
        let displaced = state.link_to_reply.insert(link.to_string(), reply.clone());
        state
            .message_to_replies
            .entry(message_id.to_string())
            .or_default()
            .push(reply);
        state.link_queue.push_front(link.to_string());
        state.message_queue.push_front(message_id.to_string());
        displaced
    }

    /// The live reply for `link`, if one is tracked.
    pub fn reply_for_link(&self, link: &str) -> Option<ReplyHandle> {
        self.lock_state().link_to_reply.get(link).cloned()
    }

    /// All replies recorded for source message `message_id`, insertion order.
    /// Empty if the message is untracked.
    pub fn replies_for_message(&self, message_id: &str) -> Vec<ReplyHandle> {
        self.lock_state()
            .message_to_replies
            .get(message_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop the link-level mapping, returning the reply it pointed at.
    ///
    /// The recency queue is left untouched; its entry becomes a harmless
    /// stale reference that eviction skips over.
    pub fn remove_link(&self, link: &str) -> Option<ReplyHandle> {
        self.lock_state().link_to_reply.remove(link)
    }

    /// Drop the message-level mapping and its queue entries, returning the
    /// recorded replies. `None` means the message was untracked.
    pub fn remove_message(&self, message_id: &str) -> Option<Vec<ReplyHandle>> {
        let mut state = self.lock_state();
        let replies = state.message_to_replies.remove(message_id)?;
        state.message_queue.retain(|queued| queued != message_id);
        Some(replies)
    }

    /// Enforce the capacity bound: pop queue tails until each queue is within
    /// capacity, dropping the corresponding map entry when one still exists.
    ///
    /// Queue length, not map size, drives the loop — duplicate queue entries
    /// for a re-recorded key make extra passes that find nothing to delete.
    pub fn evict(&self) {
        let mut state = self.lock_state();
        while state.link_queue.len() > state.capacity {
            if let Some(link) = state.link_queue.pop_back() {
                if state.link_to_reply.remove(&link).is_some() {
                    state.stats.links_evicted_total += 1;
                }
            }
        }
        while state.message_queue.len() > state.capacity {
            if let Some(message_id) = state.message_queue.pop_back() {
                if state.message_to_replies.remove(&message_id).is_some() {
                    state.stats.messages_evicted_total += 1;
                }
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.lock_state().stats
    }

    /// Number of links currently mapped to a live reply.
    pub fn tracked_links(&self) -> usize {
        self.lock_state().link_to_reply.len()
    }

    /// Number of source messages currently tracked.
    pub fn tracked_messages(&self) -> usize {
        self.lock_state().message_to_replies.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
