//! Topic matching and subscription registry
//!
//! Validation and trie-based filter matching for MQTT 3.1.1 topic names
//! and filters, plus a registry mapping filters to subscribed client ids.

mod trie;
pub mod validation;

pub use trie::TopicTrie;
pub use validation::{
    topic_matches_filter, validate_topic_filter, validate_topic_filter_with_max_levels,
    validate_topic_name, validate_topic_name_with_max_levels, TopicLevel,
};

use ahash::AHashSet;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;

/// Maps topic filters to the set of client ids subscribed to them.
///
/// A single `RwLock<TopicTrie<..>>` rather than per-filter locks: fan-out on
/// publish needs a consistent snapshot of subscribers, and subscribe/
/// unsubscribe are comparatively rare next to publish volume.
pub struct SubscriptionRegistry {
    trie: RwLock<TopicTrie<AHashSet<Arc<str>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(TopicTrie::new()),
        }
    }

    /// Subscribe `client_id` to `filter`. Idempotent.
    pub fn subscribe(&self, filter: &str, client_id: Arc<str>) {
        let mut trie = self.trie.write();
        if let Some(clients) = trie.get_mut(filter) {
            clients.insert(client_id);
        } else {
            let mut clients = AHashSet::default();
            clients.insert(client_id);
            trie.insert(filter, clients);
        }
    }

    /// Unsubscribe `client_id` from `filter`. Returns true if it was subscribed.
    pub fn unsubscribe(&self, filter: &str, client_id: &str) -> bool {
        let mut trie = self.trie.write();
        let Some(clients) = trie.get_mut(filter) else {
            return false;
        };
        let removed = clients.remove(client_id);
        if clients.is_empty() {
            trie.remove(filter);
        }
        removed
    }

    /// Remove every subscription held by `client_id`, across all filters.
    pub fn unsubscribe_all(&self, client_id: &str) {
        let mut trie = self.trie.write();
        trie.remove_by_predicate(|clients| {
            clients.remove(client_id);
            clients.is_empty()
        });
    }

    /// Client ids subscribed to any filter matching `topic`, deduplicated.
    pub fn matching_clients(&self, topic: &str) -> SmallVec<[Arc<str>; 16]> {
        let trie = self.trie.read();
        let mut seen: AHashSet<Arc<str>> = AHashSet::default();
        let mut result: SmallVec<[Arc<str>; 16]> = SmallVec::new();
        trie.matches(topic, |clients| {
            for client_id in clients {
                if seen.insert(client_id.clone()) {
                    result.push(client_id.clone());
                }
            }
        });
        result
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
