//! Replicated broker state.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::RwLock;

use crate::types::{BrokerSnapshot, MessageBody, NodeAddress, TopicName};

/// Topics, messages and subscribers of one broker replica.
///
/// The leader's copy is authoritative. Followers overwrite theirs wholesale
/// with [`BrokerState::replace`] on every successful sync.
#[derive(Debug, Default)]
pub struct BrokerState {
    inner: RwLock<BrokerSnapshot>,
}

impl BrokerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_topic(&self, topic: &str) {
        self.inner.write().await.topics.insert(topic.to_string());
    }

    /// Append `message` to `topic`, adding the topic if needed.
    pub async fn add_message(&self, topic: &str, message: &str) {
        let mut state = self.inner.write().await;
        state.topics.insert(topic.to_string());
        state
            .messages
            .entry(topic.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// Returns false if `subscriber` was already subscribed to `topic`.
    pub async fn add_subscriber(&self, topic: &str, subscriber: &NodeAddress) -> bool {
        let mut state = self.inner.write().await;
        let list = state.subscribers.entry(topic.to_string()).or_default();
        if list.contains(subscriber) {
            return false;
        }
        list.push(subscriber.clone());
        true
    }

    /// Remove `subscriber` from `topic`. Removing the last subscriber drops the
    /// topic's subscriber entry; the topic itself stays.
    ///
    /// Returns false if the subscriber was not subscribed.
    pub async fn remove_subscriber(&self, topic: &str, subscriber: &NodeAddress) -> bool {
        let mut state = self.inner.write().await;
        let Some(list) = state.subscribers.get_mut(topic) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s != subscriber);
        let removed = list.len() != before;

        if list.is_empty() {
            state.subscribers.remove(topic);
        }
        removed
    }

    pub async fn is_subscribed(&self, subscriber: &NodeAddress, topic: &str) -> bool {
        self.inner
            .read()
            .await
            .subscribers
            .get(topic)
            .is_some_and(|list| list.contains(subscriber))
    }

    /// Sorted topic catalog.
    pub async fn topics(&self) -> Vec<TopicName> {
        self.inner.read().await.topics.iter().cloned().collect()
    }

    /// Messages of `topic`; empty for unknown topics.
    pub async fn messages(&self, topic: &str) -> Vec<MessageBody> {
        self.inner
            .read()
            .await
            .messages
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn all_messages(&self) -> BTreeMap<TopicName, Vec<MessageBody>> {
        self.inner.read().await.messages.clone()
    }

    pub async fn subscribers(&self) -> BTreeMap<TopicName, Vec<NodeAddress>> {
        self.inner.read().await.subscribers.clone()
    }

    pub async fn subscribers_of(&self, topic: &str) -> Vec<NodeAddress> {
        self.inner
            .read()
            .await
            .subscribers
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Every subscription, flattened across topics.
    pub async fn all_subscribers(&self) -> Vec<NodeAddress> {
        self.inner
            .read()
            .await
            .subscribers
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> BrokerSnapshot {
        self.inner.read().await.clone()
    }

    /// Overwrite everything with `snapshot`.
    pub async fn replace(&self, snapshot: BrokerSnapshot) {
        *self.inner.write().await = snapshot;
    }

    /// Overwrite only the topic catalog.
    pub async fn replace_topics(&self, topics: BTreeSet<TopicName>) {
        self.inner.write().await.topics = topics;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(s: &str) -> NodeAddress {
        NodeAddress::from(s)
    }

    #[tokio::test]
    async fn test_add_subscriber_is_duplicate_free() {
        let state = BrokerState::new();
        assert!(state.add_subscriber("news", &sub(":7001")).await);
        assert!(!state.add_subscriber("news", &sub(":7001")).await);
        assert_eq!(state.subscribers_of("news").await, vec![sub(":7001")]);
    }

    #[tokio::test]
    async fn test_removing_last_subscriber_drops_entry_not_topic() {
        let state = BrokerState::new();
        state.add_topic("news").await;
        state.add_subscriber("news", &sub(":7001")).await;
        state.add_subscriber("news", &sub(":7002")).await;

        assert!(state.remove_subscriber("news", &sub(":7001")).await);
        assert!(state.subscribers().await.contains_key("news"));

        assert!(state.remove_subscriber("news", &sub(":7002")).await);
        assert!(!state.subscribers().await.contains_key("news"));
        assert_eq!(state.topics().await, vec!["news"]);
    }

    #[tokio::test]
    async fn test_remove_unknown_subscriber() {
        let state = BrokerState::new();
        assert!(!state.remove_subscriber("news", &sub(":7001")).await);
        state.add_subscriber("news", &sub(":7002")).await;
        assert!(!state.remove_subscriber("news", &sub(":7001")).await);
        assert_eq!(state.subscribers_of("news").await, vec![sub(":7002")]);
    }

    #[tokio::test]
    async fn test_add_message_registers_topic_and_keeps_order() {
        let state = BrokerState::new();
        state.add_message("orders", "a").await;
        state.add_message("orders", "b").await;
        assert_eq!(state.messages("orders").await, vec!["a", "b"]);
        assert_eq!(state.topics().await, vec!["orders"]);
    }

    #[tokio::test]
    async fn test_unknown_topic_reads_empty() {
        let state = BrokerState::new();
        assert!(state.messages("nope").await.is_empty());
        assert!(state.subscribers_of("nope").await.is_empty());
        assert!(!state.is_subscribed(&sub(":7001"), "nope").await);
    }

    #[tokio::test]
    async fn test_replace_overwrites_everything() {
        let state = BrokerState::new();
        state.add_message("local-only", "x").await;
        state.add_subscriber("local-only", &sub(":7001")).await;

        let mut snapshot = BrokerSnapshot::default();
        snapshot.topics.insert("leader".to_string());
        snapshot
            .messages
            .insert("leader".to_string(), vec!["m".to_string()]);
        state.replace(snapshot.clone()).await;

        assert_eq!(state.snapshot().await, snapshot);
        assert!(state.subscribers().await.is_empty());
    }

    #[tokio::test]
    async fn test_all_subscribers_flattens() {
        let state = BrokerState::new();
        state.add_subscriber("a", &sub(":7001")).await;
        state.add_subscriber("b", &sub(":7001")).await;
        state.add_subscriber("b", &sub(":7002")).await;
        assert_eq!(state.all_subscribers().await.len(), 3);
    }
}
