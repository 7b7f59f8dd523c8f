//! Subscriber role.
//!
//! Interest is a local list: subscribing never talks to a broker. Messages
//! are consumed from the log by offset and cached per topic.
//!
//! Reading a topic subscribes to it, and so does a message arriving for it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::LeaderView;
use crate::clock::LogicalClock;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::log::MessageLog;
use crate::metrics;
use crate::rpc::{RequestBody, ResponseBody, RpcClient, RpcHandler, Transport, unsupported};
use crate::tasks::BackgroundTaskRegistry;
use crate::types::{MessageBody, NodeAddress, TopicName};

#[derive(Debug, Default)]
struct Inbox {
    subscribed: BTreeSet<TopicName>,
    cache: BTreeMap<TopicName, Vec<MessageBody>>,
    /// Next log offset to consume, per topic.
    offsets: BTreeMap<TopicName, u64>,
}

pub struct Subscriber {
    address: NodeAddress,
    config: ClientConfig,
    clock: Arc<LogicalClock>,
    rpc: RpcClient,
    log: Arc<dyn MessageLog>,
    leader: LeaderView,
    inbox: RwLock<Inbox>,
    catalog: RwLock<Vec<TopicName>>,
}

impl Subscriber {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, log: Arc<dyn MessageLog>) -> Self {
        let clock = Arc::new(LogicalClock::new());
        Self {
            address: config.address(),
            rpc: RpcClient::new(transport, clock.clone()),
            clock,
            log,
            leader: LeaderView::new(config.coordinator.clone()),
            inbox: RwLock::new(Inbox::default()),
            catalog: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Add `topic` to the interest list. Subscribing twice is a no-op.
    pub async fn subscribe(&self, topic: &str) {
        if self.inbox.write().await.subscribed.insert(topic.to_string()) {
            info!(subscriber = %self.address, topic, "Subscribed to topic");
        }
    }

    pub async fn unsubscribe(&self, topic: &str) {
        if self.inbox.write().await.subscribed.remove(topic) {
            info!(subscriber = %self.address, topic, "Unsubscribed from topic");
        }
    }

    /// Subscribed topics, sorted.
    pub async fn subscribed_topics(&self) -> Vec<TopicName> {
        self.inbox.read().await.subscribed.iter().cloned().collect()
    }

    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.inbox.read().await.subscribed.contains(topic)
    }

    /// Every cached message, by topic.
    pub async fn messages(&self) -> BTreeMap<TopicName, Vec<MessageBody>> {
        self.inbox.read().await.cache.clone()
    }

    /// Cached messages of `topic`. Subscribes to it.
    ///
    /// With nothing cached yet, the topic is read from the log directly.
    pub async fn messages_for(&self, topic: &str) -> Result<Vec<MessageBody>> {
        self.subscribe(topic).await;

        let cached = self
            .inbox
            .read()
            .await
            .cache
            .get(topic)
            .filter(|messages| !messages.is_empty())
            .cloned();
        match cached {
            Some(messages) => Ok(messages),
            None => self.refresh_messages(topic).await,
        }
    }

    /// Re-read `topic` from offset 0 and replace its cache.
    pub async fn refresh_messages(&self, topic: &str) -> Result<Vec<MessageBody>> {
        let messages = self.log.read_from(topic, 0).await;
        metrics::record_log_operation("read", messages.is_ok());
        let messages = messages?;

        let mut inbox = self.inbox.write().await;
        inbox.offsets.insert(topic.to_string(), messages.len() as u64);
        inbox.cache.insert(topic.to_string(), messages.clone());
        Ok(messages)
    }

    /// Live catalog from the log. Empty if the log is unreachable.
    pub async fn topics(&self) -> Vec<TopicName> {
        match self.log.list_visible_topics().await {
            Ok(topics) => topics.into_iter().collect(),
            Err(e) => {
                warn!(subscriber = %self.address, error = %e, "Could not list topics");
                Vec::new()
            }
        }
    }

    pub async fn leader(&self) -> Option<NodeAddress> {
        self.leader.get().await
    }

    pub async fn refresh_leader(&self) -> Result<Option<NodeAddress>> {
        self.leader.refresh(&self.rpc).await
    }

    pub async fn sync_topics(&self) -> Result<()> {
        let topics = self.log.list_visible_topics().await?;
        *self.catalog.write().await = topics.into_iter().collect();
        Ok(())
    }

    /// Pull new messages for every catalog topic. Returns how many arrived.
    pub async fn consume(&self) -> Result<usize> {
        let topics = self.catalog.read().await.clone();
        let mut total = 0;

        for topic in topics {
            let offset = self
                .inbox
                .read()
                .await
                .offsets
                .get(&topic)
                .copied()
                .unwrap_or(0);
            let fresh = self.log.read_from(&topic, offset).await?;
            if fresh.is_empty() {
                continue;
            }

            let count = fresh.len();
            let mut inbox = self.inbox.write().await;
            // A concurrent refresh may have moved the offset; its read wins
            if inbox.offsets.get(&topic).copied().unwrap_or(0) != offset {
                continue;
            }
            inbox.offsets.insert(topic.clone(), offset + count as u64);
            inbox.cache.entry(topic.clone()).or_default().extend(fresh);
            if inbox.subscribed.insert(topic.clone()) {
                info!(subscriber = %self.address, topic = %topic, "Auto-subscribed on message arrival");
            }
            drop(inbox);

            debug!(subscriber = %self.address, topic = %topic, count, "Consumed messages");
            metrics::MESSAGES_CONSUMED.inc_by(count as u64);
            total += count;
        }

        Ok(total)
    }

    /// Start the leader poll, catalog sync and consume loop.
    pub fn start(self: &Arc<Self>) -> BackgroundTaskRegistry {
        let mut tasks = BackgroundTaskRegistry::new();

        let this = self.clone();
        tasks.spawn_periodic("leader_refresh", self.config.leader_refresh_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.refresh_leader().await {
                    warn!(subscriber = %this.address, error = %e, "Leader refresh failed");
                }
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("topic_sync", self.config.topic_sync_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.sync_topics().await {
                    warn!(subscriber = %this.address, error = %e, "Topic sync failed");
                }
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("consume", self.config.consume_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.consume().await {
                    warn!(subscriber = %this.address, error = %e, "Consume failed");
                }
            }
        });

        info!(addr = %self.address, "Subscriber started");
        tasks
    }
}

#[async_trait]
impl RpcHandler for Subscriber {
    fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    async fn handle(&self, request: RequestBody) -> Result<ResponseBody> {
        match request {
            RequestBody::Subscribe { topic } => {
                self.subscribe(&topic).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::Unsubscribe { topic } => {
                self.unsubscribe(&topic).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::SubscribedTopics => Ok(ResponseBody::Topics(self.subscribed_topics().await)),
            RequestBody::AllMessages => Ok(ResponseBody::AllMessages(self.messages().await)),
            RequestBody::TopicMessages { topic } => {
                self.messages_for(&topic).await.map(ResponseBody::Messages)
            }
            RequestBody::RefreshMessages { topic } => {
                self.refresh_messages(&topic).await.map(ResponseBody::Messages)
            }
            RequestBody::Topics => Ok(ResponseBody::Topics(self.topics().await)),
            RequestBody::Leader => Ok(ResponseBody::Leader(self.leader().await)),
            other => unsupported(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryLog;
    use crate::mock_transport::MockTransport;
    use std::time::Duration;

    fn subscriber(log: Arc<InMemoryLog>) -> (MockTransport, Arc<Subscriber>) {
        let mock = MockTransport::new();
        let s = Arc::new(Subscriber::new(
            ClientConfig::subscriber(7002),
            Arc::new(mock.clone()),
            log,
        ));
        mock.register(s.address().clone(), s.clone());
        (mock, s)
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (_, s) = subscriber(Arc::new(InMemoryLog::new()));
        s.subscribe("news").await;
        s.subscribe("news").await;
        assert_eq!(s.subscribed_topics().await, vec!["news"]);

        s.unsubscribe("news").await;
        s.unsubscribe("news").await;
        assert!(s.subscribed_topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_read_implies_subscribe() {
        let log = Arc::new(InMemoryLog::new());
        log.produce("news", "first").await.unwrap();
        let (_, s) = subscriber(log);

        assert!(!s.is_subscribed("news").await);
        assert_eq!(s.messages_for("news").await.unwrap(), vec!["first"]);
        assert!(s.is_subscribed("news").await);
    }

    #[tokio::test]
    async fn test_read_of_unknown_topic_is_empty() {
        let (_, s) = subscriber(Arc::new(InMemoryLog::new()));
        assert!(s.messages_for("nothing").await.unwrap().is_empty());
        assert!(s.is_subscribed("nothing").await);
    }

    #[tokio::test]
    async fn test_consume_auto_subscribes_and_advances() {
        let log = Arc::new(InMemoryLog::new());
        log.produce("news", "a").await.unwrap();
        let (_, s) = subscriber(log.clone());
        s.sync_topics().await.unwrap();

        assert_eq!(s.consume().await.unwrap(), 1);
        assert!(s.is_subscribed("news").await);

        log.produce("news", "b").await.unwrap();
        assert_eq!(s.consume().await.unwrap(), 1);
        assert_eq!(s.consume().await.unwrap(), 0);
        assert_eq!(s.messages().await["news"], vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_refresh_replaces_cache() {
        let log = Arc::new(InMemoryLog::new());
        log.produce("news", "a").await.unwrap();
        let (_, s) = subscriber(log.clone());
        s.messages_for("news").await.unwrap();

        log.produce("news", "b").await.unwrap();
        // Cache is non-empty, so a plain read does not go to the log
        assert_eq!(s.messages_for("news").await.unwrap(), vec!["a"]);
        assert_eq!(s.refresh_messages("news").await.unwrap(), vec!["a", "b"]);

        // Consumption continues after the refreshed offset
        s.sync_topics().await.unwrap();
        assert_eq!(s.consume().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_topics_empty_when_log_down() {
        let log = Arc::new(InMemoryLog::new());
        log.create_topic("news").await.unwrap();
        let (_, s) = subscriber(log.clone());
        assert_eq!(s.topics().await, vec!["news"]);

        log.set_available(false);
        assert!(s.topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_rpc_surface() {
        let log = Arc::new(InMemoryLog::new());
        log.produce("news", "hello").await.unwrap();
        let (mock, s) = subscriber(log);
        let caller = RpcClient::new(Arc::new(mock.clone()), Arc::new(LogicalClock::new()));

        caller.subscribe(s.address(), "sports").await.unwrap();
        assert_eq!(
            caller.topic_messages(s.address(), "news").await.unwrap(),
            vec!["hello"]
        );
        assert_eq!(
            caller.subscribed_topics(s.address()).await.unwrap(),
            vec!["news", "sports"]
        );
        caller.unsubscribe(s.address(), "sports").await.unwrap();
        assert_eq!(caller.all_messages(s.address()).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_consume_picks_up_new_messages() {
        let log = Arc::new(InMemoryLog::new());
        log.produce("news", "a").await.unwrap();
        let (_, s) = subscriber(log.clone());

        let mut tasks = s.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        log.produce("news", "b").await.unwrap();
        tokio::time::sleep(s.config.consume_interval * 2).await;

        assert_eq!(s.messages().await["news"], vec!["a", "b"]);
        assert!(s.is_subscribed("news").await);
        tasks.shutdown_all().await;
    }
}
