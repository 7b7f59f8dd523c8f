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
use crate::types::{NodeAddress, TopicName};

/// Writes messages straight to the log and tracks the leader broker for display.
pub struct Publisher {
    address: NodeAddress,
    config: ClientConfig,
    clock: Arc<LogicalClock>,
    rpc: RpcClient,
    log: Arc<dyn MessageLog>,
    leader: LeaderView,
    /// Last synced catalog, sorted.
    topics: RwLock<Vec<TopicName>>,
}

impl Publisher {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, log: Arc<dyn MessageLog>) -> Self {
        let clock = Arc::new(LogicalClock::new());
        Self {
            address: config.address(),
            rpc: RpcClient::new(transport, clock.clone()),
            clock,
            log,
            leader: LeaderView::new(config.coordinator.clone()),
            topics: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Append `message` to `topic` in the log.
    pub async fn publish(&self, topic: &str, message: &str) -> Result<()> {
        let produced = self.log.produce(topic, message).await;
        metrics::record_log_operation("produce", produced.is_ok());
        let offset = produced?;
        metrics::MESSAGES_PUBLISHED.inc();
        debug!(publisher = %self.address, topic, offset, "Published message");
        Ok(())
    }

    pub async fn create_topic(&self, topic: &str) -> Result<()> {
        let created = self.log.create_topic(topic).await;
        metrics::record_log_operation("create_topic", created.is_ok());
        created?;
        info!(publisher = %self.address, topic, "Created topic");
        Ok(())
    }

    /// Last synced topic catalog.
    pub async fn topics(&self) -> Vec<TopicName> {
        self.topics.read().await.clone()
    }

    pub async fn leader(&self) -> Option<NodeAddress> {
        self.leader.get().await
    }

    pub async fn refresh_leader(&self) -> Result<Option<NodeAddress>> {
        self.leader.refresh(&self.rpc).await
    }

    /// Replace the catalog with the log's visible topics.
    pub async fn sync_topics(&self) -> Result<()> {
        let topics = self.log.list_visible_topics().await?;
        *self.topics.write().await = topics.into_iter().collect();
        Ok(())
    }

    /// Create each configured initial topic. Failures are logged and skipped.
    pub async fn create_initial_topics(&self) {
        for topic in &self.config.initial_topics {
            if let Err(e) = self.create_topic(topic).await {
                warn!(publisher = %self.address, topic = %topic, error = %e, "Could not create initial topic");
            }
        }
    }

    /// Create the initial topics, then start the leader poll and catalog sync.
    pub async fn start(self: &Arc<Self>) -> BackgroundTaskRegistry {
        self.create_initial_topics().await;
        let mut tasks = BackgroundTaskRegistry::new();

        let this = self.clone();
        tasks.spawn_periodic("leader_refresh", self.config.leader_refresh_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.refresh_leader().await {
                    warn!(publisher = %this.address, error = %e, "Leader refresh failed");
                }
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("topic_sync", self.config.topic_sync_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.sync_topics().await {
                    warn!(publisher = %this.address, error = %e, "Topic sync failed");
                }
            }
        });

        info!(addr = %self.address, "Publisher started");
        tasks
    }
}

#[async_trait]
impl RpcHandler for Publisher {
    fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    async fn handle(&self, request: RequestBody) -> Result<ResponseBody> {
        match request {
            RequestBody::Publish { topic, message } => {
                self.publish(&topic, &message).await?;
                Ok(ResponseBody::Ack)
            }
            RequestBody::Topics => Ok(ResponseBody::Topics(self.topics().await)),
            RequestBody::Leader => Ok(ResponseBody::Leader(self.leader().await)),
            other => unsupported(&other),
        }
    }
}
