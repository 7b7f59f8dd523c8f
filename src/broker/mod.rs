//! Broker node: replicated topic state, cluster membership and readiness.
//!
//! # Lifecycle
//!
//! A broker is created `Initializing` and becomes `Ready` as soon as it is
//! started. It then waits out a startup grace period, so its listener is up
//! before it advertises itself, registers with the coordinator, refreshes its
//! view of the cluster and only then begins heartbeating.
//!
//! # Replication
//!
//! Followers pull the leader's full state every sync interval and replace
//! their own with it. Writes are accepted on every broker; a write accepted
//! by a follower lives only until that follower's next sync.

pub mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::LogicalClock;
use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::log::MessageLog;
use crate::metrics;
use crate::rpc::{RequestBody, ResponseBody, RpcClient, RpcHandler, Transport, unsupported};
use crate::tasks::BackgroundTaskRegistry;
use crate::types::{BrokerSnapshot, ClusterView, MessageBody, NodeAddress, TopicName};

pub use state::BrokerState;

/// Where a broker is in its startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerPhase {
    Initializing,
    Ready,
}

pub struct Broker {
    address: NodeAddress,
    config: BrokerConfig,
    clock: Arc<LogicalClock>,
    rpc: RpcClient,
    log: Arc<dyn MessageLog>,
    state: BrokerState,
    view: RwLock<ClusterView>,
    /// Set once when started. Never cleared.
    ready: AtomicBool,
    /// Set once the post-grace registration and first refresh have run.
    started: AtomicBool,
}

impl Broker {
    pub fn new(config: BrokerConfig, transport: Arc<dyn Transport>, log: Arc<dyn MessageLog>) -> Self {
        let clock = Arc::new(LogicalClock::new());
        Self {
            address: config.address(),
            rpc: RpcClient::new(transport, clock.clone()),
            clock,
            log,
            state: BrokerState::new(),
            view: RwLock::new(ClusterView::default()),
            ready: AtomicBool::new(false),
            started: AtomicBool::new(false),
            config,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn phase(&self) -> BrokerPhase {
        if self.is_ready() {
            BrokerPhase::Ready
        } else {
            BrokerPhase::Initializing
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// True once registration and the first refresh have run after the grace delay.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Initializing -> Ready. Later calls are no-ops.
    pub fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!(broker = %self.address, "Broker is now ready to receive messages");
        }
    }

    /// Register with the coordinator, refresh the cluster view and enable heartbeats.
    ///
    /// Failures are logged; heartbeats are enabled regardless, and a missed
    /// registration is repaired by the coordinator treating the first
    /// heartbeat as an implicit join.
    pub async fn join_cluster(&self) {
        info!(broker = %self.address, "Starting broker registration and heartbeat");
        if let Err(e) = self.register().await {
            warn!(broker = %self.address, error = %e, "Failed to register with coordinator");
        }
        if let Err(e) = self.refresh_leader_and_membership().await {
            warn!(broker = %self.address, error = %e, "Failed initial cluster refresh");
        }
        self.started.store(true, Ordering::SeqCst);
    }

    /// Mark ready and start the grace timer and every periodic task.
    pub fn start(self: &Arc<Self>) -> BackgroundTaskRegistry {
        self.mark_ready();
        let mut tasks = BackgroundTaskRegistry::new();

        let this = self.clone();
        tasks.spawn("startup", async move {
            tokio::time::sleep(this.config.startup_grace).await;
            this.join_cluster().await;
        });

        let this = self.clone();
        tasks.spawn_periodic("heartbeat", self.config.heartbeat_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.send_heartbeat().await {
                    warn!(broker = %this.address, error = %e, "Heartbeat failed");
                }
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("membership_refresh", self.config.refresh_interval, move |_| {
            let this = this.clone();
            async move {
                if !this.is_started() {
                    return;
                }
                if let Err(e) = this.refresh_leader_and_membership().await {
                    warn!(broker = %this.address, error = %e, "Cluster refresh failed, keeping previous view");
                }
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("replication_sync", self.config.sync_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.sync_from_leader().await {
                    warn!(broker = %this.address, error = %e, "Replication sync failed, keeping stale state");
                }
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("log_topic_sync", self.config.topic_sync_interval, move |_| {
            let this = this.clone();
            async move {
                if let Err(e) = this.sync_topics_with_log().await {
                    warn!(broker = %this.address, error = %e, "Topic sync with log failed");
                }
            }
        });

        tasks
    }

    // =========================================================================
    // Cluster membership
    // =========================================================================

    pub async fn register(&self) -> Result<()> {
        self.rpc
            .register(&self.config.coordinator, &self.address)
            .await?;
        info!(broker = %self.address, coordinator = %self.config.coordinator, "Registered with coordinator");
        Ok(())
    }

    /// Push a heartbeat. Skipped until the broker is ready and past its grace period.
    pub async fn send_heartbeat(&self) -> Result<()> {
        if !self.is_ready() || !self.is_started() {
            return Ok(());
        }
        self.rpc
            .heartbeat(&self.config.coordinator, &self.address)
            .await
    }

    /// Pull leader and membership from the coordinator.
    ///
    /// Both are fetched before either is applied, so a failure leaves the
    /// previous view intact. A leader older than the one already applied is
    /// ignored.
    pub async fn refresh_leader_and_membership(&self) -> Result<()> {
        let term = self.rpc.leader_term(&self.config.coordinator).await?;
        let brokers = self.rpc.brokers(&self.config.coordinator).await?;

        let mut view = self.view.write().await;
        view.brokers = brokers;
        if term.epoch < view.epoch {
            debug!(
                broker = %self.address,
                epoch = term.epoch,
                applied = view.epoch,
                "Ignoring refreshed leader older than the applied one"
            );
            return Ok(());
        }
        if view.leader != term.leader {
            info!(broker = %self.address, leader = ?term.leader, epoch = term.epoch, "Updated leader");
        }
        view.leader = term.leader;
        view.epoch = term.epoch;
        Ok(())
    }

    /// Accept a pushed leader of election `epoch`. Returns false if a newer
    /// leader was already applied. Pushes before readiness are applied and flagged.
    pub async fn handle_leader_changed(&self, leader: NodeAddress, epoch: u64) -> bool {
        let mut view = self.view.write().await;
        if epoch < view.epoch {
            debug!(
                broker = %self.address,
                leader = %leader,
                epoch,
                applied = view.epoch,
                "Ignoring stale leader change"
            );
            return false;
        }

        if !self.is_ready() {
            warn!(broker = %self.address, leader = %leader, "Received leader change before ready");
        }
        if leader == self.address {
            info!(broker = %self.address, epoch, "This broker is now the leader");
        } else {
            info!(broker = %self.address, leader = %leader, epoch, "Leader updated");
        }
        view.leader = Some(leader);
        view.epoch = epoch;
        true
    }

    pub async fn leader(&self) -> Option<NodeAddress> {
        self.view.read().await.leader.clone()
    }

    pub async fn brokers(&self) -> Vec<NodeAddress> {
        self.view.read().await.brokers.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.view.read().await.leader.as_ref() == Some(&self.address)
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Replace local state with the leader's.
    ///
    /// Returns false without any call when there is no leader or this broker
    /// is the leader.
    pub async fn sync_from_leader(&self) -> Result<bool> {
        let leader = match self.leader().await {
            Some(leader) if leader != self.address => leader,
            _ => return Ok(false),
        };

        match self.rpc.data(&leader).await {
            Ok(snapshot) => {
                self.state.replace(snapshot).await;
                metrics::record_replication_sync(true);
                debug!(broker = %self.address, leader = %leader, "Synchronized data with leader");
                Ok(true)
            }
            Err(e) => {
                metrics::record_replication_sync(false);
                Err(e)
            }
        }
    }

    /// Replace the topic catalog with the log's visible topics.
    pub async fn sync_topics_with_log(&self) -> Result<()> {
        let topics = self.log.list_visible_topics().await;
        metrics::record_log_operation("list_topics", topics.is_ok());
        let topics = topics?;
        debug!(broker = %self.address, count = topics.len(), "Synced topics with log");
        self.state.replace_topics(topics).await;
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create `topic` in the log, then record it locally.
    pub async fn add_topic(&self, topic: &str) -> Result<()> {
        let created = self.log.create_topic(topic).await;
        metrics::record_log_operation("create_topic", created.is_ok());
        created?;
        self.state.add_topic(topic).await;
        info!(broker = %self.address, topic, "Created topic");
        Ok(())
    }

    /// Append `message` to the log, then record it locally.
    pub async fn add_message(&self, topic: &str, message: &str) -> Result<()> {
        let produced = self.log.produce(topic, message).await;
        metrics::record_log_operation("produce", produced.is_ok());
        let offset = produced?;
        self.state.add_message(topic, message).await;
        debug!(broker = %self.address, topic, offset, "Message sent to log");
        Ok(())
    }

    pub async fn add_subscriber(&self, topic: &str, subscriber: &NodeAddress) {
        if self.state.add_subscriber(topic, subscriber).await {
            info!(broker = %self.address, topic, subscriber = %subscriber, "Added subscriber");
        }
    }

    pub async fn remove_subscriber(&self, topic: &str, subscriber: &NodeAddress) {
        if self.state.remove_subscriber(topic, subscriber).await {
            info!(broker = %self.address, topic, subscriber = %subscriber, "Removed subscriber");
        }
    }

    pub fn log_publisher_contact(&self, publisher: &NodeAddress) {
        info!(broker = %self.address, publisher = %publisher, "New publisher contacted the broker");
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn is_subscriber_subscribed_to_topic(
        &self,
        subscriber: &NodeAddress,
        topic: &str,
    ) -> bool {
        self.state.is_subscribed(subscriber, topic).await
    }

    /// Messages of `topic` for `subscriber`, who must be subscribed to it.
    pub async fn messages_for(
        &self,
        topic: &str,
        subscriber: &NodeAddress,
    ) -> Result<Vec<MessageBody>> {
        if !self.is_subscriber_subscribed_to_topic(subscriber, topic).await {
            return Err(Error::Unauthorized {
                subscriber: subscriber.clone(),
                topic: topic.to_string(),
            });
        }
        Ok(self.state.messages(topic).await)
    }

    pub async fn topics(&self) -> Vec<TopicName> {
        self.state.topics().await
    }

    pub async fn data(&self) -> BrokerSnapshot {
        self.state.snapshot().await
    }
}

#[async_trait]
impl RpcHandler for Broker {
    fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    async fn handle(&self, request: RequestBody) -> Result<ResponseBody> {
        match request {
            RequestBody::LeaderChanged { leader, epoch } => {
                self.handle_leader_changed(leader, epoch).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::Leader => Ok(ResponseBody::Leader(self.leader().await)),
            RequestBody::Brokers => Ok(ResponseBody::Brokers(self.brokers().await)),
            RequestBody::Topics => Ok(ResponseBody::Topics(self.topics().await)),
            RequestBody::Messages { topic, subscriber } => self
                .messages_for(&topic, &subscriber)
                .await
                .map(ResponseBody::Messages),
            RequestBody::AllMessages => Ok(ResponseBody::AllMessages(self.state.all_messages().await)),
            RequestBody::Data => Ok(ResponseBody::Data(self.data().await)),
            RequestBody::AddTopic { topic } => {
                self.add_topic(&topic).await?;
                Ok(ResponseBody::Ack)
            }
            RequestBody::AddMessage { topic, message } => {
                self.add_message(&topic, &message).await?;
                Ok(ResponseBody::Ack)
            }
            RequestBody::AddSubscriber { topic, subscriber } => {
                self.add_subscriber(&topic, &subscriber).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::RemoveSubscriber { topic, subscriber } => {
                self.remove_subscriber(&topic, &subscriber).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::Subscribers => Ok(ResponseBody::Subscribers(self.state.subscribers().await)),
            RequestBody::PublisherContact { publisher } => {
                self.log_publisher_contact(&publisher);
                Ok(ResponseBody::Ack)
            }
            other => unsupported(&other),
        }
    }
}
