//! Coordinator node: membership, failure detection and leader election.
//!
//! # Architecture
//!
//! ```text
//!  broker ──register/heartbeat──▶ MembershipRegistry
//!                                        │ join / leader died
//!                                        ▼
//!                                   elect(members) ──▶ leader
//!                                        │
//!                                        ▼
//!                    NotificationRetrier ──leader_changed──▶ every member
//!                          ▲  (failed pushes retried every 2s, at most 3 times)
//! ```
//!
//! The leader is derived state: it is recomputed on every join and whenever
//! the dead-broker sweep removes the current leader, and is `None` exactly
//! when membership is empty. Every election bumps the epoch pushed along with
//! the leader, so brokers can drop pushes that arrive out of order.

pub mod election;
pub mod membership;
pub mod notifier;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clock::LogicalClock;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::metrics;
use crate::rpc::{RequestBody, ResponseBody, RpcClient, RpcHandler, Transport, unsupported};
use crate::tasks::BackgroundTaskRegistry;
use crate::types::{LeaderTerm, NodeAddress};

pub use election::elect;
pub use membership::MembershipRegistry;
pub use notifier::NotificationRetrier;

pub struct Coordinator {
    address: NodeAddress,
    config: CoordinatorConfig,
    clock: Arc<LogicalClock>,
    rpc: RpcClient,
    membership: MembershipRegistry,
    /// Written only by `elect`, under this lock, from a fresh membership snapshot.
    term: RwLock<LeaderTerm>,
    notifier: NotificationRetrier,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, transport: Arc<dyn Transport>) -> Self {
        let clock = Arc::new(LogicalClock::new());
        Self {
            address: config.address(),
            rpc: RpcClient::new(transport, clock.clone()),
            clock,
            membership: MembershipRegistry::new(),
            term: RwLock::new(LeaderTerm {
                leader: None,
                epoch: initial_epoch(),
            }),
            notifier: NotificationRetrier::new(config.max_notification_retries),
            config,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn membership(&self) -> &MembershipRegistry {
        &self.membership
    }

    pub fn notifier(&self) -> &NotificationRetrier {
        &self.notifier
    }

    /// Add `address` to membership. A new member triggers an election.
    pub async fn register(&self, address: &NodeAddress) {
        if self.membership.register(address) {
            info!(broker = %address, "Registered broker");
            metrics::REGISTERED_BROKERS.set(self.membership.len() as i64);
            self.elect("join").await;
        }
    }

    /// Refresh liveness of `address`. An unseen address is added and triggers an election.
    pub async fn heartbeat(&self, address: &NodeAddress) {
        if self.membership.heartbeat(address) {
            info!(broker = %address, "Added broker from heartbeat");
            metrics::REGISTERED_BROKERS.set(self.membership.len() as i64);
            self.elect("join").await;
        }
    }

    /// Current leader, `None` while membership is empty.
    pub async fn leader(&self) -> Option<NodeAddress> {
        self.term.read().await.leader.clone()
    }

    /// Current leader with the epoch of the election that chose it.
    pub async fn term(&self) -> LeaderTerm {
        self.term.read().await.clone()
    }

    /// Current members, sorted.
    pub fn brokers(&self) -> Vec<NodeAddress> {
        self.membership.members()
    }

    /// Remove brokers silent for longer than the dead timeout.
    ///
    /// Re-elects if the current leader was among them. Returns the removed brokers.
    pub async fn sweep_dead(&self) -> Vec<NodeAddress> {
        let removed = self.membership.remove_dead(self.config.dead_broker_timeout);
        if removed.is_empty() {
            return removed;
        }

        for broker in &removed {
            warn!(broker = %broker, "Removed dead broker");
        }
        metrics::DEAD_BROKERS_REMOVED.inc_by(removed.len() as u64);
        metrics::REGISTERED_BROKERS.set(self.membership.len() as i64);

        let leader_died = self
            .leader()
            .await
            .is_some_and(|leader| removed.contains(&leader));
        if leader_died {
            self.elect("leader_dead").await;
        }

        removed
    }

    /// Recompute the leader from current membership and push it to every member.
    pub async fn elect(&self, trigger: &str) -> Option<NodeAddress> {
        let (leader, epoch, members) = {
            let mut term = self.term.write().await;
            let members = self.membership.members();
            term.leader = election::elect(&members);
            term.epoch += 1;
            (term.leader.clone(), term.epoch, members)
        };

        metrics::record_election(trigger);

        match &leader {
            Some(leader) => {
                info!(
                    leader = %leader,
                    epoch,
                    members = members.len(),
                    trigger,
                    "Elected new leader"
                );
                self.notifier
                    .notify_all(&self.rpc, leader, epoch, &members)
                    .await;
            }
            None => info!(trigger, "No brokers available, leader cleared"),
        }

        leader
    }

    /// One round of leader-change retries for pending targets.
    pub async fn retry_pending(&self) {
        let term = self.term().await;
        self.notifier.retry_pending(&self.rpc, &term).await;
    }

    /// Start the dead-broker sweep and notification retry tasks.
    pub fn start(self: &Arc<Self>) -> BackgroundTaskRegistry {
        let mut tasks = BackgroundTaskRegistry::new();

        let this = self.clone();
        tasks.spawn_periodic("dead_broker_sweep", self.config.sweep_interval, move |_| {
            let this = this.clone();
            async move {
                this.sweep_dead().await;
            }
        });

        let this = self.clone();
        tasks.spawn_periodic("notification_retry", self.config.retry_interval, move |_| {
            let this = this.clone();
            async move {
                this.retry_pending().await;
            }
        });

        info!(addr = %self.address, "Coordinator started");
        tasks
    }
}

/// Epochs continue from wall-clock milliseconds, so a restarted coordinator
/// still outranks the pushes of its previous run.
fn initial_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

#[async_trait]
impl RpcHandler for Coordinator {
    fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    async fn handle(&self, request: RequestBody) -> Result<ResponseBody> {
        match request {
            RequestBody::Register { address } => {
                self.register(&address).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::Heartbeat { address } => {
                self.heartbeat(&address).await;
                Ok(ResponseBody::Ack)
            }
            RequestBody::Leader => Ok(ResponseBody::Leader(self.leader().await)),
            RequestBody::LeaderTerm => Ok(ResponseBody::LeaderTerm(self.term().await)),
            RequestBody::Brokers => Ok(ResponseBody::Brokers(self.brokers())),
            other => unsupported(&other),
        }
    }
}
