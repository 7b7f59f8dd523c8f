//! Publisher and subscriber roles.
//!
//! Both are thin clock-aware clients. They poll the coordinator for the
//! current leader broker and keep a topic catalog in step with the message
//! log; neither takes part in membership or election.

pub mod publisher;
pub mod subscriber;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::rpc::RpcClient;
use crate::types::NodeAddress;

pub use publisher::Publisher;
pub use subscriber::Subscriber;

/// A client's last known leader broker.
#[derive(Debug)]
pub struct LeaderView {
    coordinator: NodeAddress,
    leader: RwLock<Option<NodeAddress>>,
}

impl LeaderView {
    pub fn new(coordinator: NodeAddress) -> Self {
        Self {
            coordinator,
            leader: RwLock::new(None),
        }
    }

    pub fn coordinator(&self) -> &NodeAddress {
        &self.coordinator
    }

    pub async fn get(&self) -> Option<NodeAddress> {
        self.leader.read().await.clone()
    }

    /// Ask the coordinator for the leader. On failure the previous value is kept.
    pub async fn refresh(&self, rpc: &RpcClient) -> Result<Option<NodeAddress>> {
        let leader = rpc.leader(&self.coordinator).await?;

        let mut current = self.leader.write().await;
        if *current != leader {
            match &leader {
                Some(l) => info!(leader = %l, "Leader broker changed"),
                None => info!("No leader broker available"),
            }
        } else {
            debug!(leader = ?leader, "Leader broker unchanged");
        }
        *current = leader.clone();
        Ok(leader)
    }
}
