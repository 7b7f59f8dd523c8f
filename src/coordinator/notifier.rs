//! Best-effort leader-change delivery with bounded retry.
//!
//! A failed push leaves a pending entry at retry count 0. The retry task
//! re-pushes the current leader to each pending target; success clears the
//! entry, failure bumps the count, and the entry is dropped for good once the
//! count reaches the cap. A dropped broker catches up through its own
//! membership refresh.

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::rpc::RpcClient;
use crate::types::{LeaderTerm, NodeAddress};

pub struct NotificationRetrier {
    /// target -> failed retries so far
    pending: DashMap<NodeAddress, u8>,
    max_retries: u8,
}

impl NotificationRetrier {
    pub fn new(max_retries: u8) -> Self {
        Self {
            pending: DashMap::new(),
            max_retries,
        }
    }

    /// Push `leader` of election `epoch` to every member concurrently.
    pub async fn notify_all(
        &self,
        rpc: &RpcClient,
        leader: &NodeAddress,
        epoch: u64,
        members: &[NodeAddress],
    ) {
        let pushes = members.iter().map(|member| async move {
            (member, rpc.leader_changed(member, leader, epoch).await)
        });

        for (member, result) in join_all(pushes).await {
            match result {
                Ok(()) => {
                    debug!(broker = %member, leader = %leader, epoch, "Notified broker of new leader");
                    metrics::record_notification("initial", true);
                    self.pending.remove(member);
                }
                Err(e) => {
                    warn!(
                        broker = %member,
                        leader = %leader,
                        error = %e,
                        "Failed to notify broker of new leader, queued for retry"
                    );
                    metrics::record_notification("initial", false);
                    self.pending.insert(member.clone(), 0);
                }
            }
        }

        metrics::PENDING_NOTIFICATIONS.set(self.pending.len() as i64);
    }

    /// Re-push the current `term` to every pending target. Does nothing without a leader.
    pub async fn retry_pending(&self, rpc: &RpcClient, term: &LeaderTerm) {
        let Some(leader) = term.leader.as_ref() else {
            return;
        };
        let epoch = term.epoch;

        let snapshot: Vec<(NodeAddress, u8)> = self
            .pending
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        if snapshot.is_empty() {
            return;
        }

        let retries = snapshot.iter().map(|(target, count)| async move {
            (target, *count, rpc.leader_changed(target, leader, epoch).await)
        });

        for (target, count, result) in join_all(retries).await {
            match result {
                Ok(()) => {
                    info!(broker = %target, leader = %leader, "Notified broker of leader after retry");
                    metrics::record_notification("retry", true);
                    self.pending.remove(target);
                }
                Err(e) => {
                    metrics::record_notification("retry", false);
                    self.record_failed_retry(target, count, &e);
                }
            }
        }

        metrics::PENDING_NOTIFICATIONS.set(self.pending.len() as i64);
    }

    fn record_failed_retry(&self, target: &NodeAddress, seen: u8, error: &crate::error::Error) {
        let next = seen.saturating_add(1);

        // A fresh failure from notify_all reset the entry meanwhile; keep that one
        let abandoned = match self.pending.get_mut(target) {
            Some(mut entry) if *entry == seen => {
                *entry = next;
                next >= self.max_retries
            }
            _ => return,
        };

        if abandoned {
            self.pending.remove(target);
            metrics::NOTIFICATIONS_ABANDONED.inc();
            warn!(
                broker = %target,
                retries = next,
                error = %error,
                "Giving up on leader notification"
            );
        } else {
            debug!(broker = %target, retries = next, error = %error, "Leader notification retry failed");
        }
    }

    /// Failed retries recorded for `target`, if a push is pending.
    pub fn retry_count(&self, target: &NodeAddress) -> Option<u8> {
        self.pending.get(target).map(|e| *e.value())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending targets, sorted.
    pub fn pending_targets(&self) -> Vec<NodeAddress> {
        let mut targets: Vec<NodeAddress> = self.pending.iter().map(|e| e.key().clone()).collect();
        targets.sort();
        targets
    }
}
