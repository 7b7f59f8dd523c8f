//! Live broker membership with heartbeat timestamps.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::types::NodeAddress;

/// Brokers known to the coordinator, keyed by address, with the time of
/// their last heartbeat.
#[derive(Debug, Default)]
pub struct MembershipRegistry {
    members: DashMap<NodeAddress, Instant>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `address` if unseen. A known address keeps its last heartbeat.
    ///
    /// Returns true if the address was added.
    pub fn register(&self, address: &NodeAddress) -> bool {
        let mut added = false;
        self.members.entry(address.clone()).or_insert_with(|| {
            added = true;
            Instant::now()
        });
        added
    }

    /// Record a heartbeat from `address`, adding it if unseen.
    ///
    /// Returns true if the address was added.
    pub fn heartbeat(&self, address: &NodeAddress) -> bool {
        self.members.insert(address.clone(), Instant::now()).is_none()
    }

    /// Remove every member silent for strictly longer than `timeout`.
    ///
    /// Returns the removed addresses, sorted.
    pub fn remove_dead(&self, timeout: Duration) -> Vec<NodeAddress> {
        let now = Instant::now();
        let mut removed = Vec::new();
        self.members.retain(|address, last| {
            let alive = now.saturating_duration_since(*last) <= timeout;
            if !alive {
                removed.push(address.clone());
            }
            alive
        });
        removed.sort();
        removed
    }

    /// Current members, sorted.
    pub fn members(&self) -> Vec<NodeAddress> {
        let mut members: Vec<NodeAddress> = self.members.iter().map(|e| e.key().clone()).collect();
        members.sort();
        members
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.members.contains_key(address)
    }

    pub fn last_heartbeat(&self, address: &NodeAddress) -> Option<Instant> {
        self.members.get(address).map(|e| *e.value())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NodeAddress {
        NodeAddress::from(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_is_idempotent() {
        let registry = MembershipRegistry::new();
        assert!(registry.register(&addr(":8081")));
        let first = registry.last_heartbeat(&addr(":8081")).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!registry.register(&addr(":8081")));

        // Re-registering does not count as a heartbeat
        assert_eq!(registry.last_heartbeat(&addr(":8081")), Some(first));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_adds_unseen_and_refreshes() {
        let registry = MembershipRegistry::new();
        assert!(registry.heartbeat(&addr(":8081")));
        let first = registry.last_heartbeat(&addr(":8081")).unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!registry.heartbeat(&addr(":8081")));
        assert!(registry.last_heartbeat(&addr(":8081")).unwrap() > first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_dead_uses_strict_timeout() {
        let registry = MembershipRegistry::new();
        registry.register(&addr(":8081"));
        registry.register(&addr(":8082"));

        tokio::time::advance(Duration::from_secs(10)).await;
        registry.heartbeat(&addr(":8082"));

        // Exactly at the timeout is still alive
        assert!(registry.remove_dead(Duration::from_secs(10)).is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            registry.remove_dead(Duration::from_secs(10)),
            vec![addr(":8081")]
        );
        assert_eq!(registry.members(), vec![addr(":8082")]);
    }

    #[test]
    fn test_members_sorted() {
        let registry = MembershipRegistry::new();
        registry.register(&addr(":9003"));
        registry.register(&addr(":9001"));
        registry.register(&addr(":9002"));
        assert_eq!(
            registry.members(),
            vec![addr(":9001"), addr(":9002"), addr(":9003")]
        );
    }
}
