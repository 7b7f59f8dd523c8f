//! Shared domain types.
//!
//! These newtypes keep node identities and replicated state explicit across
//! the coordinator, broker and client roles.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a topic in the external log.
pub type TopicName = String;

/// Body of a single published message.
pub type MessageBody = String;

/// Opaque identifier of a node: its advertised `host:port`.
///
/// Used as the map key for membership, subscriber lists and pending
/// notifications. The embedded port is also the election rank.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Wrap a raw address string.
    pub fn new(address: impl Into<String>) -> Self {
        NodeAddress(address.into())
    }

    /// Derive a node's address from its own listening host and port.
    ///
    /// The same `(host, port)` always produces the same address.
    pub fn from_host_port(host: &str, port: u16) -> Self {
        NodeAddress(format!("{}:{}", host, port))
    }

    /// The raw address string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric port suffix, if the address ends in `:<digits>`.
    pub fn port(&self) -> Option<u16> {
        let (_, port) = self.0.rsplit_once(':')?;
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        port.parse().ok()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(value: &str) -> Self {
        NodeAddress(value.to_string())
    }
}

impl From<String> for NodeAddress {
    fn from(value: String) -> Self {
        NodeAddress(value)
    }
}

impl AsRef<str> for NodeAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Full replicated broker state, as served by `data()` and pulled by followers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub topics: BTreeSet<TopicName>,
    pub messages: BTreeMap<TopicName, Vec<MessageBody>>,
    pub subscribers: BTreeMap<TopicName, Vec<NodeAddress>>,
}

/// A leader together with the election that chose it.
///
/// Epochs grow with every election, so a receiver can drop a leader that
/// arrives after a newer one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderTerm {
    pub leader: Option<NodeAddress>,
    pub epoch: u64,
}

/// A node's current picture of the cluster, as reported by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    pub leader: Option<NodeAddress>,
    /// Election epoch of `leader`, 0 until one is applied.
    pub epoch: u64,
    pub brokers: Vec<NodeAddress>,
}
