//! Wire messages shared by every node role.
//!
//! Each request and each response carries the sender's Lamport timestamp.
//! A node only answers the requests of its own role; anything else gets
//! [`RpcErrorKind::Unsupported`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BrokerSnapshot, LeaderTerm, MessageBody, NodeAddress, TopicName};

/// A stamped request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub timestamp: u64,
    pub body: RequestBody,
}

/// A stamped response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub timestamp: u64,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Liveness probe, answered by every role.
    Ping,

    // Coordinator
    Register { address: NodeAddress },
    Heartbeat { address: NodeAddress },

    /// Current leader. Coordinator, broker, publisher and subscriber all answer.
    Leader,
    /// Current membership. Coordinator and broker answer.
    Brokers,
    /// Current leader with its election epoch. Coordinator only.
    LeaderTerm,

    // Broker
    LeaderChanged { leader: NodeAddress, epoch: u64 },
    /// Topic catalog. Broker, publisher and subscriber answer.
    Topics,
    Messages {
        topic: TopicName,
        subscriber: NodeAddress,
    },
    Data,
    AddTopic { topic: TopicName },
    AddMessage { topic: TopicName, message: MessageBody },
    AddSubscriber { topic: TopicName, subscriber: NodeAddress },
    RemoveSubscriber { topic: TopicName, subscriber: NodeAddress },
    Subscribers,
    PublisherContact { publisher: NodeAddress },

    // Publisher
    Publish { topic: TopicName, message: MessageBody },

    // Subscriber
    Subscribe { topic: TopicName },
    Unsubscribe { topic: TopicName },
    SubscribedTopics,
    AllMessages,
    TopicMessages { topic: TopicName },
    RefreshMessages { topic: TopicName },
}

impl RequestBody {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Ping => "ping",
            RequestBody::Register { .. } => "register",
            RequestBody::Heartbeat { .. } => "heartbeat",
            RequestBody::Leader => "leader",
            RequestBody::Brokers => "brokers",
            RequestBody::LeaderTerm => "leader_term",
            RequestBody::LeaderChanged { .. } => "leader_changed",
            RequestBody::Topics => "topics",
            RequestBody::Messages { .. } => "messages",
            RequestBody::Data => "data",
            RequestBody::AddTopic { .. } => "add_topic",
            RequestBody::AddMessage { .. } => "add_message",
            RequestBody::AddSubscriber { .. } => "add_subscriber",
            RequestBody::RemoveSubscriber { .. } => "remove_subscriber",
            RequestBody::Subscribers => "subscribers",
            RequestBody::PublisherContact { .. } => "publisher_contact",
            RequestBody::Publish { .. } => "publish",
            RequestBody::Subscribe { .. } => "subscribe",
            RequestBody::Unsubscribe { .. } => "unsubscribe",
            RequestBody::SubscribedTopics => "subscribed_topics",
            RequestBody::AllMessages => "all_messages",
            RequestBody::TopicMessages { .. } => "topic_messages",
            RequestBody::RefreshMessages { .. } => "refresh_messages",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    Pong,
    Ack,
    Leader(Option<NodeAddress>),
    LeaderTerm(LeaderTerm),
    Brokers(Vec<NodeAddress>),
    Topics(Vec<TopicName>),
    Messages(Vec<MessageBody>),
    AllMessages(BTreeMap<TopicName, Vec<MessageBody>>),
    Subscribers(BTreeMap<TopicName, Vec<NodeAddress>>),
    Data(BrokerSnapshot),
    Error(RpcErrorInfo),
}

/// Structured RPC error kind, so callers can tell rejections from outages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcErrorKind {
    /// Subscriber read a topic it is not subscribed to. Do not retry.
    Unauthorized,
    /// A downstream dependency of the handler failed.
    Unavailable,
    /// This node's role does not serve the request.
    Unsupported,
    /// Anything else.
    Internal,
}

impl RpcErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            RpcErrorKind::Unauthorized => "unauthorized",
            RpcErrorKind::Unavailable => "unavailable",
            RpcErrorKind::Unsupported => "unsupported",
            RpcErrorKind::Internal => "internal",
        }
    }
}

/// Structured RPC error with kind and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorInfo {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcErrorInfo {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Rejection for a request the receiving role does not serve.
    pub fn unsupported(request: &RequestBody) -> Self {
        Self::new(
            RpcErrorKind::Unsupported,
            format!("request '{}' is not served by this node", request.kind()),
        )
    }
}
