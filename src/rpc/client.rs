//! Clock-stamping RPC client with typed helpers for every call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::message::{RequestBody, ResponseBody, RpcRequest};
use super::transport::Transport;
use crate::clock::LogicalClock;
use crate::error::{Error, Result};
use crate::metrics;
use crate::types::{BrokerSnapshot, LeaderTerm, MessageBody, NodeAddress, TopicName};

/// Outbound calls on behalf of one node.
///
/// Each call ticks the node's clock, sends the new value with the request and
/// observes the timestamp of the response.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    clock: Arc<LogicalClock>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<LogicalClock>) -> Self {
        Self { transport, clock }
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// Send `body` to `target`. A [`ResponseBody::Error`] becomes [`Error::Remote`].
    pub async fn call(&self, target: &NodeAddress, body: RequestBody) -> Result<ResponseBody> {
        let kind = body.kind();
        let timestamp = self.clock.tick();
        let started = Instant::now();

        let result = self
            .transport
            .send(target, RpcRequest { timestamp, body })
            .await;
        metrics::record_rpc_sent(kind, result.is_ok(), started.elapsed().as_secs_f64());

        let response = result?;
        self.clock.observe(response.timestamp);

        match response.body {
            ResponseBody::Error(info) => Err(Error::Remote(info)),
            body => Ok(body),
        }
    }

    async fn call_ack(&self, target: &NodeAddress, body: RequestBody) -> Result<()> {
        match self.call(target, body).await? {
            ResponseBody::Ack => Ok(()),
            other => Err(unexpected("Ack", &other)),
        }
    }

    async fn call_messages(
        &self,
        target: &NodeAddress,
        body: RequestBody,
    ) -> Result<Vec<MessageBody>> {
        match self.call(target, body).await? {
            ResponseBody::Messages(messages) => Ok(messages),
            other => Err(unexpected("Messages", &other)),
        }
    }

    async fn call_topics(&self, target: &NodeAddress, body: RequestBody) -> Result<Vec<TopicName>> {
        match self.call(target, body).await? {
            ResponseBody::Topics(topics) => Ok(topics),
            other => Err(unexpected("Topics", &other)),
        }
    }

    // --- any role ---

    /// Liveness probe.
    pub async fn ping(&self, target: &NodeAddress) -> Result<()> {
        match self.call(target, RequestBody::Ping).await? {
            ResponseBody::Pong => Ok(()),
            other => Err(unexpected("Pong", &other)),
        }
    }

    pub async fn leader(&self, target: &NodeAddress) -> Result<Option<NodeAddress>> {
        match self.call(target, RequestBody::Leader).await? {
            ResponseBody::Leader(leader) => Ok(leader),
            other => Err(unexpected("Leader", &other)),
        }
    }

    /// Leader and election epoch, as served by the coordinator.
    pub async fn leader_term(&self, target: &NodeAddress) -> Result<LeaderTerm> {
        match self.call(target, RequestBody::LeaderTerm).await? {
            ResponseBody::LeaderTerm(term) => Ok(term),
            other => Err(unexpected("LeaderTerm", &other)),
        }
    }

    pub async fn brokers(&self, target: &NodeAddress) -> Result<Vec<NodeAddress>> {
        match self.call(target, RequestBody::Brokers).await? {
            ResponseBody::Brokers(brokers) => Ok(brokers),
            other => Err(unexpected("Brokers", &other)),
        }
    }

    pub async fn topics(&self, target: &NodeAddress) -> Result<Vec<TopicName>> {
        self.call_topics(target, RequestBody::Topics).await
    }

    // --- coordinator ---

    pub async fn register(&self, coordinator: &NodeAddress, address: &NodeAddress) -> Result<()> {
        self.call_ack(
            coordinator,
            RequestBody::Register {
                address: address.clone(),
            },
        )
        .await
    }

    pub async fn heartbeat(&self, coordinator: &NodeAddress, address: &NodeAddress) -> Result<()> {
        self.call_ack(
            coordinator,
            RequestBody::Heartbeat {
                address: address.clone(),
            },
        )
        .await
    }

    // --- broker ---

    pub async fn leader_changed(
        &self,
        broker: &NodeAddress,
        leader: &NodeAddress,
        epoch: u64,
    ) -> Result<()> {
        self.call_ack(
            broker,
            RequestBody::LeaderChanged {
                leader: leader.clone(),
                epoch,
            },
        )
        .await
    }

    /// Messages of `topic`, gated on `subscriber` being subscribed to it.
    pub async fn messages(
        &self,
        broker: &NodeAddress,
        topic: &str,
        subscriber: &NodeAddress,
    ) -> Result<Vec<MessageBody>> {
        self.call_messages(
            broker,
            RequestBody::Messages {
                topic: topic.to_string(),
                subscriber: subscriber.clone(),
            },
        )
        .await
    }

    /// Full replicated state, for replication pulls.
    pub async fn data(&self, broker: &NodeAddress) -> Result<BrokerSnapshot> {
        match self.call(broker, RequestBody::Data).await? {
            ResponseBody::Data(snapshot) => Ok(snapshot),
            other => Err(unexpected("Data", &other)),
        }
    }

    pub async fn add_topic(&self, broker: &NodeAddress, topic: &str) -> Result<()> {
        self.call_ack(
            broker,
            RequestBody::AddTopic {
                topic: topic.to_string(),
            },
        )
        .await
    }

    pub async fn add_message(&self, broker: &NodeAddress, topic: &str, message: &str) -> Result<()> {
        self.call_ack(
            broker,
            RequestBody::AddMessage {
                topic: topic.to_string(),
                message: message.to_string(),
            },
        )
        .await
    }

    pub async fn add_subscriber(
        &self,
        broker: &NodeAddress,
        topic: &str,
        subscriber: &NodeAddress,
    ) -> Result<()> {
        self.call_ack(
            broker,
            RequestBody::AddSubscriber {
                topic: topic.to_string(),
                subscriber: subscriber.clone(),
            },
        )
        .await
    }

    pub async fn remove_subscriber(
        &self,
        broker: &NodeAddress,
        topic: &str,
        subscriber: &NodeAddress,
    ) -> Result<()> {
        self.call_ack(
            broker,
            RequestBody::RemoveSubscriber {
                topic: topic.to_string(),
                subscriber: subscriber.clone(),
            },
        )
        .await
    }

    pub async fn subscribers(
        &self,
        broker: &NodeAddress,
    ) -> Result<BTreeMap<TopicName, Vec<NodeAddress>>> {
        match self.call(broker, RequestBody::Subscribers).await? {
            ResponseBody::Subscribers(subscribers) => Ok(subscribers),
            other => Err(unexpected("Subscribers", &other)),
        }
    }

    pub async fn publisher_contact(
        &self,
        broker: &NodeAddress,
        publisher: &NodeAddress,
    ) -> Result<()> {
        self.call_ack(
            broker,
            RequestBody::PublisherContact {
                publisher: publisher.clone(),
            },
        )
        .await
    }

    // --- publisher ---

    pub async fn publish(&self, publisher: &NodeAddress, topic: &str, message: &str) -> Result<()> {
        self.call_ack(
            publisher,
            RequestBody::Publish {
                topic: topic.to_string(),
                message: message.to_string(),
            },
        )
        .await
    }

    // --- subscriber ---

    pub async fn subscribe(&self, subscriber: &NodeAddress, topic: &str) -> Result<()> {
        self.call_ack(
            subscriber,
            RequestBody::Subscribe {
                topic: topic.to_string(),
            },
        )
        .await
    }

    pub async fn unsubscribe(&self, subscriber: &NodeAddress, topic: &str) -> Result<()> {
        self.call_ack(
            subscriber,
            RequestBody::Unsubscribe {
                topic: topic.to_string(),
            },
        )
        .await
    }

    pub async fn subscribed_topics(&self, subscriber: &NodeAddress) -> Result<Vec<TopicName>> {
        self.call_topics(subscriber, RequestBody::SubscribedTopics)
            .await
    }

    pub async fn all_messages(
        &self,
        subscriber: &NodeAddress,
    ) -> Result<BTreeMap<TopicName, Vec<MessageBody>>> {
        match self.call(subscriber, RequestBody::AllMessages).await? {
            ResponseBody::AllMessages(messages) => Ok(messages),
            other => Err(unexpected("AllMessages", &other)),
        }
    }

    /// Cached messages of `topic`. Subscribes the subscriber as a side effect.
    pub async fn topic_messages(
        &self,
        subscriber: &NodeAddress,
        topic: &str,
    ) -> Result<Vec<MessageBody>> {
        self.call_messages(
            subscriber,
            RequestBody::TopicMessages {
                topic: topic.to_string(),
            },
        )
        .await
    }

    pub async fn refresh_messages(
        &self,
        subscriber: &NodeAddress,
        topic: &str,
    ) -> Result<Vec<MessageBody>> {
        self.call_messages(
            subscriber,
            RequestBody::RefreshMessages {
                topic: topic.to_string(),
            },
        )
        .await
    }
}

fn unexpected(expected: &str, got: &ResponseBody) -> Error {
    Error::UnexpectedResponse(format!("expected {}, got {:?}", expected, got))
}
