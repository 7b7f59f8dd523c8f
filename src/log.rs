//! Boundary to the external message log.
//!
//! The log durably stores and fans out topic messages. Herald only needs four
//! calls from it: create a topic, append a message, list topics and read a
//! topic from an offset. [`InMemoryLog`] is a process-local implementation
//! used by the demos and the tests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::constants::INTERNAL_TOPIC_PREFIX;
use crate::error::{Error, Result};
use crate::types::{MessageBody, TopicName};

/// True for system topics that are hidden from every catalog.
pub fn is_internal_topic(topic: &str) -> bool {
    topic.starts_with(INTERNAL_TOPIC_PREFIX)
}

#[async_trait]
pub trait MessageLog: Send + Sync + 'static {
    /// Create `topic`. Creating an existing topic succeeds.
    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// Append `message` to `topic`, creating the topic if needed.
    ///
    /// Returns the offset of the appended message.
    async fn produce(&self, topic: &str, message: &str) -> Result<u64>;

    /// Every topic, internal ones included.
    async fn list_topics(&self) -> Result<BTreeSet<TopicName>>;

    /// Messages of `topic` at offsets `>= offset`. Unknown topics are empty.
    async fn read_from(&self, topic: &str, offset: u64) -> Result<Vec<MessageBody>>;

    /// Topics without the internal prefix.
    async fn list_visible_topics(&self) -> Result<BTreeSet<TopicName>> {
        let mut topics = self.list_topics().await?;
        topics.retain(|t| !is_internal_topic(t));
        Ok(topics)
    }
}

/// In-process log with an availability switch for fault injection.
#[derive(Debug)]
pub struct InMemoryLog {
    topics: DashMap<TopicName, Vec<MessageBody>>,
    available: AtomicBool,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self {
            topics: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable every call fails with [`Error::Log`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::Log("message log unavailable".to_string()))
        }
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn create_topic(&self, topic: &str) -> Result<()> {
        self.check_available()?;
        self.topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn produce(&self, topic: &str, message: &str) -> Result<u64> {
        self.check_available()?;
        let mut entries = self.topics.entry(topic.to_string()).or_default();
        entries.push(message.to_string());
        Ok((entries.len() - 1) as u64)
    }

    async fn list_topics(&self) -> Result<BTreeSet<TopicName>> {
        self.check_available()?;
        Ok(self.topics.iter().map(|e| e.key().clone()).collect())
    }

    async fn read_from(&self, topic: &str, offset: u64) -> Result<Vec<MessageBody>> {
        self.check_available()?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(self
            .topics
            .get(topic)
            .map(|entries| entries.iter().skip(start).cloned().collect())
            .unwrap_or_default())
    }
}
