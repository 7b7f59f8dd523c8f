//! Per-role configuration.
//!
//! Every role reads its settings from the environment with its `*from_env()` loader and
//! checks them with `validate()`, which reports every violated constraint at
//! once rather than stopping at the first.
//!
//! # Environment
//!
//! Shared by all roles:
//! - `HOST`: bind and advertised host (default `127.0.0.1`)
//! - `PORT`: listening port
//! - `COORDINATOR_ADDR`: coordinator address (brokers and clients)
//! - `RPC_CONNECT_TIMEOUT_MS`, `RPC_REQUEST_TIMEOUT_MS`, `RPC_MAX_FRAME_SIZE`
//!
//! Role specific `*_MS` overrides are listed on each loader.

use std::time::Duration;

use crate::constants::{
    DEFAULT_BROKER_TOPIC_SYNC_INTERVAL_MS, DEFAULT_CONSUME_INTERVAL_MS,
    DEFAULT_COORDINATOR_PORT, DEFAULT_DEAD_BROKER_SWEEP_INTERVAL_MS,
    DEFAULT_DEAD_BROKER_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_HOST,
    DEFAULT_LEADER_REFRESH_INTERVAL_MS, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MEMBERSHIP_REFRESH_INTERVAL_MS, DEFAULT_NOTIFICATION_RETRY_INTERVAL_MS,
    DEFAULT_PUBLISHER_PORT, DEFAULT_PUBLISHER_TOPIC_SYNC_INTERVAL_MS,
    DEFAULT_REPLICATION_SYNC_INTERVAL_MS, DEFAULT_RPC_CONNECT_TIMEOUT_MS,
    DEFAULT_RPC_REQUEST_TIMEOUT_MS, DEFAULT_STARTUP_GRACE_MS, DEFAULT_SUBSCRIBER_PORT,
    DEFAULT_SUBSCRIBER_TOPIC_SYNC_INTERVAL_MS, MAX_NOTIFICATION_RETRIES,
};
use crate::error::{Error, Result};
use crate::types::{NodeAddress, TopicName};

/// Outbound RPC limits shared by every role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub connect_timeout: Duration,
    /// Bound on a whole request/response exchange. Expiry counts as a transport failure.
    pub request_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_RPC_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_RPC_REQUEST_TIMEOUT_MS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl RpcConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            connect_timeout: env_duration_ms("RPC_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            request_timeout: env_duration_ms("RPC_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            max_frame_size: env_parse("RPC_MAX_FRAME_SIZE", defaults.max_frame_size)?,
        })
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.connect_timeout.is_zero() {
            errors.push("rpc connect_timeout must be greater than zero".to_string());
        }
        if self.request_timeout.is_zero() {
            errors.push("rpc request_timeout must be greater than zero".to_string());
        }
        if self.max_frame_size < 1024 {
            errors.push(format!(
                "rpc max_frame_size ({}) should be at least 1KB",
                self.max_frame_size
            ));
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// A broker silent for longer than this is removed at the next sweep.
    pub dead_broker_timeout: Duration,
    pub sweep_interval: Duration,
    pub retry_interval: Duration,
    /// Failed retries after which a pending push is dropped.
    pub max_notification_retries: u8,
    pub rpc: RpcConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_COORDINATOR_PORT,
            dead_broker_timeout: Duration::from_millis(DEFAULT_DEAD_BROKER_TIMEOUT_MS),
            sweep_interval: Duration::from_millis(DEFAULT_DEAD_BROKER_SWEEP_INTERVAL_MS),
            retry_interval: Duration::from_millis(DEFAULT_NOTIFICATION_RETRY_INTERVAL_MS),
            max_notification_retries: MAX_NOTIFICATION_RETRIES,
            rpc: RpcConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::from_host_port(&self.host, self.port)
    }

    /// Load from the environment.
    ///
    /// Adds `DEAD_BROKER_TIMEOUT_MS`, `DEAD_BROKER_SWEEP_INTERVAL_MS`,
    /// `NOTIFICATION_RETRY_INTERVAL_MS` and `MAX_NOTIFICATION_RETRIES`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env_string("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,
            dead_broker_timeout: env_duration_ms(
                "DEAD_BROKER_TIMEOUT_MS",
                defaults.dead_broker_timeout,
            )?,
            sweep_interval: env_duration_ms(
                "DEAD_BROKER_SWEEP_INTERVAL_MS",
                defaults.sweep_interval,
            )?,
            retry_interval: env_duration_ms(
                "NOTIFICATION_RETRY_INTERVAL_MS",
                defaults.retry_interval,
            )?,
            max_notification_retries: env_parse(
                "MAX_NOTIFICATION_RETRIES",
                defaults.max_notification_retries,
            )?,
            rpc: RpcConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        if self.dead_broker_timeout.is_zero() {
            errors.push("dead_broker_timeout must be greater than zero".to_string());
        }
        if self.sweep_interval.is_zero() {
            errors.push("sweep_interval must be greater than zero".to_string());
        }
        if self.retry_interval.is_zero() {
            errors.push("retry_interval must be greater than zero".to_string());
        }
        if self.max_notification_retries == 0 {
            errors.push("max_notification_retries must be at least 1".to_string());
        }
        self.rpc.collect_errors(&mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub coordinator: NodeAddress,
    /// Delay between readiness and the first registration.
    pub startup_grace: Duration,
    pub heartbeat_interval: Duration,
    pub refresh_interval: Duration,
    pub sync_interval: Duration,
    pub topic_sync_interval: Duration,
    /// Used only by `validate()`, to check heartbeats arrive well within it.
    pub dead_broker_timeout: Duration,
    pub rpc: RpcConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 9001,
            coordinator: NodeAddress::from_host_port(DEFAULT_HOST, DEFAULT_COORDINATOR_PORT),
            startup_grace: Duration::from_millis(DEFAULT_STARTUP_GRACE_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            refresh_interval: Duration::from_millis(DEFAULT_MEMBERSHIP_REFRESH_INTERVAL_MS),
            sync_interval: Duration::from_millis(DEFAULT_REPLICATION_SYNC_INTERVAL_MS),
            topic_sync_interval: Duration::from_millis(DEFAULT_BROKER_TOPIC_SYNC_INTERVAL_MS),
            dead_broker_timeout: Duration::from_millis(DEFAULT_DEAD_BROKER_TIMEOUT_MS),
            rpc: RpcConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Defaults for a broker listening on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress::from_host_port(&self.host, self.port)
    }

    /// Load from the environment.
    ///
    /// Adds `STARTUP_GRACE_MS`, `HEARTBEAT_INTERVAL_MS`, `REFRESH_INTERVAL_MS`,
    /// `SYNC_INTERVAL_MS` and `TOPIC_SYNC_INTERVAL_MS`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            host: env_string("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,
            coordinator: env_address("COORDINATOR_ADDR", &defaults.coordinator),
            startup_grace: env_duration_ms("STARTUP_GRACE_MS", defaults.startup_grace)?,
            heartbeat_interval: env_duration_ms(
                "HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            )?,
            refresh_interval: env_duration_ms("REFRESH_INTERVAL_MS", defaults.refresh_interval)?,
            sync_interval: env_duration_ms("SYNC_INTERVAL_MS", defaults.sync_interval)?,
            topic_sync_interval: env_duration_ms(
                "TOPIC_SYNC_INTERVAL_MS",
                defaults.topic_sync_interval,
            )?,
            dead_broker_timeout: env_duration_ms(
                "DEAD_BROKER_TIMEOUT_MS",
                defaults.dead_broker_timeout,
            )?,
            rpc: RpcConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        if self.address() == self.coordinator {
            errors.push(format!(
                "broker address {} must differ from the coordinator address",
                self.address()
            ));
        }
        for (name, interval) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("refresh_interval", self.refresh_interval),
            ("sync_interval", self.sync_interval),
            ("topic_sync_interval", self.topic_sync_interval),
        ] {
            if interval.is_zero() {
                errors.push(format!("{} must be greater than zero", name));
            }
        }
        if self.heartbeat_interval >= self.dead_broker_timeout {
            errors.push(format!(
                "heartbeat_interval ({:?}) must be less than dead_broker_timeout ({:?})",
                self.heartbeat_interval, self.dead_broker_timeout
            ));
        }
        self.rpc.collect_errors(&mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Publisher and subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub coordinator: NodeAddress,
    pub leader_refresh_interval: Duration,
    pub topic_sync_interval: Duration,
    /// Subscriber only.
    pub consume_interval: Duration,
    /// Publisher only: topics created at start-up.
    pub initial_topics: Vec<TopicName>,
    pub rpc: RpcConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PUBLISHER_PORT,
            coordinator: NodeAddress::from_host_port(DEFAULT_HOST, DEFAULT_COORDINATOR_PORT),
            leader_refresh_interval: Duration::from_millis(DEFAULT_LEADER_REFRESH_INTERVAL_MS),
            topic_sync_interval: Duration::from_millis(DEFAULT_PUBLISHER_TOPIC_SYNC_INTERVAL_MS),
            consume_interval: Duration::from_millis(DEFAULT_CONSUME_INTERVAL_MS),
            initial_topics: Vec::new(),
            rpc: RpcConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Publisher defaults.
    pub fn publisher(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Subscriber defaults. Subscribers sync the catalog less often.
    pub fn subscriber(port: u16) -> Self {
        Self {
            port,
            topic_sync_interval: Duration::from_millis(DEFAULT_SUBSCRIBER_TOPIC_SYNC_INTERVAL_MS),
            ..Self::default()
        }
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress::from_host_port(&self.host, self.port)
    }

    /// Load publisher settings from the environment over [`ClientConfig::publisher`].
    ///
    /// Adds `LEADER_REFRESH_INTERVAL_MS`, `TOPIC_SYNC_INTERVAL_MS`,
    /// `CONSUME_INTERVAL_MS` and `INITIAL_TOPICS` (comma separated).
    pub fn publisher_from_env() -> Result<Self> {
        Self::from_env_over(Self::publisher(DEFAULT_PUBLISHER_PORT))
    }

    /// Load subscriber settings from the environment over [`ClientConfig::subscriber`].
    ///
    /// Same variables as [`ClientConfig::publisher_from_env`]; unset ones keep
    /// the subscriber defaults.
    pub fn subscriber_from_env() -> Result<Self> {
        Self::from_env_over(Self::subscriber(DEFAULT_SUBSCRIBER_PORT))
    }

    fn from_env_over(defaults: Self) -> Result<Self> {
        let initial_topics = std::env::var("INITIAL_TOPICS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: env_string("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,
            coordinator: env_address("COORDINATOR_ADDR", &defaults.coordinator),
            leader_refresh_interval: env_duration_ms(
                "LEADER_REFRESH_INTERVAL_MS",
                defaults.leader_refresh_interval,
            )?,
            topic_sync_interval: env_duration_ms(
                "TOPIC_SYNC_INTERVAL_MS",
                defaults.topic_sync_interval,
            )?,
            consume_interval: env_duration_ms("CONSUME_INTERVAL_MS", defaults.consume_interval)?,
            initial_topics,
            rpc: RpcConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        for (name, interval) in [
            ("leader_refresh_interval", self.leader_refresh_interval),
            ("topic_sync_interval", self.topic_sync_interval),
            ("consume_interval", self.consume_interval),
        ] {
            if interval.is_zero() {
                errors.push(format!("{} must be greater than zero", name));
            }
        }
        if self.initial_topics.iter().any(|t| t.trim().is_empty()) {
            errors.push("initial_topics must not contain empty names".to_string());
        }
        self.rpc.collect_errors(&mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_address(key: &str, default: &NodeAddress) -> NodeAddress {
    std::env::var(key)
        .map(NodeAddress::from)
        .unwrap_or_else(|_| default.clone())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn env_duration_ms(key: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parse(key, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults_validate() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dead_broker_timeout, Duration::from_secs(10));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.retry_interval, Duration::from_secs(2));
        assert_eq!(config.max_notification_retries, 3);
    }

    #[test]
    fn test_broker_defaults_validate() {
        let config = BrokerConfig::with_port(9002);
        assert!(config.validate().is_ok());
        assert_eq!(config.address().as_str(), "127.0.0.1:9002");
        assert_eq!(config.startup_grace, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.refresh_interval, Duration::from_secs(3));
        assert_eq!(config.sync_interval, Duration::from_secs(1));
        assert_eq!(config.topic_sync_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_client_profiles() {
        let publisher = ClientConfig::publisher(7001);
        let subscriber = ClientConfig::subscriber(7002);
        assert_eq!(publisher.topic_sync_interval, Duration::from_secs(3));
        assert_eq!(subscriber.topic_sync_interval, Duration::from_secs(5));
        assert_eq!(publisher.leader_refresh_interval, Duration::from_secs(5));
        assert!(publisher.validate().is_ok());
        assert!(subscriber.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_error() {
        let config = BrokerConfig {
            port: 0,
            heartbeat_interval: Duration::from_secs(20),
            sync_interval: Duration::ZERO,
            ..BrokerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("port")));
        assert!(errors.iter().any(|e| e.contains("sync_interval")));
        assert!(errors.iter().any(|e| e.contains("dead_broker_timeout")));
    }

    #[test]
    fn test_broker_cannot_share_coordinator_address() {
        let config = BrokerConfig::with_port(DEFAULT_COORDINATOR_PORT);
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("coordinator")));
    }

    #[test]
    fn test_zero_retry_cap_rejected() {
        let config = CoordinatorConfig {
            max_notification_retries: 0,
            ..CoordinatorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tiny_frame_limit_rejected() {
        let config = ClientConfig {
            rpc: RpcConfig {
                max_frame_size: 16,
                ..RpcConfig::default()
            },
            ..ClientConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("max_frame_size")));
    }
}
