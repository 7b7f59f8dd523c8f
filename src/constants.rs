//! Centralized timing and protocol constants.
//!
//! Every periodic task and every timeout in the cluster has its default here.
//! The values are the defaults of the per-role configs in [`crate::config`].
//!
//! # Categories
//!
//! - **Coordinator Constants**: failure detection, election notification retry
//! - **Broker Constants**: startup grace, heartbeat, refresh and replication cadence
//! - **Client Constants**: leader polling and topic catalog cadence
//! - **Network Constants**: RPC timeouts and frame limits

// =============================================================================
// Coordinator Constants
// =============================================================================

/// A broker with no heartbeat for longer than this is removed at the next sweep.
pub const DEFAULT_DEAD_BROKER_TIMEOUT_MS: u64 = 10_000;

/// How often the coordinator sweeps for dead brokers.
pub const DEFAULT_DEAD_BROKER_SWEEP_INTERVAL_MS: u64 = 5_000;

/// How often failed leader-change pushes are retried.
pub const DEFAULT_NOTIFICATION_RETRY_INTERVAL_MS: u64 = 2_000;

/// Failed retries after which a pending leader-change push is abandoned.
pub const MAX_NOTIFICATION_RETRIES: u8 = 3;

// =============================================================================
// Broker Constants
// =============================================================================

/// Delay between readiness and the first registration, so the listener is up
/// before the broker advertises itself.
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 3_000;

/// Broker heartbeat cadence.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Broker leader/membership refresh cadence.
pub const DEFAULT_MEMBERSHIP_REFRESH_INTERVAL_MS: u64 = 3_000;

/// Follower replication pull cadence.
pub const DEFAULT_REPLICATION_SYNC_INTERVAL_MS: u64 = 1_000;

/// Broker topic catalog sync against the log.
pub const DEFAULT_BROKER_TOPIC_SYNC_INTERVAL_MS: u64 = 5_000;

// =============================================================================
// Client Constants
// =============================================================================

/// Publisher/subscriber leader poll cadence.
pub const DEFAULT_LEADER_REFRESH_INTERVAL_MS: u64 = 5_000;

/// Publisher topic catalog sync cadence.
pub const DEFAULT_PUBLISHER_TOPIC_SYNC_INTERVAL_MS: u64 = 3_000;

/// Subscriber topic catalog sync cadence.
pub const DEFAULT_SUBSCRIBER_TOPIC_SYNC_INTERVAL_MS: u64 = 5_000;

/// Subscriber consume poll cadence.
pub const DEFAULT_CONSUME_INTERVAL_MS: u64 = 500;

/// Prefix of internal/system topics hidden from every catalog.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

// =============================================================================
// Network Constants
// =============================================================================

/// Timeout for establishing an outbound RPC connection.
pub const DEFAULT_RPC_CONNECT_TIMEOUT_MS: u64 = 1_000;

/// Timeout for a full request/response exchange.
pub const DEFAULT_RPC_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Maximum encoded frame size (16 MB). Replication snapshots are the largest frames.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default bind host when none is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default coordinator port.
pub const DEFAULT_COORDINATOR_PORT: u16 = 8080;

/// Default publisher and subscriber ports.
pub const DEFAULT_PUBLISHER_PORT: u16 = 7001;
pub const DEFAULT_SUBSCRIBER_PORT: u16 = 7002;
