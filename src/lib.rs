//! # Herald
//! A small coordinator-driven publish/subscribe cluster.
//!
//! Four node roles cooperate over a length-prefixed RPC:
//!
//! - **Coordinator**: tracks broker membership through heartbeats, removes
//!   silent brokers and elects the leader (highest port wins). The leader is
//!   pushed to every broker; failed pushes are retried a bounded number of times.
//! - **Broker**: keeps topic, message and subscriber state. Followers pull the
//!   leader's full state every second and replace their own with it.
//! - **Publisher** and **Subscriber**: thin clients that poll for the leader
//!   and read and write topics through the external message log.
//!
//! Every RPC carries a Lamport timestamp; see [`clock::LogicalClock`].
//!
//! ## Running a node
//!
//! ```rust,no_run
//! use herald::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> herald::Result<()> {
//!     let config = CoordinatorConfig::from_env()?;
//!     let transport = Arc::new(TcpTransport::new(config.rpc.clone()));
//!     let coordinator = Arc::new(Coordinator::new(config.clone(), transport));
//!
//!     let server = RpcServer::bind(coordinator.address().as_str(), coordinator.clone(), config.rpc.clone()).await?;
//!     let handle = server.spawn()?;
//!     let mut tasks = coordinator.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     tasks.shutdown_all().await;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! See `demos/local_cluster.rs` for a whole cluster in one process.

#![forbid(unsafe_code)]

pub mod broker;
pub mod client;
pub mod clock;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod metrics;
pub mod rpc;
pub mod tasks;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utilities"))]
pub mod mock_transport;

pub use error::{Error, Result};

pub mod prelude {
    //! Everything needed to run a node.
    pub use crate::broker::{Broker, BrokerPhase, BrokerState};
    pub use crate::client::{LeaderView, Publisher, Subscriber};
    pub use crate::clock::LogicalClock;
    pub use crate::config::{BrokerConfig, ClientConfig, CoordinatorConfig, RpcConfig};
    pub use crate::coordinator::Coordinator;
    pub use crate::error::{Error, Result};
    pub use crate::log::{InMemoryLog, MessageLog};
    pub use crate::rpc::{RpcClient, RpcHandler, RpcServer, ServerHandle, TcpTransport, Transport};
    pub use crate::tasks::{BackgroundTaskRegistry, TaskStatus};
    pub use crate::types::{BrokerSnapshot, ClusterView, LeaderTerm, MessageBody, NodeAddress, TopicName};
}
