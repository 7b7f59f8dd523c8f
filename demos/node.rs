//! Run one herald node over TCP.
//!
//! The role is the first argument (or `ROLE`); everything else comes from the
//! environment, see [`herald::config`].
//!
//! ## Running
//!
//! In separate terminals:
//! ```bash
//! cargo run --example node coordinator
//! PORT=9001 cargo run --example node broker
//! PORT=9002 cargo run --example node broker
//! PORT=7001 INITIAL_TOPICS=news cargo run --example node publisher
//! PORT=7002 cargo run --example node subscriber
//! ```
//!
//! Each process owns a separate in-memory log, so publishers and subscribers
//! only see each other's messages in `local_cluster`.
//!
//! With JSON logging:
//! ```bash
//! LOG_FORMAT=json RUST_LOG=herald=debug cargo run --example node coordinator
//! ```

use std::sync::Arc;

use herald::metrics;
use herald::prelude::*;
use herald::telemetry::{LogFormat, init_logging};
use tracing::{error, info};

fn invalid(role: &str, errors: Vec<String>) -> Box<dyn std::error::Error> {
    for e in &errors {
        error!(role, "{}", e);
    }
    format!("invalid {} configuration: {}", role, errors.join("; ")).into()
}

async fn serve<H: RpcHandler>(
    address: &NodeAddress,
    handler: Arc<H>,
    rpc: RpcConfig,
) -> Result<ServerHandle> {
    RpcServer::bind(address.as_str(), handler, rpc).await?.spawn()
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::from_env()).map_err(|e| -> Box<dyn std::error::Error> { e })?;
    metrics::init_metrics();

    let role = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROLE").ok())
        .unwrap_or_else(|| "coordinator".to_string());
    let log: Arc<dyn MessageLog> = Arc::new(InMemoryLog::new());

    let (server, mut tasks) = match role.as_str() {
        "coordinator" => {
            let config = CoordinatorConfig::from_env()?;
            config.validate().map_err(|e| invalid(&role, e))?;
            let node = Arc::new(Coordinator::new(
                config.clone(),
                Arc::new(TcpTransport::new(config.rpc.clone())),
            ));
            let server = serve(node.address(), node.clone(), config.rpc).await?;
            (server, node.start())
        }
        "broker" => {
            let config = BrokerConfig::from_env()?;
            config.validate().map_err(|e| invalid(&role, e))?;
            let node = Arc::new(Broker::new(
                config.clone(),
                Arc::new(TcpTransport::new(config.rpc.clone())),
                log,
            ));
            let server = serve(node.address(), node.clone(), config.rpc).await?;
            (server, node.start())
        }
        "publisher" => {
            let config = ClientConfig::publisher_from_env()?;
            config.validate().map_err(|e| invalid(&role, e))?;
            let node = Arc::new(Publisher::new(
                config.clone(),
                Arc::new(TcpTransport::new(config.rpc.clone())),
                log,
            ));
            let server = serve(node.address(), node.clone(), config.rpc).await?;
            (server, node.start().await)
        }
        "subscriber" => {
            let config = ClientConfig::subscriber_from_env()?;
            config.validate().map_err(|e| invalid(&role, e))?;
            let node = Arc::new(Subscriber::new(
                config.clone(),
                Arc::new(TcpTransport::new(config.rpc.clone())),
                log,
            ));
            let server = serve(node.address(), node.clone(), config.rpc).await?;
            (server, node.start())
        }
        other => return Err(format!("unknown role {:?}", other).into()),
    };

    info!(role = %role, addr = %server.local_addr(), "Node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!(role = %role, "Shutting down");
    tasks.shutdown_all().await;
    server.shutdown().await;

    if let Ok(text) = metrics::encode_metrics() {
        tracing::debug!("{}", text);
    }
    Ok(())
}
