//! A whole herald cluster in one process, over localhost TCP.
//!
//! Starts a coordinator on :8080, brokers on :9001-:9003, a publisher on
//! :7001 and a subscriber on :7002, all sharing one in-memory log. The
//! publisher writes a message every second. After 15 seconds the leader
//! broker is stopped so the failover shows up in the logs.
//!
//! ```bash
//! cargo run --example local_cluster
//! RUST_LOG=herald=debug cargo run --example local_cluster
//! ```

use std::sync::Arc;
use std::time::Duration;

use herald::prelude::*;
use herald::telemetry::{LogFormat, init_logging};
use tracing::{info, warn};

struct Running {
    name: String,
    server: ServerHandle,
    tasks: BackgroundTaskRegistry,
}

impl Running {
    async fn stop(mut self) {
        self.tasks.shutdown_all().await;
        self.server.shutdown().await;
        info!(node = %self.name, "Stopped");
    }
}

async fn serve<H: RpcHandler>(
    address: &NodeAddress,
    handler: Arc<H>,
    rpc: &RpcConfig,
) -> Result<ServerHandle> {
    RpcServer::bind(address.as_str(), handler, rpc.clone()).await?.spawn()
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    init_logging(LogFormat::from_env()).map_err(|e| -> Box<dyn std::error::Error> { e })?;
    herald::metrics::init_metrics();

    let rpc = RpcConfig::default();
    let log = Arc::new(InMemoryLog::new());
    let transport = || Arc::new(TcpTransport::new(rpc.clone()));

    let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default(), transport()));
    let coordinator_node = Running {
        name: coordinator.address().to_string(),
        server: serve(coordinator.address(), coordinator.clone(), &rpc).await?,
        tasks: coordinator.start(),
    };

    let mut brokers = Vec::new();
    for port in [9001, 9002, 9003] {
        let broker = Arc::new(Broker::new(
            BrokerConfig::with_port(port),
            transport(),
            log.clone(),
        ));
        let running = Running {
            name: broker.address().to_string(),
            server: serve(broker.address(), broker.clone(), &rpc).await?,
            tasks: broker.start(),
        };
        brokers.push((broker, Some(running)));
    }

    let publisher = Arc::new(Publisher::new(
        ClientConfig {
            initial_topics: vec!["news".to_string()],
            ..ClientConfig::publisher(7001)
        },
        transport(),
        log.clone(),
    ));
    let publisher_node = Running {
        name: publisher.address().to_string(),
        server: serve(publisher.address(), publisher.clone(), &rpc).await?,
        tasks: publisher.start().await,
    };

    let subscriber = Arc::new(Subscriber::new(ClientConfig::subscriber(7002), transport(), log.clone()));
    let subscriber_node = Running {
        name: subscriber.address().to_string(),
        server: serve(subscriber.address(), subscriber.clone(), &rpc).await?,
        tasks: subscriber.start(),
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut sent = 0u64;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sent += 1;
                if let Err(e) = publisher.publish("news", &format!("update #{}", sent)).await {
                    warn!(error = %e, "Publish failed");
                }

                if sent % 5 == 0 {
                    let received = subscriber.messages().await.get("news").map_or(0, Vec::len);
                    info!(
                        leader = ?coordinator.leader().await,
                        publisher_view = ?publisher.leader().await,
                        brokers = coordinator.brokers().len(),
                        sent,
                        received,
                        "Cluster status"
                    );
                }

                if sent == 15 {
                    if let Some(leader) = coordinator.leader().await {
                        if let Some((_, slot)) = brokers.iter_mut().find(|(b, _)| *b.address() == leader) {
                            if let Some(running) = slot.take() {
                                warn!(leader = %leader, "Stopping the leader broker");
                                running.stop().await;
                            }
                        }
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    for (_, slot) in brokers {
        if let Some(running) = slot {
            running.stop().await;
        }
    }
    subscriber_node.stop().await;
    publisher_node.stop().await;
    coordinator_node.stop().await;
    Ok(())
}
