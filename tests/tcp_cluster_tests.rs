//! A real cluster on localhost TCP with shortened intervals.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use herald::broker::Broker;
use herald::client::{Publisher, Subscriber};
use herald::clock::LogicalClock;
use herald::config::{BrokerConfig, ClientConfig, CoordinatorConfig, RpcConfig};
use herald::coordinator::Coordinator;
use herald::log::InMemoryLog;
use herald::rpc::{RpcClient, RpcHandler, RpcServer, ServerHandle, TcpTransport};
use herald::types::NodeAddress;
use tokio::net::TcpListener;

fn rpc_config() -> RpcConfig {
    RpcConfig {
        connect_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
        ..RpcConfig::default()
    }
}

fn transport() -> Arc<TcpTransport> {
    Arc::new(TcpTransport::new(rpc_config()))
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn serve<H: RpcHandler>(listener: TcpListener, handler: Arc<H>) -> ServerHandle {
    RpcServer::from_listener(listener, handler, rpc_config())
        .spawn()
        .unwrap()
}

/// Poll `check` until it holds or `deadline` passes.
async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let until = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < until {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check().await
}

async fn start_broker(
    coordinator: &NodeAddress,
    log: Arc<InMemoryLog>,
) -> (Arc<Broker>, ServerHandle) {
    let (listener, port) = listener().await;
    let config = BrokerConfig {
        coordinator: coordinator.clone(),
        startup_grace: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(100),
        refresh_interval: Duration::from_millis(200),
        sync_interval: Duration::from_millis(100),
        topic_sync_interval: Duration::from_millis(300),
        rpc: rpc_config(),
        ..BrokerConfig::with_port(port)
    };
    let broker = Arc::new(Broker::new(config, transport(), log));
    let server = serve(listener, broker.clone());
    (broker, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cluster_elects_and_replicates_over_tcp() {
    let log = Arc::new(InMemoryLog::new());

    let (listener, port) = listener().await;
    let coordinator_config = CoordinatorConfig {
        port,
        sweep_interval: Duration::from_millis(200),
        dead_broker_timeout: Duration::from_millis(800),
        retry_interval: Duration::from_millis(100),
        rpc: rpc_config(),
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(Coordinator::new(coordinator_config, transport()));
    let coordinator_server = serve(listener, coordinator.clone());
    let mut coordinator_tasks = coordinator.start();

    let mut nodes = Vec::new();
    for _ in 0..2 {
        let (broker, server) = start_broker(coordinator.address(), log.clone()).await;
        let tasks = broker.start();
        nodes.push((broker, server, tasks));
    }

    // Highest port wins
    let leader_index = if nodes[0].0.address().port() > nodes[1].0.address().port() { 0 } else { 1 };
    let leader = nodes[leader_index].0.clone();
    let follower = nodes[1 - leader_index].0.clone();
    let (leader_ref, follower_ref, coordinator_ref) = (&leader, &follower, &coordinator);

    assert!(
        eventually(Duration::from_secs(5), || async move {
            follower_ref.leader().await.as_ref() == Some(leader_ref.address())
                && leader_ref.is_leader().await
                && coordinator_ref.brokers().len() == 2
        })
        .await,
        "cluster never agreed on {}",
        leader.address()
    );

    let client = RpcClient::new(transport(), Arc::new(LogicalClock::new()));
    client.add_message(leader.address(), "news", "over-the-wire").await.unwrap();

    assert!(
        eventually(Duration::from_secs(3), || async move {
            follower_ref.data().await == leader_ref.data().await
        })
        .await
    );
    assert_eq!(follower.state().messages("news").await, vec!["over-the-wire"]);

    // The leader goes away; the follower takes over
    let (_, leader_server, mut leader_tasks) = nodes.remove(leader_index);
    leader_tasks.shutdown_all().await;
    leader_server.shutdown().await;

    assert!(
        eventually(Duration::from_secs(5), || async move {
            coordinator_ref.leader().await.as_ref() == Some(follower_ref.address())
                && follower_ref.is_leader().await
        })
        .await
    );

    for (_, server, mut tasks) in nodes {
        tasks.shutdown_all().await;
        server.shutdown().await;
    }
    coordinator_tasks.shutdown_all().await;
    coordinator_server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publisher_and_subscriber_over_tcp() {
    let log = Arc::new(InMemoryLog::new());

    let (pub_listener, pub_port) = listener().await;
    let publisher = Arc::new(Publisher::new(
        ClientConfig {
            topic_sync_interval: Duration::from_millis(100),
            rpc: rpc_config(),
            ..ClientConfig::publisher(pub_port)
        },
        transport(),
        log.clone(),
    ));
    let pub_server = serve(pub_listener, publisher.clone());

    let (sub_listener, sub_port) = listener().await;
    let subscriber = Arc::new(Subscriber::new(
        ClientConfig {
            topic_sync_interval: Duration::from_millis(100),
            consume_interval: Duration::from_millis(50),
            rpc: rpc_config(),
            ..ClientConfig::subscriber(sub_port)
        },
        transport(),
        log.clone(),
    ));
    let sub_server = serve(sub_listener, subscriber.clone());

    let mut pub_tasks = publisher.start().await;
    let mut sub_tasks = subscriber.start();

    let client = RpcClient::new(transport(), Arc::new(LogicalClock::new()));
    client.publish(publisher.address(), "news", "hello").await.unwrap();

    let sub = &subscriber;
    assert!(
        eventually(Duration::from_secs(3), || async move {
            sub.messages()
                .await
                .get("news")
                .is_some_and(|m| m.as_slice() == ["hello"])
        })
        .await
    );
    assert_eq!(
        client.subscribed_topics(subscriber.address()).await.unwrap(),
        vec!["news"]
    );
    // No coordinator is running, so neither client knows a leader
    assert_eq!(publisher.leader().await, None);

    pub_tasks.shutdown_all().await;
    sub_tasks.shutdown_all().await;
    pub_server.shutdown().await;
    sub_server.shutdown().await;
}
