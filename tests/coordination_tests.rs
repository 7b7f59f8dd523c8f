//! End-to-end coordination scenarios on the in-process transport.
//!
//! Every node runs its real background tasks; time is paused so the
//! multi-second sweeps and grace periods run instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald::broker::Broker;
use herald::clock::LogicalClock;
use herald::config::{BrokerConfig, CoordinatorConfig};
use herald::coordinator::Coordinator;
use herald::log::InMemoryLog;
use herald::mock_transport::MockTransport;
use herald::error::Result;
use herald::rpc::{RequestBody, ResponseBody, RpcClient, RpcHandler};
use herald::tasks::BackgroundTaskRegistry;
use herald::types::NodeAddress;

struct Harness {
    mock: MockTransport,
    log: Arc<InMemoryLog>,
    coordinator: Arc<Coordinator>,
    coordinator_tasks: BackgroundTaskRegistry,
}

impl Harness {
    fn new() -> Self {
        let mock = MockTransport::new();
        let coordinator = Arc::new(Coordinator::new(
            CoordinatorConfig::default(),
            Arc::new(mock.clone()),
        ));
        mock.register(coordinator.address().clone(), coordinator.clone());
        let coordinator_tasks = coordinator.start();
        Self {
            mock,
            log: Arc::new(InMemoryLog::new()),
            coordinator,
            coordinator_tasks,
        }
    }

    fn broker(&self, port: u16) -> Arc<Broker> {
        let broker = Arc::new(Broker::new(
            BrokerConfig::with_port(port),
            Arc::new(self.mock.clone()),
            self.log.clone(),
        ));
        self.mock.register(broker.address().clone(), broker.clone());
        broker
    }

    fn client(&self) -> RpcClient {
        RpcClient::new(Arc::new(self.mock.clone()), Arc::new(LogicalClock::new()))
    }

    async fn shutdown(mut self) {
        self.coordinator_tasks.shutdown_all().await;
    }
}

fn addr(port: u16) -> NodeAddress {
    NodeAddress::from_host_port("127.0.0.1", port)
}

fn leader_pushes(mock: &MockTransport, target: &NodeAddress) -> Vec<NodeAddress> {
    mock.requests_to(target)
        .into_iter()
        .filter_map(|body| match body {
            RequestBody::LeaderChanged { leader, .. } => Some(leader),
            _ => None,
        })
        .collect()
}

/// Delivers leader changes naming `delayed` to the wrapped broker late.
struct SlowLink {
    broker: Arc<Broker>,
    delayed: NodeAddress,
    delay: Duration,
}

#[async_trait]
impl RpcHandler for SlowLink {
    fn clock(&self) -> &LogicalClock {
        self.broker.clock()
    }

    async fn handle(&self, request: RequestBody) -> Result<ResponseBody> {
        if let RequestBody::LeaderChanged { leader, .. } = &request {
            if *leader == self.delayed {
                tokio::time::sleep(self.delay).await;
            }
        }
        self.broker.handle(request).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_join_join_then_leader_dies() {
    let h = Harness::new();

    let b1 = h.broker(9001);
    let b2 = h.broker(9002);
    let mut t1 = b1.start();
    let mut t2 = b2.start();

    // Grace period, then registration
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.coordinator.leader().await, Some(addr(9002)));
    assert_eq!(b1.leader().await, Some(addr(9002)));
    assert!(b2.is_leader().await);

    let b3 = h.broker(9003);
    let mut t3 = b3.start();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(h.coordinator.leader().await, Some(addr(9003)));
    assert_eq!(b1.leader().await, Some(addr(9003)));
    assert_eq!(b2.leader().await, Some(addr(9003)));

    // :9003 goes silent
    t3.shutdown_all().await;
    h.mock.mark_down(b3.address());
    h.mock.clear_requests();

    tokio::time::sleep(Duration::from_secs(14)).await;

    assert_eq!(h.coordinator.brokers(), vec![addr(9001), addr(9002)]);
    assert_eq!(h.coordinator.leader().await, Some(addr(9002)));
    assert!(leader_pushes(&h.mock, &addr(9001)).contains(&addr(9002)));
    assert!(leader_pushes(&h.mock, &addr(9002)).contains(&addr(9002)));
    assert!(leader_pushes(&h.mock, &addr(9003)).is_empty());
    assert_eq!(b1.leader().await, Some(addr(9002)));
    assert!(b2.is_leader().await);

    t1.shutdown_all().await;
    t2.shutdown_all().await;
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_overtaken_leader_push_does_not_win() {
    let h = Harness::new();
    let b1 = h.broker(9001);
    let b2 = h.broker(9002);
    let b3 = h.broker(9003);
    h.mock.register(
        b1.address().clone(),
        Arc::new(SlowLink {
            broker: b1.clone(),
            delayed: b2.address().clone(),
            delay: Duration::from_millis(50),
        }),
    );

    h.coordinator.register(b1.address()).await;
    tokio::join!(h.coordinator.register(b2.address()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.coordinator.register(b3.address()).await;
    });

    // Every election pushed to :9001; the push naming :9002 arrived last
    assert_eq!(
        leader_pushes(&h.mock, b1.address()),
        vec![addr(9001), addr(9002), addr(9003)]
    );
    assert_eq!(h.coordinator.leader().await, Some(addr(9003)));
    assert_eq!(b1.leader().await, Some(addr(9003)));

    // A later refresh agrees with the push
    b1.refresh_leader_and_membership().await.unwrap();
    assert_eq!(b1.leader().await, Some(addr(9003)));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_gets_one_push_and_three_retries() {
    let h = Harness::new();
    let ghost = addr(9009);

    h.coordinator.register(&ghost).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(h.mock.call_count_of(&ghost, "leader_changed"), 4);
    assert_eq!(h.coordinator.notifier().pending_count(), 0);
    // Never heartbeated, so the sweep removed it too
    assert!(h.coordinator.brokers().is_empty());
    assert_eq!(h.coordinator.leader().await, None);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_push_recovers_after_transient_outage() {
    let h = Harness::new();
    let b1 = h.broker(9001);
    h.mock.mark_down(b1.address());

    h.coordinator.register(b1.address()).await;
    assert_eq!(h.coordinator.notifier().retry_count(b1.address()), Some(0));

    // Retries fail while down, the first one after recovery lands
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    h.mock.mark_up(b1.address());
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.coordinator.notifier().pending_count(), 0);
    assert_eq!(b1.leader().await, Some(addr(9001)));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_followers_converge_on_leader_state() {
    let h = Harness::new();
    let brokers: Vec<_> = [9001, 9002, 9003].into_iter().map(|p| h.broker(p)).collect();
    let mut tasks: Vec<_> = brokers.iter().map(|b| b.start()).collect();
    tokio::time::sleep(Duration::from_secs(4)).await;

    let client = h.client();
    let leader = addr(9003);
    let reader = addr(7002);
    client.add_topic(&leader, "news").await.unwrap();
    client.add_message(&leader, "news", "first").await.unwrap();
    client.add_message(&leader, "orders", "o-1").await.unwrap();
    client.add_subscriber(&leader, "news", &reader).await.unwrap();

    // One sync interval plus a round trip
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let expected = brokers[2].data().await;
    for follower in &brokers[..2] {
        assert_eq!(follower.data().await, expected);
    }
    assert_eq!(
        client.messages(&addr(9001), "news", &reader).await.unwrap(),
        vec!["first"]
    );

    for t in &mut tasks {
        t.shutdown_all().await;
    }
    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_follower_write_lost_on_next_sync() {
    let h = Harness::new();
    let b1 = h.broker(9001);
    let b2 = h.broker(9002);
    let mut t1 = b1.start();
    let mut t2 = b2.start();
    tokio::time::sleep(Duration::from_secs(4)).await;

    b1.add_subscriber("news", &addr(7002)).await;
    assert!(b1.is_subscriber_subscribed_to_topic(&addr(7002), "news").await);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(!b1.is_subscriber_subscribed_to_topic(&addr(7002), "news").await);

    t1.shutdown_all().await;
    t2.shutdown_all().await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_subscriber_list_is_idempotent_over_rpc() {
    let h = Harness::new();
    let broker = h.broker(9001);
    let client = h.client();
    let reader = addr(7002);

    client.add_subscriber(broker.address(), "news", &reader).await.unwrap();
    client.add_subscriber(broker.address(), "news", &reader).await.unwrap();
    let subscribers = client.subscribers(broker.address()).await.unwrap();
    assert_eq!(subscribers["news"], vec![reader.clone()]);

    client.remove_subscriber(broker.address(), "news", &reader).await.unwrap();
    assert!(!client
        .subscribers(broker.address())
        .await
        .unwrap()
        .contains_key("news"));

    h.shutdown().await;
}

#[tokio::test]
async fn test_receiver_clock_passes_sender_stamp() {
    let h = Harness::new();
    let clock = Arc::new(LogicalClock::starting_at(100));
    let client = RpcClient::new(Arc::new(h.mock.clone()), clock.clone());

    client.ping(h.coordinator.address()).await.unwrap();
    let coordinator_now = h.coordinator.clock().read();
    assert!(coordinator_now > 101);
    assert!(clock.read() > coordinator_now);

    // A node behind the coordinator catches up past it
    let broker = h.broker(9001);
    h.coordinator.register(broker.address()).await;
    assert!(broker.clock().read() > coordinator_now);

    h.shutdown().await;
}
