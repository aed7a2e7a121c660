//! Dispatcher behavior at cluster scale and under concurrent membership changes

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabletd::common::StaticResolver;
use tabletd::coordinator::agent_client::{AgentClient, TransportError};
use tabletd::coordinator::dispatcher::{TaskDispatcher, TaskError};
use tabletd::coordinator::{NodeAddress, NodeRegistry, NodeRole};

/// Hosts listed in `hanging` never answer; everyone else echoes the request.
struct SelectiveAgent {
    hanging: HashSet<String>,
    seen: Mutex<Vec<NodeAddress>>,
}

impl SelectiveAgent {
    fn new(hanging: impl IntoIterator<Item = String>) -> Self {
        Self {
            hanging: hanging.into_iter().collect(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl AgentClient for SelectiveAgent {
    type Request = u64;
    type Response = u64;

    fn call<'a>(
        &'a self,
        addr: &'a NodeAddress,
        request: &'a u64,
    ) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move {
            self.seen.lock().push(addr.clone());
            if self.hanging.contains(&addr.host) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(*request)
        })
    }
}

#[tokio::test]
async fn test_unreachable_nodes_do_not_delay_siblings() {
    let registry = Arc::new(NodeRegistry::default());
    let hosts: Vec<String> = (1..=100).map(|i| format!("10.0.0.{}:9060", i)).collect();
    let ids = registry.add_nodes(NodeRole::Backend, &hosts).unwrap();

    let hanging: Vec<String> = ids[..5]
        .iter()
        .map(|id| registry.resolve(*id).unwrap().host)
        .collect();
    let agent = Arc::new(SelectiveAgent::new(hanging));
    let dispatcher = TaskDispatcher::new(agent, registry.clone(), 32);

    let tasks = ids.iter().map(|id| (*id, id.0)).collect();
    let started = Instant::now();
    let results = dispatcher
        .dispatch_until(
            tasks,
            Duration::from_millis(300),
            1,
            Some(tokio::time::Instant::now() + Duration::from_secs(5)),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(results.len(), 100);
    let ok = results.values().filter(|r| r.is_ok()).count();
    let failed: Vec<_> = results
        .iter()
        .filter(|(_, r)| r.is_err())
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(ok, 95);
    assert_eq!(failed.len(), 5);
    for id in &failed {
        assert!(ids[..5].contains(id));
        assert!(results[id].as_ref().unwrap_err().is_timeout());
    }
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_batch_deadline_abandons_hanging_nodes() {
    let registry = Arc::new(NodeRegistry::default());
    let ids = registry
        .add_nodes(NodeRole::Backend, &["10.1.0.1:9060", "10.1.0.2:9060"])
        .unwrap();
    let agent = Arc::new(SelectiveAgent::new(["10.1.0.2".to_string()]));
    let dispatcher = TaskDispatcher::new(agent, registry, 8);

    let started = Instant::now();
    let results = dispatcher
        .dispatch_until(
            ids.iter().map(|id| (*id, 1)).collect(),
            Duration::from_secs(30),
            0,
            Some(tokio::time::Instant::now() + Duration::from_millis(200)),
        )
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(results[&ids[0]], Ok(1));
    assert_eq!(results[&ids[1]], Err(TaskError::DeadlineExceeded));
}

#[tokio::test]
async fn test_dropped_node_fails_as_gone() {
    let registry = Arc::new(NodeRegistry::default());
    let ids = registry
        .add_nodes(NodeRole::Backend, &["10.2.0.1:9060", "10.2.0.2:9060"])
        .unwrap();
    registry.drop_node(ids[1]).unwrap();

    let dispatcher = TaskDispatcher::new(Arc::new(SelectiveAgent::new([])), registry, 8);
    let results = dispatcher
        .dispatch(ids.iter().map(|id| (*id, 7)).collect(), Duration::from_secs(1), 0)
        .await;
    assert_eq!(results[&ids[0]], Ok(7));
    assert_eq!(results[&ids[1]], Err(TaskError::NodeGone { node_id: ids[1] }));
}

#[tokio::test]
async fn test_migration_during_dispatch_never_tears_address() {
    let resolver = Arc::new(StaticResolver::new(["host-a", "host-b"]));
    let registry = Arc::new(NodeRegistry::new(resolver));
    let ids = registry
        .add_nodes(NodeRole::Backend, &["host-a:9060"])
        .unwrap();
    let id = ids[0];

    let agent = Arc::new(SelectiveAgent::new([]));
    let dispatcher = Arc::new(TaskDispatcher::new(agent.clone(), registry.clone(), 16));

    let stop = Arc::new(AtomicBool::new(false));
    let migrator = {
        let registry = registry.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut flip = false;
            while !stop.load(Ordering::Relaxed) {
                let dest = if flip { "host-a" } else { "host-b" };
                registry.migrate_node_host(id, dest).unwrap();
                flip = !flip;
                tokio::task::yield_now().await;
            }
        })
    };

    for round in 0..50 {
        let results = dispatcher
            .dispatch(vec![(id, round)], Duration::from_secs(1), 0)
            .await;
        assert_eq!(results[&id], Ok(round));
    }
    stop.store(true, Ordering::Relaxed);
    migrator.await.unwrap();

    let seen = agent.seen.lock();
    assert_eq!(seen.len(), 50);
    for addr in seen.iter() {
        assert!(addr.host == "host-a" || addr.host == "host-b", "{}", addr);
        assert_eq!(addr.port, 9060);
    }
}
