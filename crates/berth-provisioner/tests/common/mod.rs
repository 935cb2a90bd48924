//! Shared fixtures: a provisioner wired to in-process collaborators.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use berth_core::{App, BerthConfig};
use berth_engine::MemoryEngine;
use berth_exec::FakeExecutor;
use berth_provisioner::Provisioner;
use berth_router::MemoryRouter;
use berth_scheduler::{RoundRobinScheduler, Scheduler};
use berth_state::{Container, ContainerStatus, Node, StateStore};

pub const NODE1: &str = "http://127.0.0.1:2375";
pub const NODE2: &str = "http://127.0.0.2:2375";
pub const NODE3: &str = "http://127.0.0.3:2375";

pub struct Harness {
    pub prov: Arc<Provisioner>,
    pub store: StateStore,
    pub engine: MemoryEngine,
    pub executor: FakeExecutor,
    pub router: MemoryRouter,
}

/// Provisioner over the given `(node id, engine endpoint)` pairs.
pub fn harness_with_nodes(nodes: &[(&str, &str)], executor: FakeExecutor) -> Harness {
    let store = StateStore::open_in_memory().unwrap();
    let scheduler = RoundRobinScheduler::new(store.clone());
    for (id, address) in nodes {
        scheduler.add_node(Node::new(*id, *address)).unwrap();
    }
    let engine = MemoryEngine::new();
    let router = MemoryRouter::new();
    let prov = Provisioner::new(
        BerthConfig::default(),
        store.clone(),
        Arc::new(engine.clone()),
        Arc::new(executor.clone()),
        Arc::new(router.clone()),
        Arc::new(scheduler),
    );
    Harness {
        prov: Arc::new(prov),
        store,
        engine,
        executor,
        router,
    }
}

/// Single-node provisioner with a well-behaved executor.
pub fn harness() -> Harness {
    harness_with_nodes(&[("node-1", NODE1)], FakeExecutor::new())
}

pub fn app(name: &str) -> App {
    App::new(name, "python")
}

impl Harness {
    /// Provision and deploy `version` of `name`, returning the deploy output.
    pub async fn deployed(&self, name: &str, version: &str) -> String {
        let app = app(name);
        self.prov.provision(&app).unwrap();
        let mut out = Vec::new();
        self.prov.deploy(&app, version, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    pub fn containers(&self, app: &str) -> Vec<Container> {
        self.store.list_containers(app).unwrap()
    }

    /// Store a started container without going through the engine.
    pub fn insert_started(&self, id: &str, app: &str, ip: &str, host_port: u16) -> Container {
        let container = Container {
            id: id.to_string(),
            app_name: app.to_string(),
            kind: "python".to_string(),
            ip: Some(ip.to_string()),
            host_port: Some(host_port),
            version: "v1".to_string(),
            status: ContainerStatus::Started,
            host: "node-1".to_string(),
        };
        self.store.insert_container(&container).unwrap();
        container
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
