//! Deterministic in-process container engine.
//!
//! Container ids, addresses and host ports are handed out from counters,
//! so two runs of the same test see the same values. Individual operations
//! can be made to fail and endpoints made unreachable.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::{APP_LABEL, ContainerEngine, ContainerInfo, ContainerSpec, EngineFuture, EngineState};

/// First host port handed out by the engine.
const FIRST_HOST_PORT: u16 = 49153;

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Pull,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    List,
    RemoveImage,
}

#[derive(Debug, Clone)]
struct MemContainer {
    image: String,
    labels: HashMap<String, String>,
    port: u16,
    state: EngineState,
    ip: Option<String>,
    host_port: Option<u16>,
}

impl MemContainer {
    fn info(&self, id: &str) -> ContainerInfo {
        let mut ports = HashMap::new();
        if let Some(host_port) = self.host_port {
            ports.insert(self.port, host_port);
        }
        ContainerInfo {
            id: id.to_string(),
            image: self.image.clone(),
            app_name: self.labels.get(APP_LABEL).cloned(),
            state: self.state,
            ip: self.ip.clone(),
            ports,
        }
    }
}

#[derive(Default)]
struct Host {
    containers: BTreeMap<String, MemContainer>,
    images: BTreeSet<String>,
}

#[derive(Default)]
struct MemoryState {
    hosts: HashMap<String, Host>,
    next_id: u64,
    next_ip: u32,
    next_port: u16,
    failing: HashSet<EngineOp>,
    unreachable: HashSet<String>,
}

impl MemoryState {
    fn check(&self, endpoint: &str, op: EngineOp) -> EngineResult<()> {
        if self.unreachable.contains(endpoint) {
            return Err(EngineError::Connect {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        if self.failing.contains(&op) {
            return Err(EngineError::Api(format!("injected failure: {op:?}")));
        }
        Ok(())
    }

    fn container_mut(&mut self, endpoint: &str, id: &str) -> EngineResult<&mut MemContainer> {
        self.hosts
            .get_mut(endpoint)
            .and_then(|h| h.containers.get_mut(id))
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    fn allocate_network(&mut self) -> (String, u16) {
        self.next_ip += 1;
        let ip = format!("172.17.{}.{}", self.next_ip / 254, self.next_ip % 254 + 1);
        let port = FIRST_HOST_PORT + self.next_port;
        self.next_port += 1;
        (ip, port)
    }
}

/// In-memory engine shared by clones.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory engine lock")
    }

    // ── Failure injection ──────────────────────────────────────────

    pub fn fail(&self, op: EngineOp) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: EngineOp) {
        self.lock().failing.remove(&op);
    }

    pub fn set_unreachable(&self, endpoint: &str, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(endpoint.to_string());
        } else {
            state.unreachable.remove(endpoint);
        }
    }

    // ── Simulation helpers ─────────────────────────────────────────

    /// Force the engine-reported state of a container.
    pub fn set_state(&self, endpoint: &str, id: &str, engine_state: EngineState) -> EngineResult<()> {
        self.lock().container_mut(endpoint, id)?.state = engine_state;
        Ok(())
    }

    /// Move a container to a new address, as after an engine restart.
    pub fn set_network(&self, endpoint: &str, id: &str, ip: &str, host_port: u16) -> EngineResult<()> {
        let mut state = self.lock();
        let container = state.container_mut(endpoint, id)?;
        container.ip = Some(ip.to_string());
        container.host_port = Some(host_port);
        Ok(())
    }

    /// Start a labelled container the provisioner never tracked.
    pub fn spawn_untracked(&self, endpoint: &str, app: &str, image: &str) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("orphan-{:04}", state.next_id);
        let (ip, host_port) = state.allocate_network();
        let host = state.hosts.entry(endpoint.to_string()).or_default();
        host.images.insert(image.to_string());
        host.containers.insert(
            id.clone(),
            MemContainer {
                image: image.to_string(),
                labels: HashMap::from([(APP_LABEL.to_string(), app.to_string())]),
                port: 8888,
                state: EngineState::Running,
                ip: Some(ip),
                host_port: Some(host_port),
            },
        );
        id
    }

    /// Drop a container without going through the API, as if removed out of band.
    pub fn forget(&self, endpoint: &str, id: &str) -> bool {
        self.lock()
            .hosts
            .get_mut(endpoint)
            .is_some_and(|h| h.containers.remove(id).is_some())
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Ids of all containers on `endpoint`, sorted.
    pub fn container_ids(&self, endpoint: &str) -> Vec<String> {
        self.lock()
            .hosts
            .get(endpoint)
            .map(|h| h.containers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of containers across every endpoint.
    pub fn container_count(&self) -> usize {
        self.lock().hosts.values().map(|h| h.containers.len()).sum()
    }

    pub fn has_image(&self, endpoint: &str, image: &str) -> bool {
        self.lock()
            .hosts
            .get(endpoint)
            .is_some_and(|h| h.images.contains(image))
    }
}

impl ContainerEngine for MemoryEngine {
    fn pull_image<'a>(&'a self, endpoint: &'a str, image: &'a str) -> EngineFuture<'a, Vec<String>> {
        let result = (|| -> EngineResult<Vec<String>> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::Pull)?;
            let host = state.hosts.entry(endpoint.to_string()).or_default();
            host.images.insert(image.to_string());
            Ok(vec![
                format!("Pulling from {image}"),
                format!("Status: Downloaded newer image for {image}"),
            ])
        })();
        Box::pin(async move { result })
    }

    fn create_container<'a>(
        &'a self,
        endpoint: &'a str,
        spec: &'a ContainerSpec,
    ) -> EngineFuture<'a, String> {
        let result = (|| -> EngineResult<String> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::Create)?;
            state.next_id += 1;
            let id = spec
                .name
                .clone()
                .unwrap_or_else(|| format!("c-{:04}", state.next_id));
            let host = state.hosts.entry(endpoint.to_string()).or_default();
            if !host.images.contains(&spec.image) {
                return Err(EngineError::NotFound(spec.image.clone()));
            }
            host.containers.insert(
                id.clone(),
                MemContainer {
                    image: spec.image.clone(),
                    labels: spec.labels.clone(),
                    port: spec.port,
                    state: EngineState::Created,
                    ip: None,
                    host_port: None,
                },
            );
            debug!(%endpoint, %id, "memory container created");
            Ok(id)
        })();
        Box::pin(async move { result })
    }

    fn start_container<'a>(&'a self, endpoint: &'a str, id: &'a str) -> EngineFuture<'a, ()> {
        let result = (|| -> EngineResult<()> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::Start)?;
            let needs_network = state.container_mut(endpoint, id)?.ip.is_none();
            let network = needs_network.then(|| state.allocate_network());
            let container = state.container_mut(endpoint, id)?;
            if let Some((ip, port)) = network {
                container.ip = Some(ip);
                container.host_port = Some(port);
            }
            container.state = EngineState::Running;
            Ok(())
        })();
        Box::pin(async move { result })
    }

    fn stop_container<'a>(
        &'a self,
        endpoint: &'a str,
        id: &'a str,
        _timeout_secs: u64,
    ) -> EngineFuture<'a, ()> {
        let result = (|| -> EngineResult<()> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::Stop)?;
            state.container_mut(endpoint, id)?.state = EngineState::Exited;
            Ok(())
        })();
        Box::pin(async move { result })
    }

    fn remove_container<'a>(&'a self, endpoint: &'a str, id: &'a str) -> EngineFuture<'a, ()> {
        let result = (|| -> EngineResult<()> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::Remove)?;
            state
                .hosts
                .get_mut(endpoint)
                .and_then(|h| h.containers.remove(id))
                .map(|_| ())
                .ok_or_else(|| EngineError::NotFound(id.to_string()))
        })();
        Box::pin(async move { result })
    }

    fn inspect_container<'a>(
        &'a self,
        endpoint: &'a str,
        id: &'a str,
    ) -> EngineFuture<'a, ContainerInfo> {
        let result = (|| -> EngineResult<ContainerInfo> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::Inspect)?;
            Ok(state.container_mut(endpoint, id)?.info(id))
        })();
        Box::pin(async move { result })
    }

    fn list_containers<'a>(
        &'a self,
        endpoint: &'a str,
        app: Option<&'a str>,
    ) -> EngineFuture<'a, Vec<ContainerInfo>> {
        let result = (|| -> EngineResult<Vec<ContainerInfo>> {
            let state = self.lock();
            state.check(endpoint, EngineOp::List)?;
            let infos = state
                .hosts
                .get(endpoint)
                .map(|h| {
                    h.containers
                        .iter()
                        .map(|(id, c)| c.info(id))
                        .filter(|info| app.is_none() || info.app_name.as_deref() == app)
                        .collect()
                })
                .unwrap_or_default();
            Ok(infos)
        })();
        Box::pin(async move { result })
    }

    fn remove_image<'a>(&'a self, endpoint: &'a str, image: &'a str) -> EngineFuture<'a, ()> {
        let result = (|| -> EngineResult<()> {
            let mut state = self.lock();
            state.check(endpoint, EngineOp::RemoveImage)?;
            let removed = state
                .hosts
                .get_mut(endpoint)
                .is_some_and(|h| h.images.remove(image));
            if removed {
                Ok(())
            } else {
                Err(EngineError::NotFound(image.to_string()))
            }
        })();
        Box::pin(async move { result })
    }
}
