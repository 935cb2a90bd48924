//! berth-engine — the container engine as seen by the provisioner.
//!
//! Every call names the engine endpoint of the node it targets, so one
//! client serves the whole fleet. [`DockerEngine`] speaks the Docker API
//! through bollard; [`MemoryEngine`] is a deterministic stand-in for tests.

pub mod docker;
pub mod error;
pub mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub use docker::DockerEngine;
pub use error::{EngineError, EngineResult};
pub use memory::{EngineOp, MemoryEngine};

/// Label carrying the owning application's name on every container.
pub const APP_LABEL: &str = "berth.app";

/// Boxed future returned by engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send + 'a>>;

/// What to launch.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// Container port published on an engine-chosen host port.
    pub port: u16,
    pub labels: HashMap<String, String>,
    pub name: Option<String>,
}

impl ContainerSpec {
    /// Spec for one unit of `app`, labelled so orphans can be found later.
    pub fn for_app(app: &str, image: impl Into<String>, cmd: Vec<String>, port: u16) -> Self {
        Self {
            image: image.into(),
            cmd,
            port,
            labels: HashMap::from([(APP_LABEL.to_string(), app.to_string())]),
            name: None,
        }
    }
}

/// Engine-reported lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Unhealthy,
}

/// Engine-side view of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub image: String,
    /// Value of the [`APP_LABEL`] label, if present.
    pub app_name: Option<String>,
    pub state: EngineState,
    pub ip: Option<String>,
    /// Container port → published host port.
    pub ports: HashMap<u16, u16>,
}

impl ContainerInfo {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }
}

/// Container engine operations — injected into the provisioner for testability.
pub trait ContainerEngine: Send + Sync {
    /// Pull `image` onto the node, returning the progress lines reported.
    fn pull_image<'a>(&'a self, endpoint: &'a str, image: &'a str) -> EngineFuture<'a, Vec<String>>;

    fn create_container<'a>(
        &'a self,
        endpoint: &'a str,
        spec: &'a ContainerSpec,
    ) -> EngineFuture<'a, String>;

    fn start_container<'a>(&'a self, endpoint: &'a str, id: &'a str) -> EngineFuture<'a, ()>;

    fn stop_container<'a>(
        &'a self,
        endpoint: &'a str,
        id: &'a str,
        timeout_secs: u64,
    ) -> EngineFuture<'a, ()>;

    /// Remove a container, killing it if it still runs.
    fn remove_container<'a>(&'a self, endpoint: &'a str, id: &'a str) -> EngineFuture<'a, ()>;

    fn inspect_container<'a>(
        &'a self,
        endpoint: &'a str,
        id: &'a str,
    ) -> EngineFuture<'a, ContainerInfo>;

    /// Every container on the node, optionally only those labelled for `app`.
    fn list_containers<'a>(
        &'a self,
        endpoint: &'a str,
        app: Option<&'a str>,
    ) -> EngineFuture<'a, Vec<ContainerInfo>>;

    fn remove_image<'a>(&'a self, endpoint: &'a str, image: &'a str) -> EngineFuture<'a, ()>;
}
