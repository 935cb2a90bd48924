//! Docker engine client built on bollard.
//!
//! One `Docker` handle is cached per node endpoint. Endpoints are
//! `http://host:port`, `tcp://host:port`, `unix:///path/to/docker.sock`,
//! or `local` for the platform default socket.

use std::collections::HashMap;
use std::sync::Mutex;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, HealthStatusEnum,
    HostConfig, PortBinding, PortMap,
};
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::{APP_LABEL, ContainerEngine, ContainerInfo, ContainerSpec, EngineFuture, EngineState};

/// Seconds before an engine request times out.
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Default)]
pub struct DockerEngine {
    clients: Mutex<HashMap<String, Docker>>,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, endpoint: &str) -> EngineResult<Docker> {
        let mut clients = self.clients.lock().expect("docker clients lock");
        if let Some(docker) = clients.get(endpoint) {
            return Ok(docker.clone());
        }
        let docker = connect(endpoint)?;
        debug!(%endpoint, "docker client created");
        clients.insert(endpoint.to_string(), docker.clone());
        Ok(docker)
    }
}

fn connect(endpoint: &str) -> EngineResult<Docker> {
    let result = if endpoint == "local" {
        Docker::connect_with_local_defaults()
    } else if let Some(path) = endpoint.strip_prefix("unix://") {
        Docker::connect_with_socket(path, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    } else {
        let url = endpoint.replacen("tcp://", "http://", 1);
        Docker::connect_with_http(&url, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
    };
    result.map_err(|e| EngineError::Connect {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}

impl ContainerEngine for DockerEngine {
    fn pull_image<'a>(&'a self, endpoint: &'a str, image: &'a str) -> EngineFuture<'a, Vec<String>> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            let options = CreateImageOptions {
                from_image: image,
                ..Default::default()
            };
            let mut stream = docker.create_image(Some(options), None, None);
            let mut progress = Vec::new();
            while let Some(item) = stream.next().await {
                let info = item?;
                if let Some(status) = info.status {
                    match info.progress {
                        Some(bar) => progress.push(format!("{status} {bar}")),
                        None => progress.push(status),
                    }
                }
            }
            info!(%endpoint, %image, "image pulled");
            Ok(progress)
        })
    }

    fn create_container<'a>(
        &'a self,
        endpoint: &'a str,
        spec: &'a ContainerSpec,
    ) -> EngineFuture<'a, String> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            let port_key = format!("{}/tcp", spec.port);
            let port_bindings: PortMap = HashMap::from([(
                port_key.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    // Empty host port lets the engine choose one.
                    host_port: Some(String::new()),
                }]),
            )]);
            let config = Config {
                image: Some(spec.image.clone()),
                cmd: Some(spec.cmd.clone()),
                labels: Some(spec.labels.clone()),
                exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
                host_config: Some(HostConfig {
                    port_bindings: Some(port_bindings),
                    ..Default::default()
                }),
                ..Default::default()
            };
            let options = spec.name.as_ref().map(|name| CreateContainerOptions {
                name: name.clone(),
                platform: None,
            });
            let response = docker.create_container(options, config).await?;
            debug!(%endpoint, id = %response.id, image = %spec.image, "container created");
            Ok(response.id)
        })
    }

    fn start_container<'a>(&'a self, endpoint: &'a str, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            docker
                .start_container(id, None::<StartContainerOptions<String>>)
                .await?;
            debug!(%endpoint, %id, "container started");
            Ok(())
        })
    }

    fn stop_container<'a>(
        &'a self,
        endpoint: &'a str,
        id: &'a str,
        timeout_secs: u64,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            let options = StopContainerOptions {
                t: i64::try_from(timeout_secs).unwrap_or(i64::MAX),
            };
            docker.stop_container(id, Some(options)).await?;
            debug!(%endpoint, %id, "container stopped");
            Ok(())
        })
    }

    fn remove_container<'a>(&'a self, endpoint: &'a str, id: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            docker.remove_container(id, Some(options)).await?;
            debug!(%endpoint, %id, "container removed");
            Ok(())
        })
    }

    fn inspect_container<'a>(
        &'a self,
        endpoint: &'a str,
        id: &'a str,
    ) -> EngineFuture<'a, ContainerInfo> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            let response = docker.inspect_container(id, None).await?;
            Ok(info_from_inspect(response))
        })
    }

    fn list_containers<'a>(
        &'a self,
        endpoint: &'a str,
        app: Option<&'a str>,
    ) -> EngineFuture<'a, Vec<ContainerInfo>> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            let mut filters = HashMap::new();
            if let Some(app) = app {
                filters.insert("label".to_string(), vec![format!("{APP_LABEL}={app}")]);
            }
            let options = ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            };
            let summaries = docker.list_containers(Some(options)).await?;
            Ok(summaries.into_iter().map(info_from_summary).collect())
        })
    }

    fn remove_image<'a>(&'a self, endpoint: &'a str, image: &'a str) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let docker = self.client(endpoint)?;
            docker
                .remove_image(image, None::<RemoveImageOptions>, None)
                .await?;
            info!(%endpoint, %image, "image removed");
            Ok(())
        })
    }
}

// ── Response mapping ───────────────────────────────────────────────

fn info_from_inspect(response: ContainerInspectResponse) -> ContainerInfo {
    let (image, app_name) = match response.config {
        Some(config) => (
            config.image.unwrap_or_default(),
            config.labels.and_then(|mut l| l.remove(APP_LABEL)),
        ),
        None => (String::new(), None),
    };

    let state = match response.state {
        Some(state) => {
            let unhealthy = state
                .health
                .and_then(|h| h.status)
                .is_some_and(|s| s == HealthStatusEnum::UNHEALTHY);
            if unhealthy {
                EngineState::Unhealthy
            } else {
                state_from_status(state.status)
            }
        }
        None => EngineState::Created,
    };

    let mut ip = None;
    let mut ports = HashMap::new();
    if let Some(network) = response.network_settings {
        ip = network.ip_address.filter(|ip| !ip.is_empty()).or_else(|| {
            network
                .networks
                .into_iter()
                .flat_map(|n| n.into_values())
                .find_map(|n| n.ip_address.filter(|ip| !ip.is_empty()))
        });
        ports = ports_from_map(network.ports.unwrap_or_default());
    }

    ContainerInfo {
        id: response.id.unwrap_or_default(),
        image,
        app_name,
        state,
        ip,
        ports,
    }
}

fn info_from_summary(summary: ContainerSummary) -> ContainerInfo {
    let unhealthy = summary
        .status
        .as_deref()
        .is_some_and(|s| s.contains("(unhealthy)"));
    let state = if unhealthy {
        EngineState::Unhealthy
    } else {
        match summary.state.as_deref() {
            Some("running") => EngineState::Running,
            Some("restarting") => EngineState::Restarting,
            Some("paused") => EngineState::Paused,
            Some("exited") => EngineState::Exited,
            Some("dead") | Some("removing") => EngineState::Dead,
            _ => EngineState::Created,
        }
    };

    let ip = summary
        .network_settings
        .and_then(|n| n.networks)
        .into_iter()
        .flat_map(|n| n.into_values())
        .find_map(|n| n.ip_address.filter(|ip| !ip.is_empty()));

    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| Some((p.private_port, p.public_port?)))
        .collect();

    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        app_name: summary.labels.and_then(|mut l| l.remove(APP_LABEL)),
        state,
        ip,
        ports,
    }
}

fn state_from_status(status: Option<ContainerStateStatusEnum>) -> EngineState {
    match status {
        Some(ContainerStateStatusEnum::RUNNING) => EngineState::Running,
        Some(ContainerStateStatusEnum::RESTARTING) => EngineState::Restarting,
        Some(ContainerStateStatusEnum::PAUSED) => EngineState::Paused,
        Some(ContainerStateStatusEnum::EXITED) => EngineState::Exited,
        Some(ContainerStateStatusEnum::DEAD) | Some(ContainerStateStatusEnum::REMOVING) => {
            EngineState::Dead
        }
        _ => EngineState::Created,
    }
}

/// `{"8888/tcp": [{"HostPort": "49153"}]}` → `{8888: 49153}`.
fn ports_from_map(map: PortMap) -> HashMap<u16, u16> {
    map.into_iter()
        .filter_map(|(key, bindings)| {
            let container_port = key.split('/').next()?.parse().ok()?;
            let host_port = bindings?
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse().ok()))?;
            Some((container_port, host_port))
        })
        .collect()
}
