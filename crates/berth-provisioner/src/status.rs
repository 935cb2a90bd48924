//! Status reconciliation between the store and the live engines.
//!
//! CollectStatus observes; it never creates or destroys containers. It
//! rewrites status, address and route metadata to match what the engines
//! report.

use std::collections::{HashMap, HashSet};

use berth_engine::{ContainerInfo, EngineState};
use berth_state::{Container, ContainerStatus, ContainerUpdate, Node, Unit};
use tracing::{debug, info, warn};

use crate::error::ProvisionResult;
use crate::{Provisioner, route_address};

/// Unit status implied by an engine state.
pub fn status_from_engine(state: EngineState) -> ContainerStatus {
    match state {
        EngineState::Running => ContainerStatus::Started,
        EngineState::Created | EngineState::Restarting => ContainerStatus::Installing,
        EngineState::Exited | EngineState::Dead | EngineState::Unhealthy => ContainerStatus::Error,
        EngineState::Paused => ContainerStatus::Stopped,
    }
}

impl Provisioner {
    /// Reconcile every stored container with the engines of known nodes and
    /// return the resulting units, ordered by container id.
    ///
    /// Containers on a node whose engine cannot be listed are reported as
    /// last recorded. A container no reachable engine reports is an error
    /// unit without address or machine.
    pub async fn collect_status(&self) -> ProvisionResult<Vec<Unit>> {
        let nodes = self.scheduler.list_nodes()?;
        let mut live: HashMap<String, (Node, ContainerInfo)> = HashMap::new();
        let mut unreachable: HashSet<String> = HashSet::new();

        for node in nodes {
            match self.engine.list_containers(&node.address, None).await {
                Ok(infos) => {
                    for info in infos {
                        live.insert(info.id.clone(), (node.clone(), info));
                    }
                }
                Err(e) => {
                    warn!(node = %node.id, error = %e, "cannot list containers");
                    unreachable.insert(node.id.clone());
                }
            }
        }

        let containers = self.store.list_all_containers()?;
        let mut units = Vec::with_capacity(containers.len());
        for container in containers {
            let unit = match live.get(&container.id) {
                Some((node, info)) => self.reconcile(container, node, info).await?,
                None if unreachable.contains(&container.host) => container.to_unit(),
                None => self.mark_missing(container)?,
            };
            units.push(unit);
        }
        debug!(units = units.len(), "status collected");
        Ok(units)
    }

    async fn reconcile(
        &self,
        container: Container,
        node: &Node,
        info: &ContainerInfo,
    ) -> ProvisionResult<Unit> {
        let status = status_from_engine(info.state);
        let host_port = info.host_port(self.config.docker.port);

        let mut update = ContainerUpdate::default();
        if status != container.status {
            if !container.status.can_transition_to(status) {
                debug!(id = %container.id, from = %container.status, to = %status, "engine overrides recorded status");
            }
            update.status = Some(status);
        }
        let ip_changed = info.ip.is_some() && info.ip != container.ip;
        if ip_changed {
            update.ip = info.ip.clone();
        }
        if host_port.is_some() && host_port != container.host_port {
            update.host_port = host_port;
        }
        if update.is_empty() {
            return Ok(container.to_unit());
        }

        if ip_changed {
            if let Some(old_ip) = &container.ip {
                if let Err(e) = self.executor.forget_host(old_ip).await {
                    warn!(ip = %old_ip, error = %e, "cannot forget stale host key");
                }
            }
        }

        let old_node = if container.host == node.id {
            Some(node.clone())
        } else {
            self.store.get_node(&container.host)?
        };
        let old_route = old_node
            .as_ref()
            .zip(container.host_port)
            .map(|(n, port)| route_address(n, port));
        let new_route = host_port.map(|port| route_address(node, port));
        if let (Some(old), Some(new)) = (&old_route, &new_route) {
            if old != new && self.router.has_route(&container.app_name, old) {
                self.router.replace_route(&container.app_name, old, new)?;
                info!(app = %container.app_name, id = %container.id, %old, %new, "route moved");
            }
        }

        let updated = self.store.update_container(&container.id, update)?;
        Ok(updated.to_unit())
    }

    fn mark_missing(&self, container: Container) -> ProvisionResult<Unit> {
        if container.status != ContainerStatus::Error {
            warn!(app = %container.app_name, id = %container.id, "container missing from engine");
            self.store
                .update_container(&container.id, ContainerUpdate::status(ContainerStatus::Error))?;
        }
        let mut unit = container.to_unit();
        unit.status = ContainerStatus::Error;
        unit.ip = String::new();
        unit.machine = String::new();
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_states_map_to_unit_status() {
        assert_eq!(status_from_engine(EngineState::Running), ContainerStatus::Started);
        assert_eq!(status_from_engine(EngineState::Created), ContainerStatus::Installing);
        assert_eq!(status_from_engine(EngineState::Restarting), ContainerStatus::Installing);
        assert_eq!(status_from_engine(EngineState::Exited), ContainerStatus::Error);
        assert_eq!(status_from_engine(EngineState::Dead), ContainerStatus::Error);
        assert_eq!(status_from_engine(EngineState::Unhealthy), ContainerStatus::Error);
        assert_eq!(status_from_engine(EngineState::Paused), ContainerStatus::Stopped);
    }
}
