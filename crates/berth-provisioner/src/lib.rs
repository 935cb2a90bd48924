//! berth-provisioner — the container orchestration core.
//!
//! The [`Provisioner`] creates, scales, destroys and inspects the containers
//! of each application. It asks the [`Scheduler`] for hosts, drives the
//! container engine, persists records in the [`StateStore`], keeps the
//! [`Router`] in step with live addresses, and runs commands inside units
//! through the [`Executor`].
//!
//! Every collaborator is injected at construction, so tests swap in the
//! in-memory engine, the capturing executor and the in-process router.
//!
//! Operations on different applications may run concurrently. Operations
//! on the same application are not serialized here; callers that need
//! that must serialize per app.

mod deploy;
pub mod error;
mod status;
mod units;

use std::sync::Arc;

use berth_core::{App, BerthConfig};
use berth_engine::ContainerEngine;
use berth_exec::Executor;
use berth_router::{Router, RouterError};
use berth_scheduler::Scheduler;
use berth_state::{Container, Node, StateStore};
use tracing::{debug, info, warn};

pub use berth_state::{ContainerStatus, Unit};
pub use error::{ProvisionError, ProvisionResult};
pub use status::status_from_engine;

/// Orchestrates containers, routes and hosts for every application.
pub struct Provisioner {
    config: BerthConfig,
    store: StateStore,
    engine: Arc<dyn ContainerEngine>,
    executor: Arc<dyn Executor>,
    router: Arc<dyn Router>,
    scheduler: Arc<dyn Scheduler>,
}

impl Provisioner {
    pub fn new(
        config: BerthConfig,
        store: StateStore,
        engine: Arc<dyn ContainerEngine>,
        executor: Arc<dyn Executor>,
        router: Arc<dyn Router>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            executor,
            router,
            scheduler,
        }
    }

    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    // ── Backends ───────────────────────────────────────────────────

    /// Register the app's router backend. No container is created.
    pub fn provision(&self, app: &App) -> ProvisionResult<()> {
        self.router.add_backend(&app.name)?;
        info!(app = %app.name, "app provisioned");
        Ok(())
    }

    /// External address of the app.
    pub fn addr(&self, app: &App) -> ProvisionResult<String> {
        Ok(self.router.addr(&app.name)?)
    }

    /// Add an alias backend seeded with the app's current routes.
    pub fn set_cname(&self, app: &App, cname: &str) -> ProvisionResult<()> {
        let routes = self.router.routes(&app.name)?;
        self.router.add_backend(cname)?;
        for route in &routes {
            self.router.add_route(cname, route)?;
        }
        info!(app = %app.name, %cname, routes = routes.len(), "cname set");
        Ok(())
    }

    /// Remove an alias backend. The app's own backend is untouched.
    pub fn unset_cname(&self, app: &App, cname: &str) -> ProvisionResult<()> {
        self.router.remove_backend(cname)?;
        info!(app = %app.name, %cname, "cname unset");
        Ok(())
    }

    /// Exchange the route sets of two apps. Applying it twice restores both.
    pub fn swap(&self, app1: &App, app2: &App) -> ProvisionResult<()> {
        self.router.swap(&app1.name, &app2.name)?;
        info!(app1 = %app1.name, app2 = %app2.name, "apps swapped");
        Ok(())
    }

    // ── Destroy ────────────────────────────────────────────────────

    /// Remove every container of the app, its untracked leftovers and its
    /// backend. Individual failures are collected, never fatal.
    pub async fn destroy(&self, app: &App) -> ProvisionResult<()> {
        let mut errors = self.remove_untracked(&app.name).await;

        for container in self.store.list_containers(&app.name)? {
            if let Err(e) = self.remove_container(&container).await {
                errors.push(format!("{}: {e}", container.id));
            }
        }

        match self.router.remove_backend(&app.name) {
            Ok(()) | Err(RouterError::BackendNotFound(_)) => {}
            Err(e) => errors.push(format!("backend: {e}")),
        }

        if errors.is_empty() {
            info!(app = %app.name, "app destroyed");
            Ok(())
        } else {
            warn!(app = %app.name, failures = errors.len(), "app destroyed with errors");
            Err(ProvisionError::Destroy {
                app: app.name.clone(),
                errors,
            })
        }
    }

    // ── Shared helpers ─────────────────────────────────────────────

    /// Node a container was placed on.
    fn node_of(&self, container: &Container) -> ProvisionResult<Node> {
        self.store
            .get_node(&container.host)?
            .ok_or_else(|| ProvisionError::NotFound(format!("node {} not found", container.host)))
    }

    /// Stop and remove one container from engine, router and store.
    ///
    /// Every step is attempted; the record is dropped even when the engine
    /// refuses, since a leftover labelled container is swept up later. The
    /// first failure is returned.
    async fn remove_container(&self, container: &Container) -> ProvisionResult<()> {
        let mut first_error: Option<ProvisionError> = None;

        match self.node_of(container) {
            Ok(node) => {
                if let Err(e) = self
                    .engine
                    .stop_container(&node.address, &container.id, self.config.docker.stop_timeout_secs)
                    .await
                {
                    debug!(id = %container.id, error = %e, "stop before remove failed");
                }
                match self.engine.remove_container(&node.address, &container.id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(id = %container.id, error = %e, "engine refused container removal");
                        first_error.get_or_insert(e.into());
                    }
                }
                if let Some(port) = container.host_port {
                    match self
                        .router
                        .remove_route(&container.app_name, &route_address(&node, port))
                    {
                        Ok(()) => {}
                        Err(RouterError::RouteNotFound { .. } | RouterError::BackendNotFound(_)) => {}
                        Err(e) => {
                            first_error.get_or_insert(e.into());
                        }
                    }
                }
            }
            Err(e) => {
                warn!(id = %container.id, error = %e, "container host unknown");
                first_error.get_or_insert(e);
            }
        }

        self.store.remove_container(&container.id)?;
        debug!(app = %container.app_name, id = %container.id, "container removed");
        first_error.map_or(Ok(()), Err)
    }

    /// Remove engine containers labelled for `app` that the store does not
    /// track. Returns the failures, already logged.
    async fn remove_untracked(&self, app: &str) -> Vec<String> {
        let mut errors = Vec::new();
        let nodes = match self.scheduler.list_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(%app, error = %e, "cannot list nodes for orphan sweep");
                return vec![format!("nodes: {e}")];
            }
        };

        for node in nodes {
            let found = match self.engine.list_containers(&node.address, Some(app)).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(%app, node = %node.id, error = %e, "cannot list containers for orphan sweep");
                    errors.push(format!("{}: {e}", node.id));
                    continue;
                }
            };
            for info in found {
                match self.store.get_container(&info.id) {
                    Ok(Some(_)) => continue,
                    Ok(None) => {}
                    Err(e) => {
                        errors.push(format!("{}: {e}", info.id));
                        continue;
                    }
                }
                match self.engine.remove_container(&node.address, &info.id).await {
                    Ok(()) => info!(%app, node = %node.id, id = %info.id, "untracked container removed"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(%app, id = %info.id, error = %e, "untracked container removal failed");
                        errors.push(format!("{}: {e}", info.id));
                    }
                }
            }
        }
        errors
    }
}

/// Address registered in the router for a container published on `node`.
pub fn route_address(node: &Node, host_port: u16) -> String {
    format!("http://{}:{}", node.host(), host_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_address_uses_node_host() {
        let node = Node::new("node-1", "http://127.0.0.1:2375");
        assert_eq!(route_address(&node, 9025), "http://127.0.0.1:9025");
    }
}
