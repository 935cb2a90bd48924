//! Deploy and AddUnits.
//!
//! Launching one unit is a pipeline of compensable steps:
//!
//! 1. `create_container` — allocate a host, pull the image, create the
//!    container and record it as `created`;
//! 2. `start_container` — start it and record its address as `installing`;
//! 3. `run_hooks` — run the post-start commands inside it (Deploy only);
//! 4. `register_route` — add its route and record it as `started`.
//!
//! A failing step unwinds the ones before it, so a failed launch leaves no
//! trace of the unit. Deploy launches one replacement per existing unit and
//! retires the old ones only after all replacements are up.

use berth_action::{Action, ActionFuture, Pipeline};
use berth_core::App;
use berth_engine::ContainerSpec;
use berth_router::RouterError;
use berth_state::{Container, ContainerStatus, ContainerUpdate, Node, Unit};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::{Provisioner, route_address};

/// State threaded through the launch steps.
pub(crate) struct DeployContext<'w> {
    prov: &'w Provisioner,
    app: &'w App,
    version: String,
    image: String,
    out: &'w mut (dyn AsyncWrite + Send + Unpin),
    node: Option<Node>,
    container: Option<Container>,
}

impl DeployContext<'_> {
    fn container(&self) -> ProvisionResult<&Container> {
        self.container
            .as_ref()
            .ok_or_else(|| ProvisionError::NotFound("container not created".to_string()))
    }

    fn node(&self) -> ProvisionResult<&Node> {
        self.node
            .as_ref()
            .ok_or_else(|| ProvisionError::NotFound("host not allocated".to_string()))
    }

    async fn say(&mut self, line: &str) -> ProvisionResult<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        Ok(())
    }
}

type Ctx<'w> = DeployContext<'w>;

// ── Steps ──────────────────────────────────────────────────────────

struct CreateContainer;

impl<'w> Action<Ctx<'w>, ProvisionError> for CreateContainer {
    fn name(&self) -> &'static str {
        "create_container"
    }

    fn forward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let node = prov.scheduler.allocate(&ctx.app.name)?;
            ctx.say(&format!("---> Pulling {} on {}", ctx.image, node.id)).await?;
            let progress = prov.engine.pull_image(&node.address, &ctx.image).await?;
            for line in progress {
                ctx.say(&line).await?;
            }

            let spec = ContainerSpec::for_app(
                &ctx.app.name,
                ctx.image.clone(),
                vec![prov.config.docker.run_cmd.clone()],
                prov.config.docker.port,
            );
            let id = prov.engine.create_container(&node.address, &spec).await?;

            let container = Container {
                id: id.clone(),
                app_name: ctx.app.name.clone(),
                kind: ctx.app.platform.clone(),
                ip: None,
                host_port: None,
                version: ctx.version.clone(),
                status: ContainerStatus::Created,
                host: node.id.clone(),
            };
            if let Err(e) = prov.store.insert_container(&container) {
                // Not yet recorded, so nothing else would clean it up.
                if let Err(cleanup) = prov.engine.remove_container(&node.address, &id).await {
                    warn!(%id, error = %cleanup, "cleanup of unrecorded container failed");
                }
                return Err(e.into());
            }
            info!(app = %ctx.app.name, %id, node = %node.id, "container created");
            ctx.node = Some(node);
            ctx.container = Some(container);
            Ok(())
        })
    }

    fn backward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let (node, container) = (ctx.node()?, ctx.container()?);
            let removed = prov.engine.remove_container(&node.address, &container.id).await;
            prov.store.remove_container(&container.id)?;
            match removed {
                Err(e) if !e.is_not_found() => Err(e.into()),
                _ => Ok(()),
            }
        })
    }
}

struct StartContainer;

impl<'w> Action<Ctx<'w>, ProvisionError> for StartContainer {
    fn name(&self) -> &'static str {
        "start_container"
    }

    fn forward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let (address, id) = (ctx.node()?.address.clone(), ctx.container()?.id.clone());
            prov.engine.start_container(&address, &id).await?;

            let info = prov.engine.inspect_container(&address, &id).await?;
            let host_port = info.host_port(prov.config.docker.port);
            let (ip, host_port) = match (info.ip, host_port) {
                (Some(ip), Some(port)) => (ip, port),
                _ => return Err(ProvisionError::NoAddress(id)),
            };
            let updated = prov.store.update_container(
                &id,
                ContainerUpdate {
                    status: Some(ContainerStatus::Installing),
                    ip: Some(ip.clone()),
                    host_port: Some(host_port),
                    version: None,
                },
            )?;
            ctx.container = Some(updated);
            ctx.say(&format!("---> Started unit {id} at {ip}")).await?;
            Ok(())
        })
    }

    fn backward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let (node, container) = (ctx.node()?, ctx.container()?);
            match prov
                .engine
                .stop_container(&node.address, &container.id, prov.config.docker.stop_timeout_secs)
                .await
            {
                Err(e) if !e.is_not_found() => Err(e.into()),
                _ => Ok(()),
            }
        })
    }
}

struct RunHooks;

impl<'w> Action<Ctx<'w>, ProvisionError> for RunHooks {
    fn name(&self) -> &'static str {
        "run_hooks"
    }

    fn forward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let container = ctx.container()?.clone();
            let ip = container
                .ip
                .clone()
                .ok_or_else(|| ProvisionError::NoAddress(container.id.clone()))?;

            for hook in &prov.config.hooks.post_start {
                let Some((cmd, args)) = hook.split_first() else {
                    continue;
                };
                match prov.executor.run(&ip, cmd, args).await {
                    Ok(output) => ctx.out.write_all(&output.stdout).await?,
                    Err(e) => {
                        ctx.out.write_all(e.stderr()).await?;
                        error!(id = %container.id, %cmd, error = %e, "post-start hook failed");
                        if let Err(mark) = prov
                            .store
                            .update_container(&container.id, ContainerUpdate::status(ContainerStatus::Error))
                        {
                            warn!(id = %container.id, error = %mark, "cannot mark container as errored");
                        }
                        return Err(e.into());
                    }
                }
            }
            Ok(())
        })
    }

    fn backward<'a>(&'a self, _ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async { Ok(()) })
    }
}

struct RegisterRoute;

impl<'w> Action<Ctx<'w>, ProvisionError> for RegisterRoute {
    fn name(&self) -> &'static str {
        "register_route"
    }

    fn forward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let container = ctx.container()?;
            let port = container
                .host_port
                .ok_or_else(|| ProvisionError::NoAddress(container.id.clone()))?;
            let address = route_address(ctx.node()?, port);
            prov.router.add_route(&ctx.app.name, &address)?;
            let updated = prov
                .store
                .update_container(&container.id, ContainerUpdate::status(ContainerStatus::Started))?;
            info!(app = %ctx.app.name, id = %updated.id, %address, "unit routed");
            ctx.container = Some(updated);
            Ok(())
        })
    }

    fn backward<'a>(&'a self, ctx: &'a mut Ctx<'w>) -> ActionFuture<'a, ProvisionError> {
        Box::pin(async move {
            let prov = ctx.prov;
            let Some(port) = ctx.container()?.host_port else {
                return Ok(());
            };
            let address = route_address(ctx.node()?, port);
            match prov.router.remove_route(&ctx.app.name, &address) {
                Ok(()) | Err(RouterError::RouteNotFound { .. }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn unit_pipeline<'w>(with_hooks: bool) -> Pipeline<Ctx<'w>, ProvisionError> {
    let mut steps: Vec<Box<dyn Action<Ctx<'w>, ProvisionError>>> =
        vec![Box::new(CreateContainer), Box::new(StartContainer)];
    if with_hooks {
        steps.push(Box::new(RunHooks));
    }
    steps.push(Box::new(RegisterRoute));
    Pipeline::new(steps)
}

// ── Operations ─────────────────────────────────────────────────────

impl Provisioner {
    async fn launch_unit<'w>(
        &'w self,
        app: &'w App,
        version: &str,
        out: &'w mut (dyn AsyncWrite + Send + Unpin),
        with_hooks: bool,
    ) -> ProvisionResult<Container> {
        let mut ctx = DeployContext {
            prov: self,
            app,
            version: version.to_string(),
            image: self.config.image_name(&app.name, version),
            out,
            node: None,
            container: None,
        };
        unit_pipeline(with_hooks)
            .execute(&mut ctx)
            .await
            .map_err(ProvisionError::from_pipeline)?;
        ctx.container
            .ok_or_else(|| ProvisionError::NotFound("container not created".to_string()))
    }

    /// Roll the app onto `version`, streaming progress to `out`.
    ///
    /// One unit is launched per existing unit (one for a first deploy), so
    /// the unit count is kept. Only once every replacement is routed are the
    /// previous units retired; a failure removes the replacements launched so
    /// far and leaves the previous units serving.
    pub async fn deploy<W>(&self, app: &App, version: &str, out: &mut W) -> ProvisionResult<Vec<Unit>>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let previous = self.store.list_containers(&app.name)?;
        let count = previous.len().max(1);
        info!(app = %app.name, %version, units = count, "deploying");

        let mut launched = Vec::with_capacity(count);
        let mut failure = None;
        for _ in 0..count {
            match self.launch_unit(app, version, &mut *out, true).await {
                Ok(container) => launched.push(container),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Leftovers of earlier failed runs go either way.
        for sweep_error in self.remove_untracked(&app.name).await {
            warn!(app = %app.name, error = %sweep_error, "orphan sweep incomplete");
        }

        if let Some(e) = failure {
            error!(app = %app.name, %version, launched = launched.len(), units = count, error = %e, "deploy failed");
            for container in &launched {
                if let Err(cleanup) = self.remove_container(container).await {
                    warn!(app = %app.name, id = %container.id, error = %cleanup, "cannot remove replacement unit");
                }
            }
            return Err(e);
        }

        for old in previous {
            if let Err(e) = self.remove_container(&old).await {
                warn!(app = %app.name, id = %old.id, error = %e, "cannot retire previous unit");
            }
        }

        out.write_all(format!("---> Deployed {} {version}\n", app.name).as_bytes())
            .await?;
        info!(app = %app.name, %version, units = launched.len(), "deployed");
        Ok(launched.iter().map(Container::to_unit).collect())
    }

    /// Add `n` units running the app's current version.
    ///
    /// Units already launched stay up when a later one fails; the error of
    /// the failing unit is returned and callers re-read the unit list.
    pub async fn add_units(&self, app: &App, n: u32) -> ProvisionResult<Vec<Unit>> {
        if n == 0 {
            return Err(ProvisionError::cannot_add_zero_units());
        }
        let existing = self.store.list_containers(&app.name)?;
        let Some(current) = existing.first() else {
            return Err(ProvisionError::not_deployed());
        };
        let version = current.version.clone();

        let mut sink = tokio::io::sink();
        let mut units = Vec::with_capacity(n as usize);
        for _ in 0..n {
            match self.launch_unit(app, &version, &mut sink, false).await {
                Ok(container) => units.push(container.to_unit()),
                Err(e) => {
                    error!(app = %app.name, created = units.len(), requested = n, error = %e, "add units stopped");
                    return Err(e);
                }
            }
        }
        info!(app = %app.name, count = n, %version, "units added");
        Ok(units)
    }
}
