//! Per-unit operations: removal, remote commands, restart.

use berth_core::App;
use berth_state::Container;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::Provisioner;
use crate::error::{ProvisionError, ProvisionResult};

impl Provisioner {
    /// Remove one unit of `app`.
    ///
    /// The app image is dropped from the unit's host once no other unit of
    /// the app on that host runs it.
    pub async fn remove_unit(&self, app: &App, container_id: &str) -> ProvisionResult<()> {
        let container = self
            .store
            .get_container(container_id)?
            .ok_or_else(ProvisionError::unit_not_found)?;
        if container.app_name != app.name {
            return Err(ProvisionError::foreign_unit());
        }

        self.remove_container(&container).await?;
        info!(app = %app.name, id = %container_id, "unit removed");

        let still_used = self
            .store
            .list_containers(&app.name)?
            .iter()
            .any(|c| c.host == container.host && c.version == container.version);
        if !still_used {
            self.remove_image(&container).await;
        }
        Ok(())
    }

    async fn remove_image(&self, container: &Container) {
        let image = self.config.image_name(&container.app_name, &container.version);
        let node = match self.node_of(container) {
            Ok(node) => node,
            Err(e) => {
                warn!(%image, error = %e, "cannot locate host for image removal");
                return;
            }
        };
        match self.engine.remove_image(&node.address, &image).await {
            Ok(()) => debug!(%image, node = %node.id, "image removed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(%image, node = %node.id, error = %e, "image removal failed"),
        }
    }

    /// Run `cmd args…` in every unit of the app.
    ///
    /// The calls go out in parallel and all of them are awaited. Stdout is
    /// then written in unit order; at the first failing unit (in that order)
    /// its stderr is written and the error returned.
    pub async fn execute_command<O, E>(
        &self,
        stdout: &mut O,
        stderr: &mut E,
        app: &App,
        cmd: &str,
        args: &[String],
    ) -> ProvisionResult<()>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let containers = self.store.list_containers(&app.name)?;
        if containers.is_empty() {
            return Err(ProvisionError::no_containers());
        }
        debug!(app = %app.name, %cmd, units = containers.len(), "executing command");

        let targets = containers
            .iter()
            .map(|c| c.ip.clone().ok_or_else(|| ProvisionError::NoAddress(c.id.clone())))
            .collect::<ProvisionResult<Vec<String>>>()?;

        let mut handles = Vec::with_capacity(targets.len());
        for ip in targets {
            let executor = self.executor.clone();
            let cmd = cmd.to_string();
            let args = args.to_vec();
            handles.push(tokio::spawn(async move { executor.run(&ip, &cmd, &args).await }));
        }

        // Every call is joined before any output is written.
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await);
        }

        for result in results {
            match result? {
                Ok(output) => stdout.write_all(&output.stdout).await?,
                Err(e) => {
                    stderr.write_all(e.stderr()).await?;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Run the restart hook in every unit of the app, one after the other.
    pub async fn restart<W>(&self, app: &App, out: &mut W) -> ProvisionResult<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let containers = self.store.list_containers(&app.name)?;
        if containers.is_empty() {
            return Err(ProvisionError::no_containers());
        }
        let Some((cmd, args)) = self.config.hooks.restart.split_first() else {
            return Ok(());
        };

        out.write_all(b"Restarting app...\n").await?;
        for container in &containers {
            let ip = container
                .ip
                .as_deref()
                .ok_or_else(|| ProvisionError::NoAddress(container.id.clone()))?;
            match self.executor.run(ip, cmd, args).await {
                Ok(output) => out.write_all(&output.stdout).await?,
                Err(e) => {
                    out.write_all(e.stderr()).await?;
                    return Err(e.into());
                }
            }
        }
        info!(app = %app.name, units = containers.len(), "app restarted");
        Ok(())
    }
}
