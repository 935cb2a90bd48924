//! Round-robin scheduler over the node registry.

use std::time::{SystemTime, UNIX_EPOCH};

use berth_state::{Node, StateError, StateStore};
use tracing::{debug, info};

use crate::error::{SchedulerError, SchedulerResult};
use crate::load_balancer::RoundRobinBalancer;
use crate::Scheduler;

/// Rotates through registered nodes in id order.
///
/// Nodes are persisted in the `StateStore`, so registrations survive
/// restarts of `berthd`.
pub struct RoundRobinScheduler {
    state: StateStore,
    balancer: RoundRobinBalancer,
}

impl RoundRobinScheduler {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            balancer: RoundRobinBalancer::new(),
        }
    }
}

impl Scheduler for RoundRobinScheduler {
    fn allocate(&self, app: &str) -> SchedulerResult<Node> {
        let mut nodes = self.state.list_nodes()?;
        let idx = self
            .balancer
            .next(nodes.len())
            .ok_or(SchedulerError::NoNodesAvailable)?;
        let node = nodes.swap_remove(idx);
        debug!(%app, node = %node.id, "host allocated");
        Ok(node)
    }

    fn add_node(&self, mut node: Node) -> SchedulerResult<()> {
        if node.registered_at == 0 {
            node.registered_at = epoch_secs();
        }
        match self.state.insert_node(&node) {
            Ok(()) => {}
            Err(StateError::NodeExists(id)) => return Err(SchedulerError::NodeExists(id)),
            Err(e) => return Err(e.into()),
        }
        info!(node = %node.id, address = %node.address, "node added");
        Ok(())
    }

    fn remove_node(&self, node_id: &str) -> SchedulerResult<Node> {
        let node = self
            .state
            .get_node(node_id)?
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        self.state.delete_node(node_id)?;
        info!(node = %node_id, "node removed");
        Ok(node)
    }

    fn list_nodes(&self) -> SchedulerResult<Vec<Node>> {
        Ok(self.state.list_nodes()?)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
