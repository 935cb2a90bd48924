//! berth-scheduler — picks the host a new container runs on.
//!
//! Placement is deliberately simple: any registered node can take any
//! container. The [`Scheduler`] trait also carries the node administration
//! surfaced by `berthd add-node`, `remove-node` and `list-nodes`.

pub mod error;
pub mod load_balancer;
pub mod round_robin;

use berth_state::Node;

pub use error::{SchedulerError, SchedulerResult};
pub use load_balancer::RoundRobinBalancer;
pub use round_robin::RoundRobinScheduler;

pub trait Scheduler: Send + Sync {
    /// Select a host for a new container of `app`.
    fn allocate(&self, app: &str) -> SchedulerResult<Node>;

    /// Register a node. Fails if the id is taken.
    fn add_node(&self, node: Node) -> SchedulerResult<()>;

    /// Unregister a node, returning what was stored.
    fn remove_node(&self, node_id: &str) -> SchedulerResult<Node>;

    /// Every registered node, ordered by id.
    fn list_nodes(&self) -> SchedulerResult<Vec<Node>>;
}
