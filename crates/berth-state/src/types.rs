//! Domain types for the Berth state store.
//!
//! These types represent the persisted container records and scheduler
//! nodes, plus the derived `Unit` projection handed to the layer above.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier assigned to a container by the container engine.
pub type ContainerId = String;

/// Unique identifier for a node (host) in the fleet.
pub type NodeId = String;

// ── Container ──────────────────────────────────────────────────────

/// One running or starting instance of an application's image on a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub id: ContainerId,
    /// Owning application. Never changes once the record exists.
    pub app_name: String,
    /// Platform the container was launched from.
    #[serde(rename = "type")]
    pub kind: String,
    /// Container address, known once the engine reports it started.
    pub ip: Option<String>,
    /// Host port the application port is published on.
    pub host_port: Option<u16>,
    /// Deployed application revision.
    pub version: String,
    pub status: ContainerStatus,
    /// Node the container was placed on.
    pub host: NodeId,
}

impl Container {
    /// Project this record into the provisioning-facing view.
    pub fn to_unit(&self) -> Unit {
        Unit {
            name: self.id.clone(),
            app_name: self.app_name.clone(),
            kind: self.kind.clone(),
            machine: self.host.clone(),
            ip: self.ip.clone().unwrap_or_default(),
            status: self.status,
        }
    }
}

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Installing,
    Started,
    Error,
    Stopped,
}

impl ContainerStatus {
    /// Whether the provisioner may move a container from `self` to `next`.
    ///
    /// Re-asserting the current status is always allowed.
    pub fn can_transition_to(self, next: ContainerStatus) -> bool {
        use ContainerStatus::*;
        self == next
            || matches!(
                (self, next),
                (Created, Installing)
                    | (Created, Stopped)
                    | (Installing, Started)
                    | (Installing, Error)
                    | (Installing, Stopped)
                    | (Started, Stopped)
                    | (Error, Stopped)
            )
    }

    /// `Stopped` and `Error` are not left by the provisioner on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContainerStatus::Stopped | ContainerStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Installing => "installing",
            ContainerStatus::Started => "started",
            ContainerStatus::Error => "error",
            ContainerStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update applied to a stored container. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerUpdate {
    pub status: Option<ContainerStatus>,
    pub ip: Option<String>,
    pub host_port: Option<u16>,
    pub version: Option<String>,
}

impl ContainerUpdate {
    pub fn status(status: ContainerStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.ip.is_none()
            && self.host_port.is_none()
            && self.version.is_none()
    }

    pub(crate) fn apply(self, container: &mut Container) {
        if let Some(status) = self.status {
            container.status = status;
        }
        if let Some(ip) = self.ip {
            container.ip = Some(ip);
        }
        if let Some(port) = self.host_port {
            container.host_port = Some(port);
        }
        if let Some(version) = self.version {
            container.version = version;
        }
    }
}

// ── Unit ───────────────────────────────────────────────────────────

/// Provisioning-facing projection of a container. Never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub app_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub machine: String,
    pub ip: String,
    pub status: ContainerStatus,
}

// ── Node ───────────────────────────────────────────────────────────

/// A host capable of running containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Container engine endpoint, e.g. `http://10.0.0.1:2375`.
    pub address: String,
    /// Arbitrary labels for operators.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Unix timestamp (seconds) when the node was registered.
    #[serde(default)]
    pub registered_at: u64,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            labels: HashMap::new(),
            registered_at: 0,
        }
    }

    /// Bare host part of the engine endpoint (scheme, port and path removed).
    pub fn host(&self) -> &str {
        let rest = self
            .address
            .split_once("://")
            .map_or(self.address.as_str(), |(_, rest)| rest);
        let rest = rest.split('/').next().unwrap_or(rest);
        if let Some(bracketed) = rest.strip_prefix('[') {
            // IPv6 literal: [::1]:2375
            return bracketed.split(']').next().unwrap_or(bracketed);
        }
        rest.rsplit_once(':').map_or(rest, |(host, _)| host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Container {
        Container {
            id: "c-1".to_string(),
            app_name: "myapp".to_string(),
            kind: "python".to_string(),
            ip: None,
            host_port: None,
            version: "v1".to_string(),
            status: ContainerStatus::Created,
            host: "node-1".to_string(),
        }
    }

    #[test]
    fn status_machine_allows_happy_path() {
        use ContainerStatus::*;
        assert!(Created.can_transition_to(Installing));
        assert!(Installing.can_transition_to(Started));
        assert!(Started.can_transition_to(Stopped));
        assert!(Installing.can_transition_to(Error));
        assert!(Error.can_transition_to(Stopped));
    }

    #[test]
    fn status_machine_rejects_skips_and_reversals() {
        use ContainerStatus::*;
        assert!(!Created.can_transition_to(Started));
        assert!(!Started.can_transition_to(Installing));
        assert!(!Stopped.can_transition_to(Started));
        assert!(!Error.can_transition_to(Started));
    }

    #[test]
    fn terminal_states() {
        assert!(ContainerStatus::Stopped.is_terminal());
        assert!(ContainerStatus::Error.is_terminal());
        assert!(!ContainerStatus::Started.is_terminal());
    }

    #[test]
    fn container_serializes_kind_as_type() {
        let json = serde_json::to_value(container()).unwrap();
        assert_eq!(json["type"], "python");
        assert_eq!(json["status"], "created");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn update_applies_only_set_fields() {
        let mut c = container();
        ContainerUpdate {
            ip: Some("10.0.0.5".to_string()),
            host_port: Some(49153),
            ..ContainerUpdate::default()
        }
        .apply(&mut c);
        assert_eq!(c.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(c.host_port, Some(49153));
        assert_eq!(c.status, ContainerStatus::Created);
        assert_eq!(c.version, "v1");
        assert!(ContainerUpdate::default().is_empty());
    }

    #[test]
    fn unit_projection() {
        let mut c = container();
        c.ip = Some("10.0.0.5".to_string());
        let unit = c.to_unit();
        assert_eq!(unit.name, "c-1");
        assert_eq!(unit.machine, "node-1");
        assert_eq!(unit.ip, "10.0.0.5");

        let unit = container().to_unit();
        assert_eq!(unit.ip, "");
    }

    #[test]
    fn node_host_strips_scheme_and_port() {
        assert_eq!(Node::new("n", "http://10.0.0.1:2375").host(), "10.0.0.1");
        assert_eq!(Node::new("n", "tcp://docker.internal:2376/").host(), "docker.internal");
        assert_eq!(Node::new("n", "10.0.0.2").host(), "10.0.0.2");
        assert_eq!(Node::new("n", "http://[::1]:2375").host(), "::1");
    }
}
