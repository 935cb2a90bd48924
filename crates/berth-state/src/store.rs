//! StateStore — redb-backed persistence for Berth.
//!
//! Provides typed CRUD operations over container records and scheduler
//! nodes. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Closure turning a backend error into a `StateError` tagged with `op`.
macro_rules! map_err {
    (json $op:literal) => {
        |source: serde_json::Error| StateError::Codec { op: $op, source }
    };
    ($op:literal) => {
        |e| StateError::Storage {
            op: $op,
            message: e.to_string(),
        }
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!("open database"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!("open database"))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CONTAINERS).map_err(map_err!("open table"))?;
        txn.open_table(NODES).map_err(map_err!("open table"))?;
        txn.commit().map_err(map_err!("transaction"))?;
        Ok(())
    }

    // ── Containers ─────────────────────────────────────────────────

    /// Insert a new container record. Fails if the id is already stored.
    pub fn insert_container(&self, container: &Container) -> StateResult<()> {
        let value = serde_json::to_vec(container).map_err(map_err!(json "encode"))?;
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!("open table"))?;
            if table
                .get(container.id.as_str())
                .map_err(map_err!("read"))?
                .is_some()
            {
                return Err(StateError::AlreadyExists(container.id.clone()));
            }
            table
                .insert(container.id.as_str(), value.as_slice())
                .map_err(map_err!("write"))?;
        }
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(id = %container.id, app = %container.app_name, "container stored");
        Ok(())
    }

    /// Get a container by id.
    pub fn get_container(&self, id: &str) -> StateResult<Option<Container>> {
        self.get(CONTAINERS, id)
    }

    /// List all containers belonging to `app_name`, ordered by id.
    pub fn list_containers(&self, app_name: &str) -> StateResult<Vec<Container>> {
        let mut all: Vec<Container> = self.list(CONTAINERS)?;
        all.retain(|c| c.app_name == app_name);
        Ok(all)
    }

    /// List every stored container, ordered by id.
    pub fn list_all_containers(&self) -> StateResult<Vec<Container>> {
        self.list(CONTAINERS)
    }

    /// Apply a partial update to one container inside a single write
    /// transaction and return the updated record.
    pub fn update_container(&self, id: &str, update: ContainerUpdate) -> StateResult<Container> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let updated = {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!("open table"))?;
            let mut container: Container = match table.get(id).map_err(map_err!("read"))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(json "decode"))?
                }
                None => return Err(StateError::NotFound(id.to_string())),
            };
            update.apply(&mut container);
            let value = serde_json::to_vec(&container).map_err(map_err!(json "encode"))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!("write"))?;
            container
        };
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(%id, status = %updated.status, "container updated");
        Ok(updated)
    }

    /// Delete a container by id. Returns true if it existed.
    pub fn remove_container(&self, id: &str) -> StateResult<bool> {
        let existed = self.delete(CONTAINERS, id)?;
        debug!(%id, existed, "container removed");
        Ok(existed)
    }

    /// Delete every container of an app. Returns the number deleted.
    pub fn remove_containers_for_app(&self, app_name: &str) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let count;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!("open table"))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!("read"))? {
                let (key, value) = entry.map_err(map_err!("read"))?;
                let container: Container =
                    serde_json::from_slice(value.value()).map_err(map_err!(json "decode"))?;
                if container.app_name == app_name {
                    keys.push(key.value().to_string());
                }
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!("write"))?;
            }
            count = keys.len() as u32;
        }
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(app = %app_name, count, "containers removed for app");
        Ok(count)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Register a node. Fails if the id is already registered; the check and
    /// the write share one transaction.
    pub fn insert_node(&self, node: &Node) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(json "encode"))?;
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!("open table"))?;
            if table
                .get(node.id.as_str())
                .map_err(map_err!("read"))?
                .is_some()
            {
                return Err(StateError::NodeExists(node.id.clone()));
            }
            table
                .insert(node.id.as_str(), value.as_slice())
                .map_err(map_err!("write"))?;
        }
        txn.commit().map_err(map_err!("transaction"))?;
        debug!(node = %node.id, "node stored");
        Ok(())
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.get(NODES, node_id)
    }

    /// List all nodes, ordered by id.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.list(NODES)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.delete(NODES, node_id)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(table).map_err(map_err!("open table"))?;
        match table.get(key).map_err(map_err!("read"))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(json "decode"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!("transaction"))?;
        let table = txn.open_table(table).map_err(map_err!("open table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!("read"))? {
            let (_, value) = entry.map_err(map_err!("read"))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(json "decode"))?);
        }
        Ok(results)
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!("transaction"))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!("open table"))?;
            existed = table.remove(key).map_err(map_err!("write"))?.is_some();
        }
        txn.commit().map_err(map_err!("transaction"))?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_container(id: &str, app: &str) -> Container {
        Container {
            id: id.to_string(),
            app_name: app.to_string(),
            kind: "python".to_string(),
            ip: Some("10.10.10.1".to_string()),
            host_port: Some(49153),
            version: "a345fe".to_string(),
            status: ContainerStatus::Started,
            host: "node-1".to_string(),
        }
    }

    // ── Container CRUD ─────────────────────────────────────────────

    #[test]
    fn container_insert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let c = test_container("c-036", "starbreaker");

        store.insert_container(&c).unwrap();
        assert_eq!(store.get_container("c-036").unwrap(), Some(c));
    }

    #[test]
    fn container_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_container("nope").unwrap().is_none());
    }

    #[test]
    fn container_insert_duplicate_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_container(&test_container("c-1", "a")).unwrap();

        let err = store
            .insert_container(&test_container("c-1", "b"))
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(id) if id == "c-1"));
        // The original record is untouched.
        assert_eq!(store.get_container("c-1").unwrap().unwrap().app_name, "a");
    }

    #[test]
    fn container_list_by_app() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_container(&test_container("c-2", "web")).unwrap();
        store.insert_container(&test_container("c-1", "web")).unwrap();
        store.insert_container(&test_container("c-3", "api")).unwrap();

        let web = store.list_containers("web").unwrap();
        let ids: Vec<&str> = web.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
        assert_eq!(store.list_containers("api").unwrap().len(), 1);
        assert!(store.list_containers("none").unwrap().is_empty());
        assert_eq!(store.list_all_containers().unwrap().len(), 3);
    }

    #[test]
    fn container_update_partial() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_container(&test_container("c-1", "web")).unwrap();

        let updated = store
            .update_container(
                "c-1",
                ContainerUpdate {
                    ip: Some("127.0.0.1".to_string()),
                    host_port: Some(9024),
                    ..ContainerUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(updated.host_port, Some(9024));
        assert_eq!(updated.status, ContainerStatus::Started);

        let stored = store.get_container("c-1").unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn container_update_unknown_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .update_container("ghost", ContainerUpdate::status(ContainerStatus::Error))
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn container_remove_single() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_container(&test_container("c-1", "web")).unwrap();

        assert!(store.remove_container("c-1").unwrap());
        assert!(!store.remove_container("c-1").unwrap());
        assert!(store.get_container("c-1").unwrap().is_none());
    }

    #[test]
    fn container_remove_all_for_app() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_container(&test_container("c-1", "web")).unwrap();
        store.insert_container(&test_container("c-2", "web")).unwrap();
        store.insert_container(&test_container("c-3", "api")).unwrap();

        assert_eq!(store.remove_containers_for_app("web").unwrap(), 2);
        assert!(store.list_containers("web").unwrap().is_empty());
        // api untouched
        assert_eq!(store.list_containers("api").unwrap().len(), 1);
    }

    // ── Node CRUD ──────────────────────────────────────────────────

    #[test]
    fn node_insert_get_list_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_node(&Node::new("node-2", "http://10.0.0.2:2375")).unwrap();
        store.insert_node(&Node::new("node-1", "http://10.0.0.1:2375")).unwrap();

        let node = store.get_node("node-1").unwrap().unwrap();
        assert_eq!(node.address, "http://10.0.0.1:2375");

        let ids: Vec<String> = store.list_nodes().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["node-1", "node-2"]);

        let err = store
            .insert_node(&Node::new("node-1", "http://10.0.0.9:2375"))
            .unwrap_err();
        assert!(matches!(err, StateError::NodeExists(id) if id == "node-1"));
        assert_eq!(
            store.get_node("node-1").unwrap().unwrap().address,
            "http://10.0.0.1:2375"
        );

        assert!(store.delete_node("node-1").unwrap());
        assert!(!store.delete_node("node-1").unwrap());
        assert!(store.get_node("node-1").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("berth.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.insert_container(&test_container("c-1", "web")).unwrap();
            store.insert_node(&Node::new("node-1", "http://10.0.0.1:2375")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_containers("web").unwrap().len(), 1);
        assert_eq!(store.list_nodes().unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_all_containers().unwrap().is_empty());
        assert!(store.list_nodes().unwrap().is_empty());
        assert_eq!(store.remove_containers_for_app("any").unwrap(), 0);
        assert!(!store.remove_container("nope").unwrap());
        assert!(!store.delete_node("nope").unwrap());
    }
}
