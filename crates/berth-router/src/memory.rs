//! In-process route table.
//!
//! Holds every backend behind one `RwLock`, so multi-backend updates
//! (`swap`) and route replacement happen under a single write guard.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::Router;
use crate::error::{RouterError, RouterResult};

/// Route table kept in memory, keyed by backend name.
#[derive(Clone, Default)]
pub struct MemoryRouter {
    backends: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Router for MemoryRouter {
    fn add_backend(&self, name: &str) -> RouterResult<()> {
        let mut backends = self.backends.write().expect("backends lock");
        if backends.contains_key(name) {
            return Err(RouterError::BackendExists(name.to_string()));
        }
        backends.insert(name.to_string(), Vec::new());
        debug!(backend = name, "backend added");
        Ok(())
    }

    fn remove_backend(&self, name: &str) -> RouterResult<()> {
        let mut backends = self.backends.write().expect("backends lock");
        match backends.remove(name) {
            Some(routes) => {
                debug!(backend = name, routes = routes.len(), "backend removed");
                Ok(())
            }
            None => Err(RouterError::BackendNotFound(name.to_string())),
        }
    }

    fn add_route(&self, backend: &str, address: &str) -> RouterResult<()> {
        let mut backends = self.backends.write().expect("backends lock");
        let routes = backends
            .get_mut(backend)
            .ok_or_else(|| RouterError::BackendNotFound(backend.to_string()))?;
        if !routes.iter().any(|r| r == address) {
            routes.push(address.to_string());
            debug!(backend, address, "route added");
        }
        Ok(())
    }

    fn remove_route(&self, backend: &str, address: &str) -> RouterResult<()> {
        let mut backends = self.backends.write().expect("backends lock");
        let routes = backends
            .get_mut(backend)
            .ok_or_else(|| RouterError::BackendNotFound(backend.to_string()))?;
        let before = routes.len();
        routes.retain(|r| r != address);
        if routes.len() == before {
            return Err(RouterError::RouteNotFound {
                backend: backend.to_string(),
                address: address.to_string(),
            });
        }
        debug!(backend, address, "route removed");
        Ok(())
    }

    fn replace_route(&self, backend: &str, old: &str, new: &str) -> RouterResult<()> {
        let mut backends = self.backends.write().expect("backends lock");
        let routes = backends
            .get_mut(backend)
            .ok_or_else(|| RouterError::BackendNotFound(backend.to_string()))?;
        let has_new = routes.iter().any(|r| r == new);
        match routes.iter().position(|r| r == old) {
            Some(idx) if has_new => {
                routes.remove(idx);
            }
            Some(idx) => routes[idx] = new.to_string(),
            None if !has_new => routes.push(new.to_string()),
            None => {}
        }
        debug!(backend, old, new, "route replaced");
        Ok(())
    }

    fn addr(&self, backend: &str) -> RouterResult<String> {
        let backends = self.backends.read().expect("backends lock");
        let routes = backends
            .get(backend)
            .ok_or_else(|| RouterError::BackendNotFound(backend.to_string()))?;
        routes
            .first()
            .cloned()
            .ok_or_else(|| RouterError::NoRoutes(backend.to_string()))
    }

    fn swap(&self, a: &str, b: &str) -> RouterResult<()> {
        let mut backends = self.backends.write().expect("backends lock");
        for name in [a, b] {
            if !backends.contains_key(name) {
                return Err(RouterError::BackendNotFound(name.to_string()));
            }
        }
        if a == b {
            return Ok(());
        }
        let routes_a = backends.get_mut(a).map(std::mem::take).unwrap_or_default();
        let routes_b = backends
            .get_mut(b)
            .map(|routes| std::mem::replace(routes, routes_a))
            .unwrap_or_default();
        if let Some(routes) = backends.get_mut(a) {
            *routes = routes_b;
        }
        debug!(a, b, "backends swapped");
        Ok(())
    }

    fn has_backend(&self, name: &str) -> bool {
        let backends = self.backends.read().expect("backends lock");
        backends.contains_key(name)
    }

    fn has_route(&self, backend: &str, address: &str) -> bool {
        let backends = self.backends.read().expect("backends lock");
        backends
            .get(backend)
            .is_some_and(|routes| routes.iter().any(|r| r == address))
    }

    fn routes(&self, backend: &str) -> RouterResult<Vec<String>> {
        let backends = self.backends.read().expect("backends lock");
        backends
            .get(backend)
            .cloned()
            .ok_or_else(|| RouterError::BackendNotFound(backend.to_string()))
    }
}
