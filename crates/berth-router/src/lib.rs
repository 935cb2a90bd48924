//! berth-router — named traffic backends and the routes under them.
//!
//! A backend is an application's (or alias's) logical traffic target; a
//! route is one address registered under it. The provisioner keeps the
//! route sets in step with live container addresses.

pub mod error;
pub mod memory;

pub use error::{RouterError, RouterResult};
pub use memory::MemoryRouter;

/// Backend and route administration.
///
/// Every method is a single atomic step from a concurrent reader's point of
/// view. In particular `swap` and `replace_route` never expose an
/// intermediate state.
pub trait Router: Send + Sync {
    fn add_backend(&self, name: &str) -> RouterResult<()>;

    /// Remove a backend together with all of its routes.
    fn remove_backend(&self, name: &str) -> RouterResult<()>;

    fn add_route(&self, backend: &str, address: &str) -> RouterResult<()>;

    fn remove_route(&self, backend: &str, address: &str) -> RouterResult<()>;

    /// Replace `old` with `new` under `backend` in one step. When `old` is not
    /// registered, `new` is simply added.
    fn replace_route(&self, backend: &str, old: &str, new: &str) -> RouterResult<()>;

    /// External address of a backend.
    fn addr(&self, backend: &str) -> RouterResult<String>;

    /// Exchange the full route sets of two backends.
    fn swap(&self, a: &str, b: &str) -> RouterResult<()>;

    fn has_backend(&self, name: &str) -> bool;

    fn has_route(&self, backend: &str, address: &str) -> bool;

    /// Routes of a backend in registration order.
    fn routes(&self, backend: &str) -> RouterResult<Vec<String>>;
}
