//! berth-state — the container store and node registry.
//!
//! Backed by [redb](https://docs.rs/redb). Every record is JSON-serialized
//! into a `&[u8]` value column keyed by its identifier: containers by the
//! engine-assigned container id, nodes by node id.
//!
//! Each write runs in its own write transaction, so updates are atomic per
//! record. No cross-record transaction is offered.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
