//! berth-core — configuration and shared types for the Berth provisioner.

pub mod config;
pub mod types;

pub use config::{BerthConfig, ConfigError};
pub use types::App;
