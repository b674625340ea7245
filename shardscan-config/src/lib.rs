//! Configuration for shardscan runs.
//!
//! [`ShardscanConfig`] bundles the scan tuning from `shardscan-core` with the
//! connection, table and run settings the CLI needs. [`ShardscanConfig::load_from_env`]
//! resolves it from files, inline JSON and environment overrides and reports
//! where it came from as a [`ConfigSource`].

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigSource, error::ConfigError};
pub use models::{DatabaseConfig, LayoutConfig, RedisConfig, RunConfig, ShardscanConfig, TableConfig};
