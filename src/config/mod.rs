//! Configuration Management Module
//!
//! Listing, filtering, pooling and protection settings, persisted as JSON.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigError, ConfigStorage};
pub use types::{FsConfig, CONFIG_VERSION};
