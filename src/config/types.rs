//! Configuration types

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::listing::{ListFilter, SortOrder};
use crate::session::{AcquireMode, PoolConfig};
use crate::uri::Scheme;

/// Current config file version
pub const CONFIG_VERSION: u32 = 1;

/// Default listing timeout (15 seconds)
const DEFAULT_LISTING_TIMEOUT_MS: u64 = 15_000;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Listing timeout in milliseconds, 0 disables it
    #[serde(default = "default_listing_timeout_ms")]
    pub listing_timeout_ms: u64,

    /// Keep predicates applied to every listing
    #[serde(default)]
    pub filter: ListFilter,

    #[serde(default)]
    pub sort_order: SortOrder,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Directories that may not be deleted, renamed or moved.
    /// `None` uses the platform media folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_paths: Option<Vec<PathBuf>>,

    /// Per-protocol acquisition strategy overriding the protocol defaults
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub acquisition: HashMap<Scheme, AcquireMode>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_listing_timeout_ms() -> u64 {
    DEFAULT_LISTING_TIMEOUT_MS
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            listing_timeout_ms: DEFAULT_LISTING_TIMEOUT_MS,
            filter: ListFilter::default(),
            sort_order: SortOrder::default(),
            pool: PoolConfig::default(),
            protected_paths: None,
            acquisition: HashMap::new(),
        }
    }
}

impl FsConfig {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_millis(self.listing_timeout_ms)
    }
}
