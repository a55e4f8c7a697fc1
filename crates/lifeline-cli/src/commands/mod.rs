//! CLI command implementations
//!
//! Commands write their report to the given writer so they can be
//! exercised without a terminal.

pub mod config;
pub mod documents;
pub mod journal;
pub mod run;

use std::sync::Arc;

use anyhow::{Context, Result};
use lifeline_config::Config;
use lifeline_keeper::{JsonStateStore, ProgressTracker, RootCache, StateLayout};

/// Opened state directory
pub struct Workspace {
    pub layout: StateLayout,
    pub tracker: ProgressTracker,
}

impl Workspace {
    /// Open the registry under the configured state directory
    pub fn open(config: &Config) -> Result<Self> {
        let layout = StateLayout::new(&config.storage.state_dir);
        let store = Arc::new(JsonStateStore::new(layout.state_file()));
        let tracker = ProgressTracker::open(store).with_context(|| {
            format!("Failed to open state in {}", layout.root().display())
        })?;
        tracing::debug!(state_dir = %layout.root().display(), "opened state directory");
        Ok(Self { layout, tracker })
    }

    pub fn root_cache(&self) -> RootCache {
        RootCache::new(self.layout.roots_dir())
    }
}
