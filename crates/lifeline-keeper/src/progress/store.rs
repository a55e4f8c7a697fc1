//! Durable state storage
//!
//! The whole registry is one JSON document. Saves are atomic: the new
//! state is written to a temporary file and renamed over the old one,
//! which is kept as `<name>.old` and used when the primary is unreadable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::record::DocumentRecord;
use crate::error::{Error, Result};
use crate::key::DocumentId;

/// Everything the keeper persists besides manifests and journals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Next document id to hand out
    pub next_id: u32,
    /// Document the engine is working on, if any
    pub active: Option<DocumentId>,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
}

/// Load and save [`PersistedState`]
pub trait StateStore: Send + Sync {
    /// Load the last saved state, or the empty state if nothing was saved
    fn load(&self) -> Result<PersistedState>;

    /// Durably replace the saved state
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    fn read(path: &Path) -> Result<Option<PersistedState>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<PersistedState> {
        match Self::read(&self.path) {
            Ok(Some(state)) => return Ok(state),
            Ok(None) => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "State file unreadable, trying backup"),
        }
        Ok(Self::read(&self.backup_path())?.unwrap_or_default())
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut file, state)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;

        if self.path.exists() {
            std::fs::copy(&self.path, self.backup_path())?;
        }
        file.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PersistedState>,
    saves: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed saves
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Copy of the last saved state
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<PersistedState> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock() = state.clone();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
