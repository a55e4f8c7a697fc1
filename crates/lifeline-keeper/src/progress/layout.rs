//! On-disk layout of the keeper state directory
//!
//! ```text
//! <state_dir>/
//! ├── state.json            registry, cursors, counters, history
//! ├── state.json.old        previous registry
//! ├── manifests/            manifest-<id>.txt
//! ├── journals/             journal-<id>.log
//! └── roots/                root-<id>.bin
//! ```

use std::path::{Path, PathBuf};

use crate::discovery::ManifestStore;
use crate::key::DocumentId;

#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn manifests(&self) -> ManifestStore {
        ManifestStore::new(self.root.join("manifests"))
    }

    pub fn journal(&self, id: DocumentId) -> PathBuf {
        self.root.join("journals").join(format!("journal-{}.log", id))
    }

    pub fn roots_dir(&self) -> PathBuf {
        self.root.join("roots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StateLayout::new("/var/lib/lifeline");
        assert_eq!(layout.state_file(), PathBuf::from("/var/lib/lifeline/state.json"));
        assert_eq!(
            layout.journal(DocumentId(4)),
            PathBuf::from("/var/lib/lifeline/journals/journal-4.log")
        );
        assert_eq!(
            layout.manifests().path(DocumentId(4)),
            PathBuf::from("/var/lib/lifeline/manifests/manifest-4.txt")
        );
    }
}
