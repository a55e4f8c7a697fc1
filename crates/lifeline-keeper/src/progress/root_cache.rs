//! Cached copy of each document's root block
//!
//! The root block is the first thing to disappear when nobody fetches a
//! document. A local copy lets the engine reinsert it without a fetch.

use std::io::Write;
use std::path::PathBuf;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::key::DocumentId;

#[derive(Debug, Clone)]
pub struct RootCache {
    dir: PathBuf,
}

impl RootCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, id: DocumentId) -> PathBuf {
        self.dir.join(format!("root-{}.bin", id))
    }

    pub fn store(&self, id: DocumentId, payload: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(payload)?;
        file.persist(self.path(id)).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    pub fn load(&self, id: DocumentId) -> Result<Option<Bytes>> {
        match std::fs::read(self.path(id)) {
            Ok(payload) => Ok(Some(Bytes::from(payload))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(&self, id: DocumentId) -> Result<()> {
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_load_remove() {
        let dir = TempDir::new().unwrap();
        let cache = RootCache::new(dir.path().join("roots"));
        let id = DocumentId(9);

        assert!(cache.load(id).unwrap().is_none());
        cache.store(id, b"root block").unwrap();
        assert_eq!(cache.load(id).unwrap().unwrap(), Bytes::from_static(b"root block"));

        cache.remove(id).unwrap();
        cache.remove(id).unwrap();
        assert!(cache.load(id).unwrap().is_none());
    }
}
