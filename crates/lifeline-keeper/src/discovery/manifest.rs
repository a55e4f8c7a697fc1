//! Block manifest: the on-disk result of discovery
//!
//! One line per block, `key#segmentId#blockId#type`, where `type` is `d`
//! for data blocks and `c` for check blocks.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::key::{ContentKey, DocumentId};

/// A discovered block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub key: ContentKey,
    pub segment_id: u32,
    pub block_id: u32,
    pub is_data: bool,
}

impl fmt::Display for BlockEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}",
            self.key,
            self.segment_id,
            self.block_id,
            if self.is_data { 'd' } else { 'c' }
        )
    }
}

impl FromStr for BlockEntry {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        // Split from the right so a '#' inside the key survives.
        let mut fields = line.rsplitn(4, '#');
        let kind = fields.next().ok_or("empty line")?;
        let block_id = fields.next().ok_or("missing block id")?;
        let segment_id = fields.next().ok_or("missing segment id")?;
        let key = fields.next().ok_or("missing key")?;

        if key.is_empty() {
            return Err("empty key".into());
        }
        let is_data = match kind {
            "d" => true,
            "c" => false,
            other => return Err(format!("unknown block type {other:?}")),
        };
        Ok(Self {
            key: ContentKey::new(key),
            segment_id: segment_id
                .parse()
                .map_err(|_| format!("bad segment id {segment_id:?}"))?,
            block_id: block_id
                .parse()
                .map_err(|_| format!("bad block id {block_id:?}"))?,
            is_data,
        })
    }
}

/// All blocks of a document, grouped by segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockIndex {
    segments: BTreeMap<u32, Vec<BlockEntry>>,
    keys: HashSet<ContentKey>,
}

impl BlockIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; returns false if its key is already present
    pub fn insert(&mut self, entry: BlockEntry) -> bool {
        if !self.keys.insert(entry.key.clone()) {
            return false;
        }
        self.segments.entry(entry.segment_id).or_default().push(entry);
        true
    }

    /// Whether the key is present
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.keys.contains(key)
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether there are no blocks
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Highest segment id, `None` when empty
    pub fn max_segment_id(&self) -> Option<u32> {
        self.segments.keys().next_back().copied()
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Blocks of a segment ordered by block id; empty if unknown
    pub fn segment(&self, segment_id: u32) -> Vec<BlockEntry> {
        let mut entries = self.segments.get(&segment_id).cloned().unwrap_or_default();
        entries.sort_by_key(|entry| entry.block_id);
        entries
    }

    /// Entries in segment order
    pub fn iter(&self) -> impl Iterator<Item = &BlockEntry> {
        self.segments.values().flatten()
    }

    /// Render as manifest text
    pub fn to_manifest(&self) -> String {
        let mut out = String::new();
        for entry in self.iter() {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Parse manifest text
    pub fn from_manifest(text: &str) -> Result<Self> {
        let mut index = Self::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: BlockEntry = line.parse().map_err(|message| Error::Manifest {
                line: n + 1,
                message,
            })?;
            if !index.insert(entry) {
                return Err(Error::Manifest {
                    line: n + 1,
                    message: "duplicate key".into(),
                });
            }
        }
        Ok(index)
    }
}

/// Manifest files of all documents
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a document's manifest
    pub fn path(&self, id: DocumentId) -> PathBuf {
        self.dir.join(format!("manifest-{}.txt", id))
    }

    /// Load a manifest; `None` if none was written yet
    pub fn load(&self, id: DocumentId) -> Result<Option<BlockIndex>> {
        let path = self.path(id);
        match std::fs::read_to_string(&path) {
            Ok(text) => BlockIndex::from_manifest(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace a document's manifest
    pub fn save(&self, id: DocumentId, index: &BlockIndex) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)?;
        file.write_all(index.to_manifest().as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(self.path(id)).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Delete a document's manifest if present
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

    fn entry(key: &str, segment_id: u32, block_id: u32, is_data: bool) -> BlockEntry {
        BlockEntry {
            key: ContentKey::new(key),
            segment_id,
            block_id,
            is_data,
        }
    }

    #[test]
    fn test_entry_line_format() {
        assert_eq!(entry("CHK@a,b,c", 3, 7, false).to_string(), "CHK@a,b,c#3#7#c");
        let parsed: BlockEntry = "CHK@x#y#0#2#d".parse().unwrap();
        assert_eq!(parsed, entry("CHK@x#y", 0, 2, true));
    }

    #[test]
    fn test_entry_rejects_garbage() {
        assert!("CHK@a#1#2#x".parse::<BlockEntry>().is_err());
        assert!("CHK@a#one#2#d".parse::<BlockEntry>().is_err());
        assert!("#1#2#d".parse::<BlockEntry>().is_err());
        assert!("CHK@a".parse::<BlockEntry>().is_err());
    }

    #[test]
    fn test_index_dedup_and_segments() {
        let mut index = BlockIndex::new();
        assert!(index.insert(entry("CHK@0", 0, 0, true)));
        assert!(index.insert(entry("CHK@2", 1, 1, false)));
        assert!(index.insert(entry("CHK@1", 1, 0, true)));
        assert!(!index.insert(entry("CHK@1", 2, 0, true)));

        assert_eq!(index.len(), 3);
        assert_eq!(index.max_segment_id(), Some(1));
        let seg = index.segment(1);
        assert_eq!(seg[0].key, ContentKey::new("CHK@1"));
        assert_eq!(seg[1].key, ContentKey::new("CHK@2"));
        assert!(index.segment(2).is_empty());
    }

    #[test]
    fn test_manifest_error_reports_line() {
        let err = BlockIndex::from_manifest("CHK@a#0#0#d\nbroken\n").unwrap_err();
        assert!(matches!(err, Error::Manifest { line: 2, .. }));
    }

    #[test]
    fn test_store_save_load_remove() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path().join("manifests"));
        let id = DocumentId(4);
        assert!(store.load(id).unwrap().is_none());

        let mut index = BlockIndex::new();
        index.insert(entry("CHK@root", 0, 0, true));
        index.insert(entry("CHK@d0", 1, 0, true));
        index.insert(entry("CHK@c0", 1, 1, false));
        store.save(id, &index).unwrap();

        let text = std::fs::read_to_string(store.path(id)).unwrap();
        assert_eq!(text, "CHK@root#0#0#d\nCHK@d0#1#0#d\nCHK@c0#1#1#c\n");
        assert_eq!(store.load(id).unwrap().unwrap(), index);

        store.remove(id).unwrap();
        store.remove(id).unwrap();
        assert!(store.load(id).unwrap().is_none());
    }
}
