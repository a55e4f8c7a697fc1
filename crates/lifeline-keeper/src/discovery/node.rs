//! Decoded metadata nodes

use crate::client::ArchiveKind;
use crate::key::ContentKey;

/// A decoded metadata node of a document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentNode {
    /// Named children
    Manifest {
        /// Child nodes in declaration order
        entries: Vec<(String, ContentNode)>,
    },
    /// Sub-manifest stored inside the container archive
    ArchiveManifest {
        /// Container format
        kind: ArchiveKind,
        /// Path of the manifest inside the archive
        internal_name: String,
    },
    /// File stored inside the container archive
    ArchiveInternal {
        /// Path inside the archive
        name: String,
    },
    /// Points at another key
    Redirect {
        /// Target reference
        target: ContentKey,
    },
    /// Erasure-coded file
    Splitfile(Splitfile),
}

impl ContentNode {
    /// Short label for journal lines
    pub fn kind(&self) -> &'static str {
        match self {
            ContentNode::Manifest { .. } => "manifest",
            ContentNode::ArchiveManifest { .. } => "archive manifest",
            ContentNode::ArchiveInternal { .. } => "archive entry",
            ContentNode::Redirect { .. } => "redirect",
            ContentNode::Splitfile(_) => "splitfile",
        }
    }
}

/// Key lists of an erasure-coded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splitfile {
    /// Segments in order
    pub segments: Vec<SplitfileSegment>,
    /// Whether the content is further metadata that must be fetched and
    /// decoded before the tree below it is known
    pub nested: bool,
}

impl Splitfile {
    /// Plain splitfile holding file data
    pub fn simple(segments: Vec<SplitfileSegment>) -> Self {
        Self {
            segments,
            nested: false,
        }
    }

    /// Splitfile whose content is more metadata
    pub fn nested(segments: Vec<SplitfileSegment>) -> Self {
        Self {
            segments,
            nested: true,
        }
    }

    /// Total number of keys
    pub fn block_count(&self) -> usize {
        self.segments.iter().map(SplitfileSegment::len).sum()
    }
}

/// One segment of a splitfile
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SplitfileSegment {
    /// Data block keys
    pub data: Vec<ContentKey>,
    /// Check block keys
    pub check: Vec<ContentKey>,
}

impl SplitfileSegment {
    /// Create a segment from its key lists
    pub fn new(data: Vec<ContentKey>, check: Vec<ContentKey>) -> Self {
        Self { data, check }
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.len() + self.check.len()
    }

    /// Whether the segment has no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in declared order with their data flag
    pub fn keys(&self) -> impl Iterator<Item = (&ContentKey, bool)> {
        self.data
            .iter()
            .map(|key| (key, true))
            .chain(self.check.iter().map(|key| (key, false)))
    }
}
