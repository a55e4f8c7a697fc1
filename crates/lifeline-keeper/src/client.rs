//! Content-store client seam
//!
//! The keeper never talks to the network itself. Everything it needs from
//! the store goes through [`ContentClient`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::discovery::{ContentNode, Splitfile};
use crate::key::ContentKey;

/// Failures reported by the content store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Data not found
    #[error("not found: {0}")]
    NotFound(ContentKey),

    /// Request could not be routed or timed out inside the store
    #[error("transport failure: {0}")]
    Transport(String),

    /// Metadata could not be decoded
    #[error("decode failure: {0}")]
    Decode(String),

    /// The store refused the insert
    #[error("insert rejected: {0}")]
    Rejected(String),
}

/// Delivery priority for inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertPriority {
    /// Single-block segments (manifests, redirect targets)
    High,
    /// Blocks of multi-block segments
    Normal,
}

/// Answer to an edition lookup on a mutable reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditionLookup {
    /// The newest known edition
    Latest(ContentKey),
    /// The reference moved for good; look up again at the new location
    PermanentRedirect(ContentKey),
}

/// Container format holding a sub-manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveKind {
    Zip,
    Tar,
}

/// Content-store operations used by the keeper
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Fetch the payload of a key
    async fn fetch(&self, key: &ContentKey, ignore_local_cache: bool) -> Result<Bytes, ClientError>;

    /// Insert a payload; returns the key the store derived for it
    async fn insert(
        &self,
        key: &ContentKey,
        payload: Bytes,
        priority: InsertPriority,
    ) -> Result<ContentKey, ClientError>;

    /// Resolve a mutable reference to its newest edition
    async fn resolve_latest_edition(&self, reference: &ContentKey) -> Result<EditionLookup, ClientError>;

    /// Fetch a key and decode its metadata; `None` when the key holds plain data
    async fn fetch_node(&self, key: &ContentKey) -> Result<Option<ContentNode>, ClientError>;

    /// Extract the manifest stored inside an archive container
    async fn fetch_archive_node(
        &self,
        container: &ContentKey,
        kind: ArchiveKind,
        internal_name: &str,
    ) -> Result<Option<ContentNode>, ClientError>;

    /// Fetch a non-simple splitfile and decode the metadata it carries
    async fn fetch_and_decode_splitfile_descriptor(
        &self,
        splitfile: &Splitfile,
    ) -> Result<ContentNode, ClientError>;

    /// Canonical form of a reference
    fn normalize_key(&self, reference: &ContentKey) -> ContentKey;

    /// Whether the reference names immutable, content-addressed data
    fn is_content_addressed(&self, reference: &ContentKey) -> bool;

    /// Whether the reference has editions that can be looked up
    fn is_mutable(&self, reference: &ContentKey) -> bool;

    /// Payload length carried by the key itself, for stores whose keys
    /// record it. Rebuilt blocks are cut back to this length.
    fn payload_len(&self, _key: &ContentKey) -> Option<usize> {
        None
    }
}
