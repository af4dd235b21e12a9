//! The storage interface behind the HTTP protocol.
//!
//! The protocol layer only ever talks to a [`Backend`]; the in-memory
//! [`MemoryRegistry`](crate::MemoryRegistry) is the stock implementation.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::listing::Listing;
use crate::reference::Reference;
use crate::request::Page;

/// Stored content together with its descriptor.
#[derive(Debug, Clone)]
pub struct Content {
    /// Descriptor of `data`
    pub descriptor: Descriptor,
    /// The bytes
    pub data: Bytes,
    /// When the content was last written, if the backend tracks it
    pub modified: Option<DateTime<Utc>>,
}

/// What is known about a stored manifest, without its bytes.
#[derive(Debug, Clone)]
pub struct ManifestMetadata {
    /// Descriptor of the manifest
    pub descriptor: Descriptor,
    /// When the manifest was last pushed, if the backend tracks it
    pub modified: Option<DateTime<Utc>>,
}

/// Progress of an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadStatus {
    /// Opaque session identifier
    pub id: String,
    /// Repository the session belongs to
    pub repo: String,
    /// Number of bytes received so far, which is also where the next
    /// chunk must start
    pub offset: u64,
}

/// Result of storing a manifest.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    /// Descriptor of the stored manifest
    pub descriptor: Descriptor,
    /// Digest of the manifest's `subject`, if it has one
    pub subject: Option<Digest>,
}

/// A registry storage backend.
///
/// Every method is scoped to a single repository, except for
/// [`Backend::repositories`] and [`Backend::mount_blob`].
#[async_trait::async_trait]
pub trait Backend: fmt::Debug + Send + Sync {
    /// Fetch a blob.
    async fn get_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Content>;

    /// Describe a blob without returning its content.
    async fn resolve_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Descriptor>;

    /// Remove a blob from a repository.
    async fn delete_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<()>;

    /// Store a whole blob, verifying it against `digest`.
    async fn push_blob(&self, repo: &str, digest: &Digest, data: Bytes)
    -> RegistryResult<Descriptor>;

    /// Make a blob from `from` available in `to` without transferring it.
    async fn mount_blob(&self, from: &str, to: &str, digest: &Digest)
    -> RegistryResult<Descriptor>;

    /// Open a new upload session.
    async fn start_upload(&self, repo: &str) -> RegistryResult<UploadStatus>;

    /// Report how much of an upload has been received.
    async fn upload_info(&self, repo: &str, id: &str) -> RegistryResult<UploadStatus>;

    /// Append a chunk to an upload session.
    ///
    /// When `offset` is given it must equal the session's current length.
    async fn upload_chunk(
        &self,
        repo: &str,
        id: &str,
        offset: Option<u64>,
        data: Bytes,
    ) -> RegistryResult<UploadStatus>;

    /// Append an optional final chunk, verify the whole upload against
    /// `digest` and commit it as a blob. The session is gone afterwards,
    /// whether or not the digest matched.
    async fn complete_upload(
        &self,
        repo: &str,
        id: &str,
        digest: &Digest,
        offset: Option<u64>,
        data: Bytes,
    ) -> RegistryResult<Descriptor>;

    /// Discard an upload session without committing anything.
    async fn cancel_upload(&self, repo: &str, id: &str) -> RegistryResult<()>;

    /// Fetch a manifest by tag or digest.
    async fn get_manifest(&self, repo: &str, reference: &Reference) -> RegistryResult<Content>;

    /// Describe a manifest without returning its content.
    async fn resolve_manifest(
        &self,
        repo: &str,
        reference: &Reference,
    ) -> RegistryResult<ManifestMetadata>;

    /// Validate and store a manifest under `reference` and its own digest.
    async fn put_manifest(
        &self,
        repo: &str,
        reference: &Reference,
        data: Bytes,
        media_type: Option<&str>,
    ) -> RegistryResult<StoredManifest>;

    /// Remove exactly the entry stored under `reference`.
    async fn delete_manifest(&self, repo: &str, reference: &Reference) -> RegistryResult<()>;

    /// List tags in lexical order.
    async fn tags(&self, repo: &str, page: &Page) -> RegistryResult<Listing>;

    /// List repositories in lexical order.
    async fn repositories(&self, page: &Page) -> RegistryResult<Listing>;

    /// Descriptors of every manifest whose `subject` is `digest`.
    async fn referrers(
        &self,
        repo: &str,
        digest: &Digest,
        artifact_type: Option<&str>,
    ) -> RegistryResult<Vec<Descriptor>>;
}
