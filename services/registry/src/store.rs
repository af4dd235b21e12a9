//! In-memory content-addressable store
//!
//! All registry state sits behind one lock. Request bodies are read and
//! parsed before the lock is taken, so it is only held for map lookups and
//! mutations. Upload sessions have locks of their own: chunks are copied and
//! hashed with only the session locked.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::backend::{Backend, Content, ManifestMetadata, StoredManifest, UploadStatus};
use crate::descriptor::{Descriptor, OCTET_STREAM};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::listing::{self, Candidate, Listing};
use crate::reference::{Reference, Tag, is_valid_repository};
use crate::request::Page;
use crate::upload::Uploads;
use crate::validate;

/// A manifest as stored under one key.
#[derive(Debug)]
struct ManifestEntry {
    media_type: String,
    digest: Digest,
    data: Bytes,
    updated: DateTime<Utc>,
}

impl ManifestEntry {
    fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.media_type.clone(), self.digest.clone(), self.data.len() as u64)
    }

    fn content(&self) -> Content {
        Content {
            descriptor: self.descriptor(),
            data: self.data.clone(),
            modified: Some(self.updated),
        }
    }

    fn metadata(&self) -> ManifestMetadata {
        ManifestMetadata {
            descriptor: self.descriptor(),
            modified: Some(self.updated),
        }
    }
}

/// One repository's content.
///
/// Tag keys and digest keys live in separate maps, so the kind of a key is
/// always explicit. A manifest pushed by tag is stored under both.
#[derive(Debug, Default)]
struct Repository {
    tags: BTreeMap<Tag, Arc<ManifestEntry>>,
    manifests: HashMap<Digest, Arc<ManifestEntry>>,
    blobs: HashMap<Digest, Bytes>,
}

impl Repository {
    fn manifest(&self, reference: &Reference) -> Option<&Arc<ManifestEntry>> {
        match reference {
            Reference::Tag(tag) => self.tags.get(tag),
            Reference::Digest(digest) => self.manifests.get(digest),
        }
    }

    fn blob(&self, digest: &Digest) -> RegistryResult<&Bytes> {
        self.blobs
            .get(digest)
            .ok_or_else(|| RegistryError::BlobUnknown(digest.clone()))
    }
}

fn blob_descriptor(digest: &Digest, data: &Bytes) -> Descriptor {
    Descriptor::new(OCTET_STREAM, digest.clone(), data.len() as u64)
}

#[derive(Debug, Default)]
struct State {
    repos: BTreeMap<String, Repository>,
    uploads: Uploads,
}

impl State {
    fn repository(&self, name: &str) -> RegistryResult<&Repository> {
        self.repos
            .get(name)
            .ok_or_else(|| RegistryError::NameUnknown(name.to_string()))
    }

    fn repository_mut(&mut self, name: &str) -> RegistryResult<&mut Repository> {
        self.repos
            .get_mut(name)
            .ok_or_else(|| RegistryError::NameUnknown(name.to_string()))
    }

    /// Get a repository for writing, creating it on first use.
    fn create_repository(&mut self, name: &str) -> RegistryResult<&mut Repository> {
        if !is_valid_repository(name) {
            return Err(RegistryError::NameInvalid(name.to_string()));
        }
        if !self.repos.contains_key(name) {
            tracing::debug!(repo = name, "creating repository");
        }
        Ok(self.repos.entry(name.to_string()).or_default())
    }
}

/// A registry held entirely in memory.
///
/// Nothing survives the process; intended for tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryRegistry {
    #[tracing::instrument(skip(self), fields(%digest))]
    async fn get_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Content> {
        let state = self.state.lock();
        let data = state.repository(repo)?.blob(digest)?;
        Ok(Content {
            descriptor: blob_descriptor(digest, data),
            data: data.clone(),
            modified: None,
        })
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn resolve_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Descriptor> {
        let state = self.state.lock();
        let data = state.repository(repo)?.blob(digest)?;
        Ok(blob_descriptor(digest, data))
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn delete_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<()> {
        let mut state = self.state.lock();
        state
            .repository_mut(repo)?
            .blobs
            .remove(digest)
            .map(|_| ())
            .ok_or_else(|| RegistryError::BlobUnknown(digest.clone()))
    }

    #[tracing::instrument(skip(self, data), fields(%digest, size = data.len()))]
    async fn push_blob(
        &self,
        repo: &str,
        digest: &Digest,
        data: Bytes,
    ) -> RegistryResult<Descriptor> {
        digest
            .verify(&data)
            .map_err(|actual| RegistryError::DigestMismatch {
                expected: digest.clone(),
                actual,
            })?;

        let descriptor = blob_descriptor(digest, &data);
        let mut state = self.state.lock();
        state
            .create_repository(repo)?
            .blobs
            .insert(digest.clone(), data);
        Ok(descriptor)
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn mount_blob(&self, from: &str, to: &str, digest: &Digest) -> RegistryResult<Descriptor> {
        let mut state = self.state.lock();
        let data = state
            .repos
            .get(from)
            .and_then(|repo| repo.blobs.get(digest))
            .cloned()
            .ok_or_else(|| RegistryError::BlobUnknown(digest.clone()))?;

        let descriptor = blob_descriptor(digest, &data);
        state
            .create_repository(to)?
            .blobs
            .insert(digest.clone(), data);
        Ok(descriptor)
    }

    #[tracing::instrument(skip(self))]
    async fn start_upload(&self, repo: &str) -> RegistryResult<UploadStatus> {
        if !is_valid_repository(repo) {
            return Err(RegistryError::NameInvalid(repo.to_string()));
        }
        let status = self.state.lock().uploads.start(repo);
        tracing::debug!(id = %status.id, "upload session started");
        Ok(status)
    }

    #[tracing::instrument(skip(self))]
    async fn upload_info(&self, repo: &str, id: &str) -> RegistryResult<UploadStatus> {
        let session = self.state.lock().uploads.get(repo, id)?;
        let status = session.lock().status();
        Ok(status)
    }

    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn upload_chunk(
        &self,
        repo: &str,
        id: &str,
        offset: Option<u64>,
        data: Bytes,
    ) -> RegistryResult<UploadStatus> {
        let session = self.state.lock().uploads.get(repo, id)?;
        let mut session = session.lock();
        let previous = session.state();
        session.append(offset, &data)?;
        tracing::trace!(?previous, now = ?session.state(), offset = session.offset(), "chunk accepted");
        Ok(session.status())
    }

    #[tracing::instrument(skip(self, data), fields(%digest, size = data.len()))]
    async fn complete_upload(
        &self,
        repo: &str,
        id: &str,
        digest: &Digest,
        offset: Option<u64>,
        data: Bytes,
    ) -> RegistryResult<Descriptor> {
        if !data.is_empty() || offset.is_some() {
            let session = self.state.lock().uploads.get(repo, id)?;
            session.lock().append(offset, &data)?;
        }

        // From here on the session is gone, whether or not the digest matches.
        let session = self.state.lock().uploads.take(repo, id)?;
        let blob = session.lock().finish(digest)?;
        let descriptor = blob_descriptor(digest, &blob);
        self.state
            .lock()
            .create_repository(repo)?
            .blobs
            .insert(digest.clone(), blob);
        Ok(descriptor)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_upload(&self, repo: &str, id: &str) -> RegistryResult<()> {
        self.state.lock().uploads.take(repo, id)?;
        tracing::debug!("upload session discarded");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(%reference))]
    async fn get_manifest(&self, repo: &str, reference: &Reference) -> RegistryResult<Content> {
        let state = self.state.lock();
        state
            .repository(repo)?
            .manifest(reference)
            .map(|entry| entry.content())
            .ok_or_else(|| RegistryError::ManifestUnknown(reference.to_string()))
    }

    #[tracing::instrument(skip(self), fields(%reference))]
    async fn resolve_manifest(
        &self,
        repo: &str,
        reference: &Reference,
    ) -> RegistryResult<ManifestMetadata> {
        let state = self.state.lock();
        state
            .repository(repo)?
            .manifest(reference)
            .map(|entry| entry.metadata())
            .ok_or_else(|| RegistryError::ManifestUnknown(reference.to_string()))
    }

    #[tracing::instrument(skip(self, data), fields(%reference, size = data.len()))]
    async fn put_manifest(
        &self,
        repo: &str,
        reference: &Reference,
        data: Bytes,
        media_type: Option<&str>,
    ) -> RegistryResult<StoredManifest> {
        let digest = match reference {
            Reference::Digest(expected) => {
                expected
                    .verify(&data)
                    .map_err(|actual| RegistryError::DigestMismatch {
                        expected: expected.clone(),
                        actual,
                    })?;
                expected.clone()
            }
            Reference::Tag(_) => Digest::sha256(&data),
        };
        let inspected = validate::inspect(media_type, &data)?;
        let subject = inspected
            .fields
            .as_ref()
            .and_then(|fields| fields.subject.as_ref())
            .map(|subject| subject.digest.clone());

        let mut state = self.state.lock();
        validate::check_references(&inspected.required, |child| {
            state
                .repos
                .get(repo)
                .is_some_and(|repository| repository.manifests.contains_key(child))
        })?;

        let entry = Arc::new(ManifestEntry {
            media_type: inspected.media_type,
            digest: digest.clone(),
            data,
            updated: Utc::now(),
        });
        let descriptor = entry.descriptor();

        let repository = state.create_repository(repo)?;
        if let Some(previous) = repository.manifests.insert(digest, entry.clone()) {
            tracing::debug!(previous = %previous.updated, "refreshed existing manifest");
        }
        if let Reference::Tag(tag) = reference {
            repository.tags.insert(tag.clone(), entry);
        }

        Ok(StoredManifest {
            descriptor,
            subject,
        })
    }

    #[tracing::instrument(skip(self), fields(%reference))]
    async fn delete_manifest(&self, repo: &str, reference: &Reference) -> RegistryResult<()> {
        let mut state = self.state.lock();
        let repository = state.repository_mut(repo)?;
        let removed = match reference {
            Reference::Tag(tag) => repository.tags.remove(tag),
            Reference::Digest(digest) => repository.manifests.remove(digest),
        };
        removed
            .map(|_| ())
            .ok_or_else(|| RegistryError::ManifestUnknown(reference.to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn tags(&self, repo: &str, page: &Page) -> RegistryResult<Listing> {
        let state = self.state.lock();
        let tags = state
            .repository(repo)?
            .tags
            .keys()
            .map(|tag| tag.to_string());
        Ok(Listing::paginate(tags, page))
    }

    #[tracing::instrument(skip(self))]
    async fn repositories(&self, page: &Page) -> RegistryResult<Listing> {
        let state = self.state.lock();
        Ok(Listing::paginate(state.repos.keys().cloned(), page))
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn referrers(
        &self,
        repo: &str,
        digest: &Digest,
        artifact_type: Option<&str>,
    ) -> RegistryResult<Vec<Descriptor>> {
        let entries: Vec<Arc<ManifestEntry>> = {
            let state = self.state.lock();
            state.repository(repo)?.manifests.values().cloned().collect()
        };
        let candidates = entries.iter().map(|entry| Candidate {
            digest: &entry.digest,
            media_type: &entry.media_type,
            data: &entry.data,
        });
        Ok(listing::referrers(candidates, digest, artifact_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::descriptor::{OCI_INDEX, OCI_MANIFEST};

    fn tag(name: &str) -> Reference {
        name.parse().unwrap()
    }

    fn image(marker: &str) -> Bytes {
        Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "schemaVersion": 2,
                "mediaType": OCI_MANIFEST,
                "config": {
                    "mediaType": "application/vnd.oci.image.config.v1+json",
                    "size": 2,
                    "digest": Digest::sha256(b"{}"),
                },
                "layers": [],
                "annotations": { "marker": marker },
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_blob_storage() {
        let registry = MemoryRegistry::new();
        let data = Bytes::from_static(b"test data");
        let digest = Digest::sha256(&data);

        registry.push_blob("repo", &digest, data.clone()).await.unwrap();

        let content = registry.get_blob("repo", &digest).await.unwrap();
        assert_eq!(content.data, data);
        assert_eq!(content.descriptor.size, data.len() as u64);
        assert_eq!(content.descriptor.digest, digest);

        registry.delete_blob("repo", &digest).await.unwrap();
        assert!(matches!(
            registry.resolve_blob("repo", &digest).await,
            Err(RegistryError::BlobUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_blob_digest_verification() {
        let registry = MemoryRegistry::new();
        let wrong = Digest::sha256(b"something else");

        let result = registry
            .push_blob("repo", &wrong, Bytes::from_static(b"test data"))
            .await;
        assert!(matches!(result, Err(RegistryError::DigestMismatch { .. })));
        // Nothing was written, so the repository was never created.
        assert!(matches!(
            registry.get_blob("repo", &wrong).await,
            Err(RegistryError::NameUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_repository() {
        let registry = MemoryRegistry::new();
        assert!(matches!(
            registry.get_manifest("nope", &tag("latest")).await,
            Err(RegistryError::NameUnknown(_))
        ));
        assert!(matches!(
            registry.tags("nope", &Page::default()).await,
            Err(RegistryError::NameUnknown(_))
        ));
        assert!(matches!(
            registry.delete_manifest("nope", &tag("latest")).await,
            Err(RegistryError::NameUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_dual_addressing() {
        let registry = MemoryRegistry::new();
        let manifest = image("one");

        let stored = registry
            .put_manifest("repo", &tag("v1"), manifest.clone(), Some(OCI_MANIFEST))
            .await
            .unwrap();
        let digest = stored.descriptor.digest.clone();
        assert_eq!(digest, Digest::sha256(&manifest));

        let by_tag = registry.get_manifest("repo", &tag("v1")).await.unwrap();
        let by_digest = registry
            .get_manifest("repo", &Reference::Digest(digest.clone()))
            .await
            .unwrap();
        assert_eq!(by_tag.data, manifest);
        assert_eq!(by_digest.data, manifest);
        assert_eq!(by_tag.descriptor, by_digest.descriptor);

        registry.delete_manifest("repo", &tag("v1")).await.unwrap();
        assert!(matches!(
            registry.get_manifest("repo", &tag("v1")).await,
            Err(RegistryError::ManifestUnknown(_))
        ));
        let still_there = registry
            .get_manifest("repo", &Reference::Digest(digest))
            .await
            .unwrap();
        assert_eq!(still_there.data, manifest);
    }

    #[tokio::test]
    async fn test_delete_by_digest_leaves_tag() {
        let registry = MemoryRegistry::new();
        let manifest = image("two");
        let stored = registry
            .put_manifest("repo", &tag("v2"), manifest.clone(), None)
            .await
            .unwrap();

        registry
            .delete_manifest("repo", &stored.descriptor.digest.clone().into())
            .await
            .unwrap();
        let by_tag = registry.get_manifest("repo", &tag("v2")).await.unwrap();
        assert_eq!(by_tag.data, manifest);

        assert!(matches!(
            registry
                .delete_manifest("repo", &stored.descriptor.digest.into())
                .await,
            Err(RegistryError::ManifestUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_put_by_digest() {
        let registry = MemoryRegistry::new();
        let manifest = image("three");
        let digest = Digest::sha256(&manifest);

        let wrong = Digest::sha256(b"wrong");
        assert!(matches!(
            registry
                .put_manifest("repo", &wrong.into(), manifest.clone(), None)
                .await,
            Err(RegistryError::DigestMismatch { .. })
        ));

        registry
            .put_manifest("repo", &digest.clone().into(), manifest, None)
            .await
            .unwrap();
        let tags = registry.tags("repo", &Page::default()).await.unwrap();
        assert!(tags.items.is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_reput() {
        let registry = MemoryRegistry::new();
        let manifest = image("same");

        let first = registry
            .put_manifest("repo", &tag("latest"), manifest.clone(), None)
            .await
            .unwrap();
        let second = registry
            .put_manifest("repo", &tag("latest"), manifest, None)
            .await
            .unwrap();
        assert_eq!(first.descriptor.digest, second.descriptor.digest);
    }

    #[tokio::test]
    async fn test_tag_moves_to_latest_content() {
        let registry = MemoryRegistry::new();
        registry
            .put_manifest("repo", &tag("latest"), image("old"), None)
            .await
            .unwrap();
        let new = registry
            .put_manifest("repo", &tag("latest"), image("new"), None)
            .await
            .unwrap();

        let current = registry.resolve_manifest("repo", &tag("latest")).await.unwrap();
        assert_eq!(current.descriptor.digest, new.descriptor.digest);
    }

    #[tokio::test]
    async fn test_reput_refreshes_modified_time() {
        let registry = MemoryRegistry::new();
        let manifest = image("again");

        registry
            .put_manifest("repo", &tag("latest"), manifest.clone(), None)
            .await
            .unwrap();
        let first = registry
            .resolve_manifest("repo", &tag("latest"))
            .await
            .unwrap()
            .modified
            .unwrap();

        let stored = registry
            .put_manifest("repo", &tag("latest"), manifest, None)
            .await
            .unwrap();
        let second = registry
            .resolve_manifest("repo", &tag("latest"))
            .await
            .unwrap()
            .modified
            .unwrap();
        assert!(second > first);

        // Both keys see the refreshed entry.
        let by_digest = registry
            .get_manifest("repo", &stored.descriptor.digest.into())
            .await
            .unwrap();
        assert_eq!(by_digest.modified, Some(second));
    }

    #[tokio::test]
    async fn test_index_validation() {
        let registry = MemoryRegistry::new();
        let child = image("child");
        let child_digest = Digest::sha256(&child);
        let index = Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "schemaVersion": 2,
                "mediaType": OCI_INDEX,
                "manifests": [{
                    "mediaType": OCI_MANIFEST,
                    "size": child.len(),
                    "digest": child_digest,
                }],
            }))
            .unwrap(),
        );

        let err = registry
            .put_manifest("repo", &tag("multi"), index.clone(), Some(OCI_INDEX))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SubManifestUnknown(ref d) if *d == child_digest));

        registry
            .put_manifest("repo", &child_digest.clone().into(), child, Some(OCI_MANIFEST))
            .await
            .unwrap();
        let stored = registry
            .put_manifest("repo", &tag("multi"), index, Some(OCI_INDEX))
            .await
            .unwrap();
        assert_eq!(stored.descriptor.media_type, OCI_INDEX);
    }

    #[tokio::test]
    async fn test_invalid_image_manifest() {
        let registry = MemoryRegistry::new();
        let err = registry
            .put_manifest("repo", &tag("bad"), Bytes::from_static(b"{"), Some(OCI_MANIFEST))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ManifestInvalid(_)));
    }

    #[tokio::test]
    async fn test_list_tags() {
        let registry = MemoryRegistry::new();
        for name in ["d", "b", "a", "c"] {
            registry
                .put_manifest("repo", &tag(name), image(name), None)
                .await
                .unwrap();
        }

        let all = registry.tags("repo", &Page::default()).await.unwrap();
        assert_eq!(all.items, vec!["a", "b", "c", "d"]);

        let page = Page {
            n: Some(1),
            last: Some("b".into()),
        };
        let listing = registry.tags("repo", &page).await.unwrap();
        assert_eq!(listing.items, vec!["c"]);
        assert_eq!(listing.next.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_catalog_is_sorted() {
        let registry = MemoryRegistry::new();
        for repo in ["zeta", "alpha/one", "mid"] {
            let data = Bytes::from(repo.as_bytes().to_vec());
            registry
                .push_blob(repo, &Digest::sha256(&data), data)
                .await
                .unwrap();
        }

        let listing = registry.repositories(&Page::default()).await.unwrap();
        assert_eq!(listing.items, vec!["alpha/one", "mid", "zeta"]);

        let page = Page {
            n: Some(2),
            last: None,
        };
        let first = registry.repositories(&page).await.unwrap();
        assert_eq!(first.items, vec!["alpha/one", "mid"]);
        let page = Page {
            n: Some(2),
            last: first.next,
        };
        let second = registry.repositories(&page).await.unwrap();
        assert_eq!(second.items, vec!["zeta"]);
        assert_eq!(second.next, None);
    }

    #[tokio::test]
    async fn test_chunked_upload() {
        let registry = MemoryRegistry::new();
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let digest = Digest::sha256(&data);

        let status = registry.start_upload("repo").await.unwrap();
        let status = registry
            .upload_chunk("repo", &status.id, Some(0), Bytes::copy_from_slice(&data[..100]))
            .await
            .unwrap();
        assert_eq!(status.offset, 100);

        let err = registry
            .upload_chunk("repo", &status.id, Some(50), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UploadRangeInvalid { expected: 100, offset: 50 }));

        registry
            .upload_chunk("repo", &status.id, Some(100), Bytes::copy_from_slice(&data[100..]))
            .await
            .unwrap();
        assert_eq!(registry.upload_info("repo", &status.id).await.unwrap().offset, 250);

        let descriptor = registry
            .complete_upload("repo", &status.id, &digest, None, Bytes::new())
            .await
            .unwrap();
        assert_eq!(descriptor.size, 250);
        assert_eq!(registry.get_blob("repo", &digest).await.unwrap().data, data);

        assert!(matches!(
            registry.upload_info("repo", &status.id).await,
            Err(RegistryError::BlobUploadUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_with_wrong_digest_stores_nothing() {
        let registry = MemoryRegistry::new();
        let status = registry.start_upload("repo").await.unwrap();
        registry
            .upload_chunk("repo", &status.id, None, Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let wrong = Digest::sha256(b"not the payload");
        let err = registry
            .complete_upload("repo", &status.id, &wrong, None, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));

        // Session is void and nothing reached the store.
        assert!(registry.upload_info("repo", &status.id).await.is_err());
        assert!(registry.get_blob("repo", &Digest::sha256(b"payload")).await.is_err());
    }

    #[tokio::test]
    async fn test_complete_with_final_chunk() {
        let registry = MemoryRegistry::new();
        let digest = Digest::sha256(b"headtail");
        let status = registry.start_upload("repo").await.unwrap();
        registry
            .upload_chunk("repo", &status.id, Some(0), Bytes::from_static(b"head"))
            .await
            .unwrap();
        registry
            .complete_upload("repo", &status.id, &digest, Some(4), Bytes::from_static(b"tail"))
            .await
            .unwrap();
        assert_eq!(
            registry.get_blob("repo", &digest).await.unwrap().data,
            Bytes::from_static(b"headtail")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[allow(clippy::await_holding_lock)]
    async fn test_busy_session_does_not_block_registry() {
        let registry = Arc::new(MemoryRegistry::new());
        let busy = registry.start_upload("busy").await.unwrap();
        let other = registry.start_upload("other").await.unwrap();
        let data = Bytes::from_static(b"layer");
        registry
            .push_blob("elsewhere", &Digest::sha256(&data), data)
            .await
            .unwrap();

        // Hold the busy session as a long chunk append would.
        let session = registry.state.lock().uploads.get("busy", &busy.id).unwrap();
        let guard = session.lock();

        let background = registry.clone();
        let other_id = other.id.clone();
        let work = tokio::spawn(async move {
            let listing = background.repositories(&Page::default()).await.unwrap();
            let status = background
                .upload_chunk("other", &other_id, Some(0), Bytes::from_static(b"chunk"))
                .await
                .unwrap();
            let blob = background
                .resolve_blob("elsewhere", &Digest::sha256(b"layer"))
                .await
                .unwrap();
            (listing.items, status.offset, blob.size)
        });

        let (repos, offset, size) = tokio::time::timeout(Duration::from_secs(5), work)
            .await
            .expect("registry blocked behind a busy upload session")
            .unwrap();
        assert_eq!(repos, vec!["elsewhere"]);
        assert_eq!(offset, 5);
        assert_eq!(size, 5);

        drop(guard);
        let status = registry
            .upload_chunk("busy", &busy.id, None, Bytes::from_static(b"late"))
            .await
            .unwrap();
        assert_eq!(status.offset, 4);
    }

    #[tokio::test]
    async fn test_complete_closes_held_session() {
        let registry = MemoryRegistry::new();
        let digest = Digest::sha256(b"payload");
        let status = registry.start_upload("repo").await.unwrap();
        let stale = registry.state.lock().uploads.get("repo", &status.id).unwrap();

        registry
            .complete_upload("repo", &status.id, &digest, None, Bytes::from_static(b"payload"))
            .await
            .unwrap();

        // A request which found the session before completion cannot grow it.
        assert!(matches!(
            stale.lock().append(None, b"more"),
            Err(RegistryError::BlobUploadUnknown(_))
        ));
        assert_eq!(
            registry.get_blob("repo", &digest).await.unwrap().data,
            Bytes::from_static(b"payload")
        );
    }

    #[tokio::test]
    async fn test_cancel_upload() {
        let registry = MemoryRegistry::new();
        let status = registry.start_upload("repo").await.unwrap();
        registry.cancel_upload("repo", &status.id).await.unwrap();
        assert!(matches!(
            registry.cancel_upload("repo", &status.id).await,
            Err(RegistryError::BlobUploadUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_mount() {
        let registry = MemoryRegistry::new();
        let data = Bytes::from_static(b"shared layer");
        let digest = Digest::sha256(&data);
        registry.push_blob("source", &digest, data.clone()).await.unwrap();

        registry.mount_blob("source", "target", &digest).await.unwrap();
        assert_eq!(registry.get_blob("target", &digest).await.unwrap().data, data);

        let missing = Digest::sha256(b"missing");
        assert!(matches!(
            registry.mount_blob("source", "target", &missing).await,
            Err(RegistryError::BlobUnknown(_))
        ));
        assert!(matches!(
            registry.mount_blob("nowhere", "target", &digest).await,
            Err(RegistryError::BlobUnknown(_))
        ));
    }

    #[tokio::test]
    async fn test_referrers() {
        let registry = MemoryRegistry::new();
        let subject = registry
            .put_manifest("repo", &tag("app"), image("subject"), None)
            .await
            .unwrap()
            .descriptor;

        let signature = Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "schemaVersion": 2,
                "mediaType": OCI_MANIFEST,
                "artifactType": "application/vnd.example.signature",
                "config": {
                    "mediaType": "application/vnd.oci.empty.v1+json",
                    "size": 2,
                    "digest": Digest::sha256(b"{}"),
                },
                "layers": [],
                "subject": subject,
            }))
            .unwrap(),
        );
        let stored = registry
            .put_manifest("repo", &tag("sig"), signature, None)
            .await
            .unwrap();
        assert_eq!(stored.subject.as_ref(), Some(&subject.digest));

        let found = registry.referrers("repo", &subject.digest, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].digest, stored.descriptor.digest);
        assert_eq!(
            found[0].artifact_type.as_deref(),
            Some("application/vnd.example.signature")
        );

        // The subject itself has no subject field and never shows up.
        let none = registry
            .referrers("repo", &stored.descriptor.digest, None)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
