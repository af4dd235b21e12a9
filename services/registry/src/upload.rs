//! Resumable blob upload sessions
//!
//! A session is created by [`Uploads::start`], grows by contiguous chunks, and
//! ends either by being taken for completion or by being cancelled. Sessions
//! live only in memory.
//!
//! Each session has its own lock. [`Uploads`] only hands out handles, so the
//! registry lock is never held while a chunk is copied or hashed.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::backend::UploadStatus;
use crate::digest::{Algorithm, Digest, Digester};
use crate::error::{RegistryError, RegistryResult};

/// Where a live session is in its lifecycle.
///
/// Completed and cancelled sessions are removed from [`Uploads`]; `Closed`
/// is only seen by a request that looked the session up just before that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadState {
    /// Opened, no bytes received yet
    Started,
    /// At least one chunk received
    Uploading,
    /// Handed over for completion
    Closed,
}

/// A shared handle to one session.
pub(crate) type SessionHandle = Arc<Mutex<UploadSession>>;

/// An in-progress blob upload.
#[derive(Debug)]
pub(crate) struct UploadSession {
    id: String,
    repo: String,
    state: UploadState,
    data: BytesMut,
    digester: Digester,
    started: DateTime<Utc>,
}

impl UploadSession {
    fn new(repo: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repo: repo.to_string(),
            state: UploadState::Started,
            data: BytesMut::new(),
            digester: Digester::new(Algorithm::Sha256),
            started: Utc::now(),
        }
    }

    /// Bytes received so far.
    pub(crate) fn offset(&self) -> u64 {
        self.data.len() as u64
    }

    pub(crate) fn state(&self) -> UploadState {
        self.state
    }

    pub(crate) fn status(&self) -> UploadStatus {
        UploadStatus {
            id: self.id.clone(),
            repo: self.repo.clone(),
            offset: self.offset(),
        }
    }

    /// Append `chunk`, which must start at the current end of the upload
    /// when `offset` is given.
    pub(crate) fn append(&mut self, offset: Option<u64>, chunk: &[u8]) -> RegistryResult<u64> {
        if self.state == UploadState::Closed {
            return Err(RegistryError::BlobUploadUnknown(self.id.clone()));
        }
        let expected = self.offset();
        match offset {
            Some(offset) if offset != expected => {
                return Err(RegistryError::UploadRangeInvalid { expected, offset });
            }
            _ => {}
        }

        self.data.extend_from_slice(chunk);
        self.digester.update(chunk);
        self.state = UploadState::Uploading;
        Ok(self.offset())
    }

    /// Verify the accumulated bytes against `expected` and hand them over.
    ///
    /// The session is closed afterwards, whatever the outcome.
    pub(crate) fn finish(&mut self, expected: &Digest) -> RegistryResult<Bytes> {
        if self.state == UploadState::Closed {
            return Err(RegistryError::BlobUploadUnknown(self.id.clone()));
        }
        self.state = UploadState::Closed;

        let data = std::mem::take(&mut self.data);
        let digester = std::mem::replace(&mut self.digester, Digester::new(Algorithm::Sha256));
        let actual = if expected.algorithm() == digester.algorithm() {
            digester.finish()
        } else {
            expected.algorithm().digest(&data)
        };

        if actual != *expected {
            tracing::debug!(id = %self.id, %expected, %actual, "upload digest mismatch");
            return Err(RegistryError::DigestMismatch {
                expected: expected.clone(),
                actual,
            });
        }

        tracing::trace!(
            id = %self.id,
            elapsed = %(Utc::now() - self.started),
            size = data.len(),
            "upload complete"
        );
        Ok(data.freeze())
    }
}

/// A live session and the repository it belongs to.
///
/// The repository is kept outside the session lock so lookups never wait on
/// a chunk in progress.
#[derive(Debug)]
struct Slot {
    repo: String,
    session: SessionHandle,
}

/// All live upload sessions, keyed by session id.
#[derive(Debug, Default)]
pub(crate) struct Uploads {
    sessions: HashMap<String, Slot>,
}

impl Uploads {
    /// Open a new session for `repo`.
    pub(crate) fn start(&mut self, repo: &str) -> UploadStatus {
        let session = UploadSession::new(repo);
        let status = session.status();
        self.sessions.insert(
            status.id.clone(),
            Slot {
                repo: repo.to_string(),
                session: Arc::new(Mutex::new(session)),
            },
        );
        status
    }

    /// Look up a session, which must belong to `repo`.
    pub(crate) fn get(&self, repo: &str, id: &str) -> RegistryResult<SessionHandle> {
        self.sessions
            .get(id)
            .filter(|slot| slot.repo == repo)
            .map(|slot| slot.session.clone())
            .ok_or_else(|| RegistryError::BlobUploadUnknown(id.to_string()))
    }

    /// Remove a session, returning it.
    pub(crate) fn take(&mut self, repo: &str, id: &str) -> RegistryResult<SessionHandle> {
        self.get(repo, id)?;
        self.sessions
            .remove(id)
            .map(|slot| slot.session)
            .ok_or_else(|| RegistryError::BlobUploadUnknown(id.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}
