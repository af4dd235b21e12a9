//! Blob and upload session responses

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::api::{DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID, finish};
use crate::backend::{Backend, UploadStatus};
use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::request::API_PREFIX;

/// Get a blob, honouring a `Range` header
pub(crate) async fn get(
    backend: &dyn Backend,
    repo: &str,
    digest: &Digest,
    headers: &HeaderMap,
) -> RegistryResult<Response> {
    let content = backend.get_blob(repo, digest).await?;
    let size = content.descriptor.size;

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(|value| parse_range(value, size))
        .transpose()?
        .flatten();

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, &content.descriptor.media_type)
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .header(header::ACCEPT_RANGES, "bytes");

    match range {
        Some((start, end)) => {
            let data = content.data.slice(start as usize..=end as usize);
            let builder = builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, data.len())
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
            finish(builder, data)
        }
        None => {
            let builder = builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size);
            finish(builder, content.data)
        }
    }
}

/// Check if a blob exists
pub(crate) async fn head(
    backend: &dyn Backend,
    repo: &str,
    digest: &Digest,
) -> RegistryResult<Response> {
    let descriptor = backend.resolve_blob(repo, digest).await?;
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &descriptor.media_type)
        .header(header::CONTENT_LENGTH, descriptor.size)
        .header(DOCKER_CONTENT_DIGEST, descriptor.digest.to_string());
    finish(builder, Body::empty())
}

/// Delete a blob
pub(crate) async fn delete(
    backend: &dyn Backend,
    repo: &str,
    digest: &Digest,
) -> RegistryResult<Response> {
    backend.delete_blob(repo, digest).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Start a blob upload session
pub(crate) async fn start_upload(backend: &dyn Backend, repo: &str) -> RegistryResult<Response> {
    let status = backend.start_upload(repo).await?;
    upload_response(StatusCode::ACCEPTED, &status)
}

/// Upload a whole blob in one request
pub(crate) async fn upload_blob(
    backend: &dyn Backend,
    repo: &str,
    digest: &Digest,
    body: Bytes,
) -> RegistryResult<Response> {
    let descriptor = backend.push_blob(repo, digest, body).await?;
    created(repo, &descriptor)
}

/// Mount a blob from another repository
///
/// When the source blob is missing and `fallback` is set, an ordinary upload
/// session is opened instead.
pub(crate) async fn mount(
    backend: &dyn Backend,
    repo: &str,
    from: &str,
    digest: &Digest,
    fallback: bool,
) -> RegistryResult<Response> {
    match backend.mount_blob(from, repo, digest).await {
        Ok(descriptor) => created(repo, &descriptor),
        Err(RegistryError::BlobUnknown(_)) if fallback => {
            tracing::debug!(%from, %digest, "mount source missing, opening upload session");
            start_upload(backend, repo).await
        }
        Err(err) => Err(err),
    }
}

/// Report the progress of an upload session
pub(crate) async fn upload_info(
    backend: &dyn Backend,
    repo: &str,
    id: &str,
) -> RegistryResult<Response> {
    let status = backend.upload_info(repo, id).await?;
    upload_response(StatusCode::NO_CONTENT, &status)
}

/// Append a chunk to an upload session
pub(crate) async fn upload_chunk(
    backend: &dyn Backend,
    repo: &str,
    id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let offset = chunk_offset(headers, body.len())?;
    let status = backend.upload_chunk(repo, id, offset, body).await?;
    upload_response(StatusCode::ACCEPTED, &status)
}

/// Complete an upload session, with an optional final chunk
pub(crate) async fn complete_upload(
    backend: &dyn Backend,
    repo: &str,
    id: &str,
    digest: &Digest,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let offset = chunk_offset(headers, body.len())?;
    let descriptor = backend
        .complete_upload(repo, id, digest, offset, body)
        .await?;
    created(repo, &descriptor)
}

/// Cancel a blob upload
pub(crate) async fn cancel_upload(
    backend: &dyn Backend,
    repo: &str,
    id: &str,
) -> RegistryResult<Response> {
    backend.cancel_upload(repo, id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn created(repo: &str, descriptor: &Descriptor) -> RegistryResult<Response> {
    let builder = Response::builder()
        .status(StatusCode::CREATED)
        .header(
            header::LOCATION,
            format!("{API_PREFIX}/{repo}/blobs/{}", descriptor.digest),
        )
        .header(header::CONTENT_LENGTH, 0)
        .header(DOCKER_CONTENT_DIGEST, descriptor.digest.to_string());
    finish(builder, Body::empty())
}

fn upload_response(status: StatusCode, upload: &UploadStatus) -> RegistryResult<Response> {
    let builder = Response::builder()
        .status(status)
        .header(
            header::LOCATION,
            format!("{API_PREFIX}/{}/blobs/uploads/{}", upload.repo, upload.id),
        )
        .header(header::RANGE, format!("0-{}", upload.offset.saturating_sub(1)))
        .header(header::CONTENT_LENGTH, 0)
        .header(DOCKER_UPLOAD_UUID, &upload.id);
    finish(builder, Body::empty())
}

/// Parse a `Range: bytes=start-[end]` header against content of `size`
/// bytes.
///
/// Headers in any other form are ignored.
fn parse_range(value: &str, size: u64) -> RegistryResult<Option<(u64, u64)>> {
    let Some((start, end)) = value
        .trim()
        .strip_prefix("bytes=")
        .and_then(|range| range.split_once('-'))
    else {
        return Ok(None);
    };

    let Ok(start) = start.trim().parse::<u64>() else {
        return Ok(None);
    };
    if start >= size {
        return Err(RegistryError::RangeNotSatisfiable { size });
    }

    let end = match end.trim() {
        "" => size - 1,
        end => match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            Ok(_) => return Err(RegistryError::RangeNotSatisfiable { size }),
            Err(_) => return Ok(None),
        },
    };
    Ok(Some((start, end)))
}

/// Work out where a chunk claims to start from its `Content-Range` header.
///
/// The range is inclusive, and must cover exactly the `len` bytes sent.
fn chunk_offset(headers: &HeaderMap, len: usize) -> RegistryResult<Option<u64>> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(None);
    };
    if len == 0 {
        return Ok(None);
    }

    let value = value
        .to_str()
        .map_err(|_| RegistryError::BlobUploadInvalid("unreadable Content-Range".into()))?;
    let range = value.trim();
    let range = range.strip_prefix("bytes ").unwrap_or(range);
    let (start, end) = range
        .split_once('-')
        .and_then(|(start, end)| Some((start.parse::<u64>().ok()?, end.parse::<u64>().ok()?)))
        .ok_or_else(|| RegistryError::BlobUploadInvalid(format!("bad Content-Range: {value}")))?;

    if end < start || end - start + 1 != len as u64 {
        return Err(RegistryError::ChunkRangeMismatch {
            start,
            end,
            len: len as u64,
        });
    }
    Ok(Some(start))
}
