//! Manifest, listing and referrers responses

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{DOCKER_CONTENT_DIGEST, OCI_FILTERS_APPLIED, OCI_SUBJECT, finish};
use crate::backend::Backend;
use crate::descriptor::{Descriptor, Index, OCI_INDEX};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::listing::Listing;
use crate::reference::Reference;
use crate::request::{API_PREFIX, Page};

const APPLICATION_JSON: &str = "application/json";

/// Get a manifest
pub(crate) async fn get(
    backend: &dyn Backend,
    repo: &str,
    reference: &Reference,
) -> RegistryResult<Response> {
    let content = backend.get_manifest(repo, reference).await?;
    finish(described(&content.descriptor, content.modified), content.data)
}

/// Check if a manifest exists
pub(crate) async fn head(
    backend: &dyn Backend,
    repo: &str,
    reference: &Reference,
) -> RegistryResult<Response> {
    let metadata = backend.resolve_manifest(repo, reference).await?;
    finish(
        described(&metadata.descriptor, metadata.modified),
        Body::empty(),
    )
}

fn described(
    descriptor: &Descriptor,
    modified: Option<DateTime<Utc>>,
) -> axum::http::response::Builder {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &descriptor.media_type)
        .header(header::CONTENT_LENGTH, descriptor.size)
        .header(DOCKER_CONTENT_DIGEST, descriptor.digest.to_string());
    match modified {
        Some(modified) => builder.header(header::LAST_MODIFIED, http_date(modified)),
        None => builder,
    }
}

/// Format a timestamp as an HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Store a manifest
pub(crate) async fn put(
    backend: &dyn Backend,
    repo: &str,
    reference: &Reference,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let stored = backend
        .put_manifest(repo, reference, body, media_type)
        .await?;
    let digest = &stored.descriptor.digest;

    let mut builder = Response::builder()
        .status(StatusCode::CREATED)
        .header(
            header::LOCATION,
            format!("{API_PREFIX}/{repo}/manifests/{digest}"),
        )
        .header(header::CONTENT_LENGTH, 0)
        .header(DOCKER_CONTENT_DIGEST, digest.to_string());
    if let Some(subject) = &stored.subject {
        builder = builder.header(OCI_SUBJECT, subject.to_string());
    }
    finish(builder, Body::empty())
}

/// Delete a manifest
pub(crate) async fn delete(
    backend: &dyn Backend,
    repo: &str,
    reference: &Reference,
) -> RegistryResult<Response> {
    backend.delete_manifest(repo, reference).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

#[derive(Debug, Serialize)]
struct TagList<'a> {
    name: &'a str,
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

/// List tags in a repository
pub(crate) async fn tags(backend: &dyn Backend, repo: &str, page: Page) -> RegistryResult<Response> {
    let listing = backend.tags(repo, &page).await?;
    let link = next_link(&format!("{API_PREFIX}/{repo}/tags/list"), &page, &listing)?;
    json(
        &TagList {
            name: repo,
            tags: listing.items,
        },
        link,
    )
}

/// List repositories
pub(crate) async fn catalog(backend: &dyn Backend, page: Page) -> RegistryResult<Response> {
    let listing = backend.repositories(&page).await?;
    let link = next_link(&format!("{API_PREFIX}/_catalog"), &page, &listing)?;
    json(
        &Catalog {
            repositories: listing.items,
        },
        link,
    )
}

/// List manifests referring to `digest`
pub(crate) async fn referrers(
    backend: &dyn Backend,
    repo: &str,
    digest: &Digest,
    artifact_type: Option<&str>,
) -> RegistryResult<Response> {
    let manifests = backend.referrers(repo, digest, artifact_type).await?;
    let body = serde_json::to_vec(&Index::new(manifests))
        .map_err(|err| RegistryError::Internal(err.to_string()))?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, OCI_INDEX)
        .header(header::CONTENT_LENGTH, body.len());
    if artifact_type.is_some() {
        builder = builder.header(OCI_FILTERS_APPLIED, "artifactType");
    }
    finish(builder, body)
}

/// Build the `Link` header pointing at the page after `listing`.
fn next_link(path: &str, page: &Page, listing: &Listing) -> RegistryResult<Option<String>> {
    let Some(last) = &listing.next else {
        return Ok(None);
    };

    let mut query = Vec::with_capacity(2);
    if let Some(n) = page.n {
        query.push(("n", n.to_string()));
    }
    query.push(("last", last.clone()));
    let query = serde_urlencoded::to_string(query)
        .map_err(|err| RegistryError::Internal(err.to_string()))?;

    Ok(Some(format!("<{path}?{query}>; rel=\"next\"")))
}

fn json<T: Serialize>(body: &T, link: Option<String>) -> RegistryResult<Response> {
    let body = serde_json::to_vec(body).map_err(|err| RegistryError::Internal(err.to_string()))?;
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, APPLICATION_JSON)
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(link) = link {
        builder = builder.header(header::LINK, link);
    }
    finish(builder, body)
}
