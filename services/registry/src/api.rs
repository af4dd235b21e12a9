//! API server builder and router

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, response};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use bytes::Bytes;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::backend::Backend;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::request::Request;
use crate::store::MemoryRegistry;

/// Content digest of a returned blob or manifest.
pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");
/// Identifier of an upload session.
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
/// Digest of a stored manifest's subject.
pub(crate) const OCI_SUBJECT: HeaderName = HeaderName::from_static("oci-subject");
/// Filters honoured by a referrers response.
pub(crate) const OCI_FILTERS_APPLIED: HeaderName =
    HeaderName::from_static("oci-filters-applied");

const API_VERSION_HEADER: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");
const API_VERSION: &str = "registry/2.0";

/// Protocol switches which are not part of the backend.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Options {
    pub referrers: bool,
    pub mount_fallback: bool,
    pub catalog_page_size: usize,
}

/// Shared state of the router.
#[derive(Debug, Clone)]
pub(crate) struct Registry {
    pub backend: Arc<dyn Backend>,
    pub options: Options,
}

/// Registry builder for configuring and creating the OCI registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    backend: Option<Arc<dyn Backend>>,
    options: Options,
    max_body_size: usize,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder with default settings
    pub fn new() -> Self {
        Self {
            backend: None,
            options: Options {
                referrers: true,
                mount_fallback: true,
                catalog_page_size: 0,
            },
            max_body_size: 0,
        }
        .config(&RegistryConfig::default())
    }

    /// Set the storage backend
    ///
    /// Defaults to an empty [`MemoryRegistry`].
    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Use a backend which is shared with other code
    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Apply every protocol setting from a configuration
    pub fn config(self, config: &RegistryConfig) -> Self {
        self.referrers(config.referrers)
            .mount_fallback(config.mount_fallback)
            .max_body_size(config.max_body_size)
            .catalog_page_size(config.catalog_page_size)
    }

    /// Serve the referrers API
    pub fn referrers(mut self, enabled: bool) -> Self {
        self.options.referrers = enabled;
        self
    }

    /// Open an ordinary upload session when a mount source is missing
    pub fn mount_fallback(mut self, enabled: bool) -> Self {
        self.options.mount_fallback = enabled;
        self
    }

    /// Largest accepted request body, in bytes
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Catalog page size when the client does not ask for one
    pub fn catalog_page_size(mut self, entries: usize) -> Self {
        self.options.catalog_page_size = entries;
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()));
        let registry = Registry {
            backend,
            options: self.options,
        };

        Router::new()
            .route("/v2", any(dispatch))
            .route("/v2/", any(dispatch))
            .route("/v2/{*path}", any(dispatch))
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(self.max_body_size))
            .layer(SetResponseHeaderLayer::overriding(
                API_VERSION_HEADER,
                HeaderValue::from_static(API_VERSION),
            ))
            .with_state(registry)
    }
}

async fn not_found() -> RegistryError {
    RegistryError::NotFound
}

/// Classify a request and hand it to the matching operation.
#[tracing::instrument(skip_all, fields(%method, path = uri.path()))]
async fn dispatch(
    State(registry): State<Registry>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!("unreadable request body: {rejection}");
            return RegistryError::from(rejection).into_response();
        }
    };

    let request = match Request::parse(&method, uri.path(), uri.query()) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!("rejected request: {err}");
            return RegistryError::from(err).into_response();
        }
    };

    let operation = request.name();
    tracing::debug!(operation, "dispatching");

    match handle(&registry, request, &headers, body).await {
        Ok(response) => response,
        Err(err) => {
            if err.status_code().is_server_error() {
                tracing::warn!(operation, "request failed: {err}");
            } else {
                tracing::debug!(operation, code = err.error_code(), "request failed: {err}");
            }
            err.into_response()
        }
    }
}

async fn handle(
    registry: &Registry,
    request: Request,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let backend = registry.backend.as_ref();
    match request {
        Request::Ping => Ok((StatusCode::OK, axum::Json(serde_json::json!({}))).into_response()),

        Request::BlobGet { repo, digest } => {
            crate::blob::get(backend, &repo, &digest, headers).await
        }
        Request::BlobHead { repo, digest } => crate::blob::head(backend, &repo, &digest).await,
        Request::BlobDelete { repo, digest } => {
            crate::blob::delete(backend, &repo, &digest).await
        }
        Request::BlobStartUpload { repo } => crate::blob::start_upload(backend, &repo).await,
        Request::BlobUploadBlob { repo, digest } => {
            crate::blob::upload_blob(backend, &repo, &digest, body).await
        }
        Request::BlobMount { repo, from, digest } => {
            crate::blob::mount(backend, &repo, &from, &digest, registry.options.mount_fallback)
                .await
        }
        Request::BlobUploadInfo { repo, upload_id } => {
            crate::blob::upload_info(backend, &repo, &upload_id).await
        }
        Request::BlobUploadChunk { repo, upload_id } => {
            crate::blob::upload_chunk(backend, &repo, &upload_id, headers, body).await
        }
        Request::BlobCompleteUpload {
            repo,
            upload_id,
            digest,
        } => crate::blob::complete_upload(backend, &repo, &upload_id, &digest, headers, body).await,
        Request::BlobCancelUpload { repo, upload_id } => {
            crate::blob::cancel_upload(backend, &repo, &upload_id).await
        }

        Request::ManifestGet { repo, reference } => {
            crate::manifest::get(backend, &repo, &reference).await
        }
        Request::ManifestHead { repo, reference } => {
            crate::manifest::head(backend, &repo, &reference).await
        }
        Request::ManifestPut { repo, reference } => {
            crate::manifest::put(backend, &repo, &reference, headers, body).await
        }
        Request::ManifestDelete { repo, reference } => {
            crate::manifest::delete(backend, &repo, &reference).await
        }

        Request::TagsList { repo, page } => crate::manifest::tags(backend, &repo, page).await,
        Request::ReferrersList {
            repo,
            digest,
            artifact_type,
        } => {
            if !registry.options.referrers {
                return Err(RegistryError::NotFound);
            }
            crate::manifest::referrers(backend, &repo, &digest, artifact_type.as_deref()).await
        }
        Request::CatalogList { mut page } => {
            page.n = page.n.or(Some(registry.options.catalog_page_size));
            crate::manifest::catalog(backend, page).await
        }
    }
}

/// Finish a response builder, turning header errors into internal errors.
pub(crate) fn finish(builder: response::Builder, body: impl Into<Body>) -> RegistryResult<Response> {
    builder
        .body(body.into())
        .map_err(|err| RegistryError::Internal(format!("building response: {err}")))
}
