//! Request classification
//!
//! Turns an HTTP method, path and query string into one of the closed set of
//! distribution API operations. Classification is purely syntactic: nothing
//! here looks at registry state.

use axum::http::Method;
use serde::Deserialize;

use crate::digest::Digest;
use crate::reference::{Reference, ReferenceError, is_valid_repository};

/// Path prefix of the distribution API.
pub const API_PREFIX: &str = "/v2";

/// Why a request could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A digest in the path or query is malformed
    #[error("badly formed digest: {0}")]
    BadlyFormedDigest(String),

    /// The repository name does not match the name grammar
    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    /// A parameter is malformed
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The operation is recognised but its arguments are not supported
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The path is not part of the API
    #[error("not found")]
    NotFound,

    /// The path is known, but not with this method
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
}

/// Pagination parameters for listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of entries to return
    pub n: Option<usize>,
    /// Exclusive cursor: only entries sorting after this are returned
    pub last: Option<String>,
}

/// A classified registry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// API version check
    Ping,

    /// Fetch a blob
    BlobGet {
        /// Repository name
        repo: String,
        /// Blob digest
        digest: Digest,
    },

    /// Check a blob exists
    BlobHead {
        /// Repository name
        repo: String,
        /// Blob digest
        digest: Digest,
    },

    /// Delete a blob
    BlobDelete {
        /// Repository name
        repo: String,
        /// Blob digest
        digest: Digest,
    },

    /// Open an upload session
    BlobStartUpload {
        /// Repository name
        repo: String,
    },

    /// Upload a whole blob in the session-opening request
    BlobUploadBlob {
        /// Repository name
        repo: String,
        /// Asserted digest of the body
        digest: Digest,
    },

    /// Mount a blob from another repository
    BlobMount {
        /// Target repository
        repo: String,
        /// Source repository
        from: String,
        /// Blob to mount
        digest: Digest,
    },

    /// Query the progress of an upload session
    BlobUploadInfo {
        /// Repository name
        repo: String,
        /// Session identifier
        upload_id: String,
    },

    /// Append a chunk to an upload session
    BlobUploadChunk {
        /// Repository name
        repo: String,
        /// Session identifier
        upload_id: String,
    },

    /// Finish an upload session
    BlobCompleteUpload {
        /// Repository name
        repo: String,
        /// Session identifier
        upload_id: String,
        /// Asserted digest of the whole blob
        digest: Digest,
    },

    /// Abandon an upload session
    BlobCancelUpload {
        /// Repository name
        repo: String,
        /// Session identifier
        upload_id: String,
    },

    /// Fetch a manifest
    ManifestGet {
        /// Repository name
        repo: String,
        /// Tag or digest
        reference: Reference,
    },

    /// Check a manifest exists
    ManifestHead {
        /// Repository name
        repo: String,
        /// Tag or digest
        reference: Reference,
    },

    /// Store a manifest
    ManifestPut {
        /// Repository name
        repo: String,
        /// Tag or digest
        reference: Reference,
    },

    /// Delete a manifest entry
    ManifestDelete {
        /// Repository name
        repo: String,
        /// Tag or digest
        reference: Reference,
    },

    /// List tags in a repository
    TagsList {
        /// Repository name
        repo: String,
        /// Pagination
        page: Page,
    },

    /// List manifests referring to a digest
    ReferrersList {
        /// Repository name
        repo: String,
        /// Subject digest
        digest: Digest,
        /// Optional artifact type filter
        artifact_type: Option<String>,
    },

    /// List repositories
    CatalogList {
        /// Pagination
        page: Page,
    },
}

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    digest: Option<String>,
    mount: Option<String>,
    from: Option<String>,
    n: Option<String>,
    last: Option<String>,
    #[serde(rename = "artifactType")]
    artifact_type: Option<String>,
}

impl QueryParams {
    fn parse(query: Option<&str>) -> Result<Self, ParseError> {
        match query {
            Some(query) if !query.is_empty() => serde_urlencoded::from_str(query)
                .map_err(|err| ParseError::BadRequest(format!("query string: {err}"))),
            _ => Ok(Self::default()),
        }
    }

    fn page(&self) -> Result<Page, ParseError> {
        let n = self
            .n
            .as_deref()
            .map(|n| {
                n.parse::<usize>()
                    .map_err(|err| ParseError::BadRequest(format!("parsing n: {err}")))
            })
            .transpose()?;
        let last = self.last.clone().filter(|last| !last.is_empty());
        Ok(Page { n, last })
    }

    fn required_digest(&self) -> Result<Digest, ParseError> {
        let digest = self
            .digest
            .as_deref()
            .ok_or_else(|| ParseError::BadRequest("missing digest query parameter".into()))?;
        parse_digest(digest)
    }
}

fn parse_digest(digest: &str) -> Result<Digest, ParseError> {
    digest
        .parse()
        .map_err(|err| ParseError::BadlyFormedDigest(format!("{digest}: {err}")))
}

fn parse_repo(segments: &[&str]) -> Result<String, ParseError> {
    let repo = segments.join("/");
    if is_valid_repository(&repo) {
        Ok(repo)
    } else {
        Err(ParseError::NameInvalid(repo))
    }
}

fn not_allowed(method: &Method) -> ParseError {
    ParseError::MethodNotAllowed(method.to_string())
}

impl Request {
    /// Classify a request.
    pub fn parse(method: &Method, path: &str, query: Option<&str>) -> Result<Self, ParseError> {
        let rest = path.strip_prefix(API_PREFIX).ok_or(ParseError::NotFound)?;
        if rest.is_empty() || rest == "/" {
            return match *method {
                Method::GET | Method::HEAD => Ok(Request::Ping),
                _ => Err(not_allowed(method)),
            };
        }
        let rest = rest.strip_prefix('/').ok_or(ParseError::NotFound)?;
        let query = QueryParams::parse(query)?;

        if rest == "_catalog" {
            return match *method {
                Method::GET => Ok(Request::CatalogList {
                    page: query.page()?,
                }),
                _ => Err(not_allowed(method)),
            };
        }

        let segments: Vec<&str> = rest.split('/').collect();
        let len = segments.len();
        if len < 3 {
            return Err(ParseError::NotFound);
        }

        // .../blobs/uploads/ and .../blobs/uploads/{id}
        if len >= 4 && segments[len - 3] == "blobs" && segments[len - 2] == "uploads" {
            let repo = parse_repo(&segments[..len - 3])?;
            return Self::upload(method, repo, segments[len - 1], &query);
        }
        // .../blobs/uploads
        if segments[len - 2] == "blobs" && segments[len - 1] == "uploads" {
            let repo = parse_repo(&segments[..len - 2])?;
            return Self::upload(method, repo, "", &query);
        }

        if segments[len - 2] == "tags" && segments[len - 1] == "list" {
            let repo = parse_repo(&segments[..len - 2])?;
            return match *method {
                Method::GET => Ok(Request::TagsList {
                    repo,
                    page: query.page()?,
                }),
                _ => Err(not_allowed(method)),
            };
        }

        let target = segments[len - 1];
        match segments[len - 2] {
            "blobs" => {
                let repo = parse_repo(&segments[..len - 2])?;
                let digest = parse_digest(target)?;
                match *method {
                    Method::GET => Ok(Request::BlobGet { repo, digest }),
                    Method::HEAD => Ok(Request::BlobHead { repo, digest }),
                    Method::DELETE => Ok(Request::BlobDelete { repo, digest }),
                    _ => Err(not_allowed(method)),
                }
            }
            "manifests" => {
                let repo = parse_repo(&segments[..len - 2])?;
                let reference: Reference = target.parse().map_err(|err| match err {
                    ReferenceError::Digest(err) => {
                        ParseError::BadlyFormedDigest(format!("{target}: {err}"))
                    }
                    ReferenceError::Tag(err) => ParseError::BadRequest(err.to_string()),
                })?;
                match *method {
                    Method::GET => Ok(Request::ManifestGet { repo, reference }),
                    Method::HEAD => Ok(Request::ManifestHead { repo, reference }),
                    Method::PUT => Ok(Request::ManifestPut { repo, reference }),
                    Method::DELETE => Ok(Request::ManifestDelete { repo, reference }),
                    _ => Err(not_allowed(method)),
                }
            }
            "referrers" => {
                let repo = parse_repo(&segments[..len - 2])?;
                if *method != Method::GET {
                    return Err(not_allowed(method));
                }
                let digest = target.parse().map_err(|_| {
                    ParseError::Unsupported(format!("target must be a valid digest: {target}"))
                })?;
                Ok(Request::ReferrersList {
                    repo,
                    digest,
                    artifact_type: query.artifact_type.filter(|t| !t.is_empty()),
                })
            }
            _ => Err(ParseError::NotFound),
        }
    }

    fn upload(
        method: &Method,
        repo: String,
        upload_id: &str,
        query: &QueryParams,
    ) -> Result<Self, ParseError> {
        if upload_id.is_empty() {
            if *method != Method::POST {
                return Err(not_allowed(method));
            }
            if let (Some(mount), Some(from)) = (query.mount.as_deref(), query.from.as_deref()) {
                let digest = parse_digest(mount)?;
                let from = parse_repo(&[from])?;
                return Ok(Request::BlobMount { repo, from, digest });
            }
            if query.digest.is_some() {
                let digest = query.required_digest()?;
                return Ok(Request::BlobUploadBlob { repo, digest });
            }
            return Ok(Request::BlobStartUpload { repo });
        }

        let upload_id = upload_id.to_string();
        match *method {
            Method::GET => Ok(Request::BlobUploadInfo { repo, upload_id }),
            Method::PATCH => Ok(Request::BlobUploadChunk { repo, upload_id }),
            Method::PUT => Ok(Request::BlobCompleteUpload {
                repo,
                upload_id,
                digest: query.required_digest()?,
            }),
            Method::DELETE => Ok(Request::BlobCancelUpload { repo, upload_id }),
            _ => Err(not_allowed(method)),
        }
    }

    /// Short name of the operation, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::BlobGet { .. } => "blob-get",
            Request::BlobHead { .. } => "blob-head",
            Request::BlobDelete { .. } => "blob-delete",
            Request::BlobStartUpload { .. } => "blob-start-upload",
            Request::BlobUploadBlob { .. } => "blob-upload-blob",
            Request::BlobMount { .. } => "blob-mount",
            Request::BlobUploadInfo { .. } => "blob-upload-info",
            Request::BlobUploadChunk { .. } => "blob-upload-chunk",
            Request::BlobCompleteUpload { .. } => "blob-complete-upload",
            Request::BlobCancelUpload { .. } => "blob-cancel-upload",
            Request::ManifestGet { .. } => "manifest-get",
            Request::ManifestHead { .. } => "manifest-head",
            Request::ManifestPut { .. } => "manifest-put",
            Request::ManifestDelete { .. } => "manifest-delete",
            Request::TagsList { .. } => "tags-list",
            Request::ReferrersList { .. } => "referrers-list",
            Request::CatalogList { .. } => "catalog-list",
        }
    }
}
