//! Error types for the registry

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::digest::Digest;
use crate::request::ParseError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Repository does not exist
    #[error("repository name not known to registry: {0}")]
    NameUnknown(String),

    /// Repository name is not valid for a write
    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    /// Blob not found
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(Digest),

    /// Manifest not found
    #[error("manifest unknown to registry: {0}")]
    ManifestUnknown(String),

    /// An index references a manifest which has not been pushed
    #[error("sub-manifest {0} not found")]
    SubManifestUnknown(Digest),

    /// Manifest body could not be understood
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// Malformed digest in the request
    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Asserted digest
        expected: Digest,
        /// Digest of the received content
        actual: Digest,
    },

    /// Upload session not found
    #[error("blob upload unknown to registry: {0}")]
    BlobUploadUnknown(String),

    /// Upload request could not be processed
    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    /// Chunk does not start where the session currently ends
    #[error("invalid content range: chunk starts at {offset}, expected {expected}")]
    UploadRangeInvalid {
        /// Offset the session expects next
        expected: u64,
        /// Offset the chunk claimed
        offset: u64,
    },

    /// A chunk's `Content-Range` does not cover the bytes sent with it
    #[error("Content-Range {start}-{end} does not match the {len} bytes sent")]
    ChunkRangeMismatch {
        /// First byte claimed
        start: u64,
        /// Last byte claimed
        end: u64,
        /// Length of the chunk body
        len: u64,
    },

    /// Request body is larger than the registry accepts
    #[error("request body too large: {0}")]
    SizeInvalid(String),

    /// Requested byte range cannot be served
    #[error("requested range not satisfiable for {size} bytes")]
    RangeNotSatisfiable {
        /// Size of the content
        size: u64,
    },

    /// Operation is not supported
    #[error("the operation is unsupported: {0}")]
    Unsupported(String),

    /// Malformed request parameter
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The path is not part of the API
    #[error("page not found")]
    NotFound,

    /// Method not allowed for this path
    #[error("method not allowed: {0}")]
    MethodUnknown(String),

    /// Stored data could not be interpreted
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::NameUnknown(_)
            | RegistryError::BlobUnknown(_)
            | RegistryError::ManifestUnknown(_)
            | RegistryError::SubManifestUnknown(_)
            | RegistryError::BlobUploadUnknown(_)
            | RegistryError::NotFound => StatusCode::NOT_FOUND,
            RegistryError::NameInvalid(_)
            | RegistryError::ManifestInvalid(_)
            | RegistryError::DigestInvalid(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::BlobUploadInvalid(_)
            | RegistryError::Unsupported(_)
            | RegistryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RegistryError::UploadRangeInvalid { .. }
            | RegistryError::ChunkRangeMismatch { .. }
            | RegistryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::SizeInvalid(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RegistryError::MethodUnknown(_) => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::NameUnknown(_) => "NAME_UNKNOWN",
            RegistryError::NameInvalid(_) => "NAME_INVALID",
            RegistryError::BlobUnknown(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestUnknown(_) | RegistryError::SubManifestUnknown(_) => {
                "MANIFEST_UNKNOWN"
            }
            RegistryError::ManifestInvalid(_) => "MANIFEST_INVALID",
            RegistryError::DigestInvalid(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::BlobUploadUnknown(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::BlobUploadInvalid(_) => "BLOB_UPLOAD_INVALID",
            RegistryError::UploadRangeInvalid { .. }
            | RegistryError::ChunkRangeMismatch { .. }
            | RegistryError::RangeNotSatisfiable { .. } => "RANGE_INVALID",
            RegistryError::SizeInvalid(_) => "SIZE_INVALID",
            RegistryError::Unsupported(_) => "UNSUPPORTED",
            RegistryError::BadRequest(_) => "BAD_REQUEST",
            RegistryError::NotFound => "NOT_FOUND",
            RegistryError::MethodUnknown(_) => "METHOD_UNKNOWN",
            RegistryError::Internal(_) => "UNKNOWN",
        }
    }
}

impl From<ParseError> for RegistryError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::BadlyFormedDigest(reason) => RegistryError::DigestInvalid(reason),
            ParseError::NameInvalid(name) => RegistryError::NameInvalid(name),
            ParseError::BadRequest(reason) => RegistryError::BadRequest(reason),
            ParseError::Unsupported(reason) => RegistryError::Unsupported(reason),
            ParseError::NotFound => RegistryError::NotFound,
            ParseError::MethodNotAllowed(method) => RegistryError::MethodUnknown(method),
        }
    }
}

impl From<BytesRejection> for RegistryError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RegistryError::SizeInvalid(rejection.body_text())
        } else {
            RegistryError::BadRequest(rejection.body_text())
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_map_to_distinct_statuses() {
        let cases = [
            (ParseError::BadlyFormedDigest("x".into()), StatusCode::BAD_REQUEST, "DIGEST_INVALID"),
            (ParseError::BadRequest("n".into()), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (ParseError::NameInvalid("Foo".into()), StatusCode::BAD_REQUEST, "NAME_INVALID"),
            (ParseError::Unsupported("ref".into()), StatusCode::BAD_REQUEST, "UNSUPPORTED"),
            (ParseError::NotFound, StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                ParseError::MethodNotAllowed("POST".into()),
                StatusCode::METHOD_NOT_ALLOWED,
                "METHOD_UNKNOWN",
            ),
        ];

        for (parse, status, code) in cases {
            let err = RegistryError::from(parse);
            assert_eq!(err.status_code(), status);
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn test_sub_manifest_unknown_names_digest() {
        let digest = Digest::sha256(b"child");
        let err = RegistryError::SubManifestUnknown(digest.clone());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "MANIFEST_UNKNOWN");
        assert!(err.to_string().contains(&digest.to_string()));
    }

    #[test]
    fn test_chunk_range_mismatch_names_upload() {
        let err = RegistryError::ChunkRangeMismatch {
            start: 0,
            end: 9,
            len: 4,
        };
        assert_eq!(err.status_code(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(err.error_code(), "RANGE_INVALID");
        assert_eq!(
            err.to_string(),
            "Content-Range 0-9 does not match the 4 bytes sent"
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = RegistryError::NameUnknown("foo".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errors"][0]["code"], "NAME_UNKNOWN");
        assert!(json["errors"][0]["message"].as_str().unwrap().contains("foo"));
    }
}
