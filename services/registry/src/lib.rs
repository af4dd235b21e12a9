//! # OCI Container Registry
//!
//! This crate implements a container registry server following the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec).
//!
//! ## Features
//!
//! - Blob storage, range reads and deletion
//! - Resumable chunked uploads, monolithic uploads and cross-repository mounts
//! - Manifests addressed by tag and by digest, with index validation
//! - Paginated tag and repository listings
//! - The referrers API
//! - Pluggable storage via the [`Backend`] trait, with an in-memory
//!   [`MemoryRegistry`] as the default
//!
//! ## Example
//!
//! ```no_run
//! use oci_registry::{MemoryRegistry, RegistryBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new()
//!     .backend(MemoryRegistry::new())
//!     .mount_fallback(true)
//!     .build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod backend;
mod blob;
mod config;
pub mod descriptor;
mod digest;
mod error;
mod listing;
mod manifest;
mod reference;
mod request;
mod store;
mod upload;
mod validate;

pub use api::RegistryBuilder;
pub use backend::{Backend, Content, ManifestMetadata, StoredManifest, UploadStatus};
#[cfg(feature = "cli")]
pub use config::ConfigError;
pub use config::RegistryConfig;
pub use descriptor::{Descriptor, Index};
pub use digest::{Algorithm, Digest, DigestError, Digester};
pub use error::{RegistryError, RegistryResult};
pub use listing::Listing;
pub use reference::{InvalidTag, Reference, ReferenceError, Tag, is_valid_repository};
pub use request::{API_PREFIX, Page, ParseError, Request};
pub use store::MemoryRegistry;
