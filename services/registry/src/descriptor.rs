//! Descriptors, indexes and media types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker schema 2 manifest.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker schema 2 manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker schema 1 manifest.
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Signed docker schema 1 manifest.
pub const DOCKER_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// Media type served for blobs.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Layer types which must not be pushed to or pulled from a registry.
const NON_DISTRIBUTABLE: &[&str] = &[
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
    "application/vnd.oci.image.layer.nondistributable.v1.tar",
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip",
    "application/vnd.oci.image.layer.nondistributable.v1.tar+zstd",
];

/// Is this an index (multi-platform manifest list) media type?
pub fn is_index(media_type: &str) -> bool {
    matches!(media_type, OCI_INDEX | DOCKER_MANIFEST_LIST)
}

/// Is this a single image manifest media type?
pub fn is_image(media_type: &str) -> bool {
    matches!(
        media_type,
        OCI_MANIFEST | DOCKER_MANIFEST | DOCKER_MANIFEST_V1 | DOCKER_MANIFEST_V1_SIGNED
    )
}

/// May content of this media type be distributed through a registry?
pub fn is_distributable(media_type: &str) -> bool {
    !NON_DISTRIBUTABLE.contains(&media_type)
}

/// A content pointer with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    pub media_type: String,

    /// Size of the referenced content in bytes
    pub size: u64,

    /// Digest of the referenced content
    pub digest: Digest,

    /// Artifact type, for referrers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// Arbitrary annotations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Describe `data` with the given media type and digest.
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest,
            artifact_type: None,
            annotations: None,
        }
    }
}

/// An image index, used both when validating pushed indexes and as the
/// body of a referrers response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Always 2
    #[serde(default)]
    pub schema_version: u32,

    /// Index media type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Constituent manifests
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl Index {
    /// Build an OCI index from the given descriptors.
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(OCI_INDEX.to_string()),
            manifests,
        }
    }
}

/// The handful of manifest fields the registry itself looks at.
///
/// Anything else in the document is opaque to the registry.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ManifestFields {
    #[serde(default)]
    pub media_type: Option<String>,

    #[serde(default)]
    pub artifact_type: Option<String>,

    #[serde(default)]
    pub config: Option<ConfigField>,

    #[serde(default)]
    pub subject: Option<Descriptor>,

    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigField {
    #[serde(default)]
    pub media_type: Option<String>,
}

impl ManifestFields {
    /// The artifact type of a manifest: its own `artifactType`, falling
    /// back to the config media type.
    pub fn artifact_type(&self) -> Option<String> {
        self.artifact_type.clone().or_else(|| {
            self.config
                .as_ref()
                .and_then(|config| config.media_type.clone())
        })
    }
}
