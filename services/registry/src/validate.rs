//! Manifest validation on push
//!
//! Validation runs in two steps so the JSON work happens outside the registry
//! lock: [`inspect`] parses the body and collects the digests it depends on,
//! then [`check_references`] checks those digests against the repository.

use crate::descriptor::{self, Index, ManifestFields, OCI_MANIFEST};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// What the registry learned from a pushed manifest body.
#[derive(Debug)]
pub(crate) struct Inspected {
    /// Effective media type
    pub media_type: String,
    /// Parsed top level fields, when the body is JSON
    pub fields: Option<ManifestFields>,
    /// Manifests that must already exist in the repository
    pub required: Vec<Digest>,
}

/// Pick the media type of a pushed manifest: the declared `Content-Type`
/// (without parameters), else the body's own `mediaType`, else an OCI image
/// manifest.
pub(crate) fn media_type_of(declared: Option<&str>, fields: Option<&ManifestFields>) -> String {
    declared
        .and_then(|declared| declared.split(';').next())
        .map(str::trim)
        .filter(|declared| !declared.is_empty())
        .map(str::to_string)
        .or_else(|| fields.and_then(|fields| fields.media_type.clone()))
        .unwrap_or_else(|| OCI_MANIFEST.to_string())
}

/// Parse a manifest body and work out which sub-manifests it needs.
pub(crate) fn inspect(declared: Option<&str>, data: &[u8]) -> RegistryResult<Inspected> {
    let parsed = serde_json::from_slice::<ManifestFields>(data);
    let media_type = media_type_of(declared, parsed.as_ref().ok());

    let fields = match parsed {
        Ok(fields) => Some(fields),
        Err(err) if descriptor::is_index(&media_type) || descriptor::is_image(&media_type) => {
            return Err(RegistryError::ManifestInvalid(err.to_string()));
        }
        Err(err) => {
            tracing::trace!(%media_type, "opaque manifest body: {err}");
            None
        }
    };

    let mut required = Vec::new();
    if descriptor::is_index(&media_type) {
        let index: Index = serde_json::from_slice(data)
            .map_err(|err| RegistryError::ManifestInvalid(err.to_string()))?;

        for child in index.manifests {
            if !descriptor::is_distributable(&child.media_type) {
                continue;
            }
            if descriptor::is_index(&child.media_type) || descriptor::is_image(&child.media_type) {
                required.push(child.digest);
            } else {
                // Blobs referenced directly from an index are not checked.
                tracing::trace!(digest = %child.digest, "not checking blob reference");
            }
        }
    }

    Ok(Inspected {
        media_type,
        fields,
        required,
    })
}

/// Fail with the first required digest that `exists` does not know about.
pub(crate) fn check_references(
    required: &[Digest],
    exists: impl Fn(&Digest) -> bool,
) -> RegistryResult<()> {
    match required.iter().find(|digest| !exists(digest)) {
        Some(missing) => Err(RegistryError::SubManifestUnknown(missing.clone())),
        None => Ok(()),
    }
}
