//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;

/// Settings for a registry server.
///
/// Every field has a default, so an empty file is a valid configuration.
///
/// ```toml
/// listen = "0.0.0.0:5000"
/// referrers = true
/// mount-fallback = false
/// max-body-size = 1073741824
/// catalog-page-size = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Address the server binds to
    pub listen: SocketAddr,

    /// Serve the referrers API
    pub referrers: bool,

    /// Open an ordinary upload session when a mount source blob is missing
    pub mount_fallback: bool,

    /// Largest accepted request body, in bytes
    pub max_body_size: usize,

    /// Catalog page size when the client does not ask for one
    pub catalog_page_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 5000)),
            referrers: true,
            mount_fallback: true,
            max_body_size: 1024 * 1024 * 1024,
            catalog_page_size: 10_000,
        }
    }
}

/// Errors loading a configuration file
#[cfg(feature = "cli")]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("reading {path}: {source}")]
    Io {
        /// Path of the file
        path: std::path::PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml_edit::de::Error),
}

#[cfg(feature = "cli")]
impl RegistryConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml_edit::de::from_str(text)?)
    }

    /// Read a configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Self::from_toml(&text)
    }
}
