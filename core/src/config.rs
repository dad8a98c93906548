//! Configuration loading
//!
//! Resolution order:
//! 1. An explicit path passed by the caller
//! 2. `~/.warden/config.toml`
//! 3. Built-in defaults
//!
//! Every field has a default, so a partial file is fine. A missing file
//! falls through to defaults; a file that exists but does not parse is an
//! error.
//!
//! ```toml
//! [chain]
//! algorithm = "sha256"        # sha256 | sha384 | sha512
//! encoding = "hex"            # hex | base64
//! include_signature = true
//! include_metadata = true
//!
//! [totp]
//! issuer = "Warden"
//! window = 1
//! backup_code_count = 10
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::hash_chain::ChainConfig;
use crate::totp::TotpConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub chain: ChainConfig,
    pub totp: TotpConfig,
}

impl WardenConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read and `Error::Config` if it
    /// is not valid TOML for this schema.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve configuration using the explicit path, the home file, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Path of the per-user configuration file, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".warden").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash_chain::{DigestEncoding, HashAlgorithm};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::from_toml("").unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.chain.algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.chain.encoding, DigestEncoding::Hex);
        assert!(config.chain.include_signature);
        assert!(config.chain.include_metadata);
        assert_eq!(config.totp.issuer, "Warden");
        assert_eq!(config.totp.window, 1);
        assert_eq!(config.totp.backup_code_count, 10);
    }

    #[test]
    fn test_partial_file() {
        let config = WardenConfig::from_toml(
            r#"
            [chain]
            algorithm = "sha512"
            include_metadata = false

            [totp]
            issuer = "Acme"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.chain.encoding, DigestEncoding::Hex);
        assert!(!config.chain.include_metadata);
        assert_eq!(config.totp.issuer, "Acme");
        assert_eq!(config.totp.window, 1);
    }

    #[test]
    fn test_invalid_value_is_error() {
        let result = WardenConfig::from_toml("[chain]\nalgorithm = \"md5\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[totp]\nwindow = 2").unwrap();

        let config = WardenConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.totp.window, 2);
    }

    #[test]
    fn test_load_missing_explicit_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = WardenConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
