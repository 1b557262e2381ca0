//! Optional configuration file
//!
//! Values are read from the first of:
//! 1. `--config` flag or `MGRADM_CONFIG` environment variable
//! 2. `~/.config/mgradm/config.yaml`, when present
//!
//! Command-line flags override anything set here.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result};

const CONFIG_DIR: &str = ".config/mgradm";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Server image settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub pull_policy: Option<String>,
}

/// Migration image override
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationImageConfig {
    pub name: Option<String>,
    pub tag: Option<String>,
}

/// Helm release settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HelmConfig {
    pub chart: Option<String>,
    pub version: Option<String>,
    pub namespace: Option<String>,
    pub release: Option<String>,
    pub values: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
}

/// SSL settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SslConfig {
    /// Passphrase of the source server CA key
    pub password: Option<String>,
}

/// Content of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub image: ImageConfig,
    pub migration_image: MigrationImageConfig,
    pub helm: HelmConfig,
    pub ssl: SslConfig,
    /// Parent of the scratch directories
    pub scratch_dir: Option<PathBuf>,
}

/// Path to `~/.config/mgradm/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE_NAME))
}

/// Load the configuration file, returning defaults when there is none.
///
/// An explicit path must exist; the default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    match explicit {
        Some(path) => load_from(path),
        None => match default_config_path() {
            Some(path) if path.is_file() => load_from(&path),
            _ => Ok(FileConfig::default()),
        },
    }
}

/// Parse the configuration file at `path`.
pub fn load_from(path: &Path) -> Result<FileConfig> {
    debug!(path = %path.display(), "loading configuration");
    let data = std::fs::read_to_string(path).map_err(|e| Error::config(path, e.to_string()))?;
    if data.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&data).map_err(|e| Error::config(path, e.to_string()))
}
