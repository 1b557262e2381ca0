//! Metadata the migration script deposits in the scratch directory

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::{Error, Result};

/// YAML file written by the migration script
pub const DATA_FILE: &str = "data";

const DEFAULT_TIMEZONE: &str = "UTC";

/// Facts extracted from the legacy server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationData {
    /// Legacy server timezone
    #[serde(default)]
    pub timezone: String,
    /// Database engine version of the legacy server
    #[serde(default)]
    pub db_version: String,
    /// Database engine version shipped in the new server
    #[serde(default)]
    pub target_db_version: String,
}

impl MigrationData {
    /// Legacy and target database engine versions
    pub fn version_pair(&self) -> Result<VersionPair> {
        VersionPair::new(&self.db_version, &self.target_db_version)
    }
}

/// Database engine versions before and after the migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPair {
    /// Version the data was written with
    pub legacy: String,
    /// Version the new server runs
    pub target: String,
}

impl VersionPair {
    /// Build a pair; both versions must be non-empty
    pub fn new(legacy: &str, target: &str) -> Result<Self> {
        let legacy = legacy.trim();
        let target = target.trim();
        if legacy.is_empty() || target.is_empty() {
            return Err(Error::data(format!(
                "incomplete database versions: legacy '{}', target '{}'",
                legacy, target
            )));
        }
        Ok(Self {
            legacy: legacy.to_string(),
            target: target.to_string(),
        })
    }

    /// Whether the database engine needs a major version upgrade
    pub fn needs_upgrade(&self) -> bool {
        self.legacy != self.target
    }
}

/// Read the metadata file left in `dir` by the migration script
pub fn read_migration_data(dir: &Path) -> Result<MigrationData> {
    let path = dir.join(DATA_FILE);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::data(format!("cannot read {}: {}", path.display(), e)))?;
    let mut data: MigrationData = serde_yaml::from_str(&content)?;

    data.timezone = data.timezone.trim().to_string();
    if data.timezone.is_empty() {
        warn!("source server timezone unknown, using {}", DEFAULT_TIMEZONE);
        data.timezone = DEFAULT_TIMEZONE.to_string();
    }
    Ok(data)
}
