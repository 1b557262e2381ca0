//! Container image references

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default server image repository
pub const DEFAULT_IMAGE: &str = "registry.opensuse.org/uyuni/server";
/// Default image tag
pub const DEFAULT_TAG: &str = "latest";
/// Default image pull policy
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Server image selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFlags {
    /// Image repository, optionally with a tag
    pub name: String,
    /// Tag used when `name` carries none
    pub tag: String,
    /// Kubernetes image pull policy
    pub pull_policy: String,
}

impl Default for ImageFlags {
    fn default() -> Self {
        Self {
            name: DEFAULT_IMAGE.to_string(),
            tag: DEFAULT_TAG.to_string(),
            pull_policy: DEFAULT_PULL_POLICY.to_string(),
        }
    }
}

impl ImageFlags {
    /// Fully resolved image reference
    pub fn reference(&self) -> Result<ImageReference> {
        compute_image(&self.name, &self.tag)
    }
}

/// Explicit override for the database migration image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationImageFlags {
    /// Repository replacing the computed `<image>-migration-<old>-<new>` name
    pub name: Option<String>,
    /// Tag replacing the server image tag
    pub tag: Option<String>,
}

/// A resolved `repository:tag` (or `repository@digest`) reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry and repository path
    pub repository: String,
    /// Tag, or `sha256:...` digest for pinned images
    pub tag: String,
    digest: bool,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.digest { '@' } else { ':' };
        write!(f, "{}{}{}", self.repository, separator, self.tag)
    }
}

/// Resolve `name` into a full reference, appending `tag` unless `name` has one
pub fn compute_image(name: &str, tag: &str) -> Result<ImageReference> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::generation("image", "image name cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::generation(
            "image",
            format!("invalid image name '{}'", name),
        ));
    }

    if let Some((repository, digest)) = name.split_once('@') {
        return Ok(ImageReference {
            repository: repository.to_string(),
            tag: digest.to_string(),
            digest: true,
        });
    }

    // A colon in the last path segment is a tag, elsewhere it is a registry port
    let last_segment_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    if let Some(pos) = name[last_segment_start..].rfind(':') {
        let split = last_segment_start + pos;
        return Ok(ImageReference {
            repository: name[..split].to_string(),
            tag: name[split + 1..].to_string(),
            digest: false,
        });
    }

    let tag = tag.trim();
    if tag.is_empty() {
        return Err(Error::generation(
            "image",
            format!("no tag given for image '{}'", name),
        ));
    }

    Ok(ImageReference {
        repository: name.to_string(),
        tag: tag.to_string(),
        digest: false,
    })
}

/// Image carrying the tooling to upgrade the database from `legacy` to `target`
///
/// The override name wins; otherwise the name embeds both versions. The tag
/// falls back to the server image tag.
pub fn migration_image(
    base: &ImageFlags,
    overrides: &MigrationImageFlags,
    legacy: &str,
    target: &str,
) -> Result<ImageReference> {
    let name = match overrides.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("{}-migration-{}-{}", base.name, legacy, target),
    };
    let tag = overrides
        .tag
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&base.tag);
    compute_image(&name, tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(name: &str, tag: &str) -> ImageFlags {
        ImageFlags {
            name: name.to_string(),
            tag: tag.to_string(),
            pull_policy: DEFAULT_PULL_POLICY.to_string(),
        }
    }

    #[test]
    fn test_compute_image_appends_tag() {
        let image = compute_image("registry.example.com/uyuni/server", "2024.05").unwrap();
        assert_eq!(image.repository, "registry.example.com/uyuni/server");
        assert_eq!(image.tag, "2024.05");
        assert_eq!(image.to_string(), "registry.example.com/uyuni/server:2024.05");
    }

    #[test]
    fn test_compute_image_keeps_explicit_tag() {
        let image = compute_image("registry.example.com:5000/server:1.2", "latest").unwrap();
        assert_eq!(image.repository, "registry.example.com:5000/server");
        assert_eq!(image.tag, "1.2");
    }

    #[test]
    fn test_compute_image_registry_port_is_not_a_tag() {
        let image = compute_image("registry.example.com:5000/server", "latest").unwrap();
        assert_eq!(image.to_string(), "registry.example.com:5000/server:latest");
    }

    #[test]
    fn test_compute_image_digest() {
        let image = compute_image("server@sha256:abcd", "latest").unwrap();
        assert_eq!(image.to_string(), "server@sha256:abcd");
    }

    #[test]
    fn test_compute_image_rejects_bad_input() {
        assert!(compute_image("", "latest").is_err());
        assert!(compute_image("bad image", "latest").is_err());
        assert!(compute_image("server", "").is_err());
    }

    #[test]
    fn test_migration_image_default_name_is_stable() {
        let base = flags("server", "latest");
        let overrides = MigrationImageFlags::default();

        let first = migration_image(&base, &overrides, "13", "15").unwrap();
        let second = migration_image(&base, &overrides, "13", "15").unwrap();

        assert_eq!(first.repository, "server-migration-13-15");
        assert_eq!(first.tag, "latest");
        assert_eq!(first, second);
    }

    #[test]
    fn test_migration_image_override_wins() {
        let base = flags("registry.example.com/server", "5.0");
        let overrides = MigrationImageFlags {
            name: Some("registry.example.com/custom-migration".to_string()),
            tag: Some("beta".to_string()),
        };

        let image = migration_image(&base, &overrides, "14", "16").unwrap();
        assert_eq!(image.to_string(), "registry.example.com/custom-migration:beta");
    }

    #[test]
    fn test_migration_image_empty_override_falls_back() {
        let base = flags("server", "5.0");
        let overrides = MigrationImageFlags {
            name: Some(String::new()),
            tag: Some(String::new()),
        };

        let image = migration_image(&base, &overrides, "13", "16").unwrap();
        assert_eq!(image.to_string(), "server-migration-13-16:5.0");
    }
}
