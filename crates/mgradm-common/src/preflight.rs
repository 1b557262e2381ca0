//! Preflight checks run before any state-changing work

use std::path::{Path, PathBuf};

#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::{Error, Result};

/// Resolves executables on the execution path
#[cfg_attr(test, automock)]
pub trait ToolLocator: Send + Sync {
    /// Full path of `tool`, or `None` when it cannot be resolved
    fn locate(&self, tool: &str) -> Option<PathBuf>;
}

/// [`ToolLocator`] searching the directories listed in `PATH`
#[derive(Debug, Clone, Default)]
pub struct PathLocator {
    path: Option<std::ffi::OsString>,
}

impl PathLocator {
    /// Locator using the process `PATH`
    pub fn from_env() -> Self {
        Self {
            path: std::env::var_os("PATH"),
        }
    }

    /// Locator using an explicit search path
    pub fn with_path(path: impl Into<std::ffi::OsString>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl ToolLocator for PathLocator {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        std::env::split_paths(path)
            .map(|dir| dir.join(tool))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn install_hint(tool: &str) -> String {
    match tool {
        "kubectl" => "Install kubectl: https://kubernetes.io/docs/tasks/tools/".to_string(),
        "helm" => "Install helm: https://helm.sh/docs/intro/install/".to_string(),
        "openssl" => "Install openssl from your distribution packages".to_string(),
        other => format!("Install {} before running this command", other),
    }
}

/// Fail with [`Error::MissingTool`] on the first tool `locator` cannot resolve
pub fn ensure_tools(locator: &dyn ToolLocator, tools: &[&str]) -> Result<()> {
    info!("Checking prerequisites...");
    for tool in tools {
        match locator.locate(tool) {
            Some(path) => debug!(tool, path = %path.display(), "found tool"),
            None => return Err(Error::missing_tool(*tool, install_hint(tool))),
        }
    }
    Ok(())
}
