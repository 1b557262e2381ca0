//! Error types for mgradm
//!
//! Variants follow the failure classes of the migration pipeline: missing
//! preconditions, generation problems, failed executions and bad certificate
//! material. None of them terminates the process; the top-level command
//! handler decides the exit status.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for mgradm operations
#[derive(Debug, Error)]
pub enum Error {
    /// A required external tool is not on the execution path
    #[error("{tool} not found. {hint}")]
    MissingTool {
        /// Executable name
        tool: String,
        /// Installation hint for the operator
        hint: String,
    },

    /// Script or image reference generation failed
    #[error("generation error [{what}]: {message}")]
    Generation {
        /// What was being generated (e.g., "migrate.sh", "image")
        what: String,
        /// Description of what failed
        message: String,
    },

    /// An external command or generated script exited unsuccessfully
    #[error("{program} failed{}: {message}", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    Execution {
        /// Program or script that failed
        program: String,
        /// Exit status, if the process exited normally
        status: Option<i32>,
        /// Trimmed stderr or a description of the failure
        message: String,
    },

    /// Certificate files are missing or malformed
    #[error("certificate material error for {}: {message}", .path.display())]
    Material {
        /// The offending file
        path: PathBuf,
        /// Description of what is wrong
        message: String,
    },

    /// Migration metadata could not be read back
    #[error("migration data error: {message}")]
    Data {
        /// Description of what is wrong
        message: String,
    },

    /// Cluster inspection failed
    #[error("cluster error: {message}")]
    Cluster {
        /// Description of what failed
        message: String,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

impl Error {
    /// Create a missing tool error
    pub fn missing_tool(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingTool {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    /// Create a generation error
    pub fn generation(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(
        program: impl Into<String>,
        status: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self::Execution {
            program: program.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a certificate material error
    pub fn material(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Material {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a migration data error
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Create a cluster error
    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }

    /// Whether this error means the environment was not ready to start at all
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::MissingTool { .. })
    }
}
