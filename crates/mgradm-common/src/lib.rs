//! Common building blocks for mgradm: errors, external tools, deployment and
//! migration primitives shared by the migrate and upgrade commands.

#![deny(missing_docs)]

pub mod error;
pub mod exec;
pub mod helm;
pub mod image;
pub mod kubernetes;
pub mod params;
pub mod preflight;
pub mod scratch;
pub mod scripts;
pub mod ssl;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Tools every Kubernetes command needs before it touches anything
pub const KUBERNETES_REQUIRED_TOOLS: [&str; 2] = ["kubectl", "helm"];

/// Tools a Kubernetes migration needs, including the certificate toolchain
pub const MIGRATE_REQUIRED_TOOLS: [&str; 3] = ["kubectl", "helm", "openssl"];

/// Label selecting the server pod
pub const SERVER_POD_SELECTOR: &str = "app=uyuni";

/// Container running the server inside the pod
pub const SERVER_CONTAINER: &str = "uyuni";

/// Where the scratch directory is mounted inside the server container
pub const SERVER_DATA_MOUNT: &str = "/var/lib/uyuni-tools";
