//! CLI commands

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use mgradm_common::exec::{CommandRunner, SystemRunner};
use mgradm_common::helm::{Deployer, HelmDeployer, HelmFlags};
use mgradm_common::image::{ImageFlags, MigrationImageFlags};
use mgradm_common::kubernetes::{ClusterDiscovery, KubectlDiscovery, KubectlExecutor, ScriptExecutor};
use mgradm_common::preflight::{PathLocator, ToolLocator};
use mgradm_common::ssl::{CertificateTool, OpenSslTool};

use crate::config::FileConfig;
use crate::{Error, Result};

pub mod migrate;
mod pipeline;
pub mod upgrade;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Server image selection
#[derive(Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Server image, with or without a tag
    #[arg(long)]
    pub image: Option<String>,

    /// Server image tag, used when --image has none
    #[arg(long)]
    pub tag: Option<String>,

    /// Image pull policy
    #[arg(long)]
    pub pull_policy: Option<String>,

    /// Database migration image, computed from the versions by default
    #[arg(long)]
    pub migration_image: Option<String>,

    /// Database migration image tag, the server tag by default
    #[arg(long)]
    pub migration_tag: Option<String>,
}

/// Helm release settings
#[derive(Args, Debug, Clone, Default)]
pub struct HelmArgs {
    /// Server helm chart
    #[arg(long = "helm-chart")]
    pub chart: Option<String>,

    /// Server helm chart version
    #[arg(long = "helm-version")]
    pub chart_version: Option<String>,

    /// Namespace of the server release
    #[arg(long = "helm-namespace")]
    pub namespace: Option<String>,

    /// Name of the server release
    #[arg(long = "helm-release")]
    pub release: Option<String>,

    /// Extra values file for the server chart
    #[arg(long = "helm-values")]
    pub values: Option<PathBuf>,

    /// Kubeconfig of the target cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

/// Flags shared by the Kubernetes commands
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    #[command(flatten)]
    pub helm: HelmArgs,

    /// Where to create the scratch directory
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

/// Settings after merging flags, configuration file and defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub image: ImageFlags,
    pub migration_image: MigrationImageFlags,
    pub helm: HelmFlags,
    pub scratch_root: Option<PathBuf>,
}

impl ServerArgs {
    /// Merge with `file`; flags win over the file, the file over defaults
    pub fn resolve(&self, file: &FileConfig) -> Settings {
        let image_defaults = ImageFlags::default();
        let helm_defaults = HelmFlags::default();
        let pick = |flag: &Option<String>, from_file: &Option<String>, default: String| {
            flag.clone().or_else(|| from_file.clone()).unwrap_or(default)
        };

        Settings {
            image: ImageFlags {
                name: pick(&self.image.image, &file.image.name, image_defaults.name),
                tag: pick(&self.image.tag, &file.image.tag, image_defaults.tag),
                pull_policy: pick(
                    &self.image.pull_policy,
                    &file.image.pull_policy,
                    image_defaults.pull_policy,
                ),
            },
            migration_image: MigrationImageFlags {
                name: self
                    .image
                    .migration_image
                    .clone()
                    .or_else(|| file.migration_image.name.clone()),
                tag: self
                    .image
                    .migration_tag
                    .clone()
                    .or_else(|| file.migration_image.tag.clone()),
            },
            helm: HelmFlags {
                chart: pick(&self.helm.chart, &file.helm.chart, helm_defaults.chart),
                version: self
                    .helm
                    .chart_version
                    .clone()
                    .or_else(|| file.helm.version.clone()),
                namespace: pick(
                    &self.helm.namespace,
                    &file.helm.namespace,
                    helm_defaults.namespace,
                ),
                release: pick(&self.helm.release, &file.helm.release, helm_defaults.release),
                values: self.helm.values.clone().or_else(|| file.helm.values.clone()),
                kubeconfig: self
                    .helm
                    .kubeconfig
                    .clone()
                    .or_else(|| file.helm.kubeconfig.clone()),
            },
            scratch_root: self.scratch_dir.clone().or_else(|| file.scratch_dir.clone()),
        }
    }
}

/// External capabilities the pipelines drive
///
/// Built once per command and handed down to every phase.
#[derive(Clone)]
pub struct Backends {
    pub tools: Arc<dyn ToolLocator>,
    pub discovery: Arc<dyn ClusterDiscovery>,
    pub deployer: Arc<dyn Deployer>,
    pub executor: Arc<dyn ScriptExecutor>,
    pub certificates: Arc<dyn CertificateTool>,
}

impl Backends {
    /// Backends calling the real kubectl, helm and openssl binaries
    pub fn system(helm: &HelmFlags) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let kubeconfig = helm
            .kubeconfig
            .clone()
            .or_else(|| std::env::var_os("KUBECONFIG").map(PathBuf::from));

        Self {
            tools: Arc::new(PathLocator::from_env()),
            discovery: Arc::new(KubectlDiscovery::new(runner.clone(), kubeconfig.clone())),
            deployer: Arc::new(HelmDeployer::new(runner.clone(), helm.clone())),
            executor: Arc::new(KubectlExecutor::new(
                runner.clone(),
                kubeconfig,
                helm.namespace.clone(),
            )),
            certificates: Arc::new(OpenSslTool::new(runner)),
        }
    }
}

#[cfg(test)]
pub(crate) mod mocks {
    //! Doubles for the capabilities defined in mgradm-common

    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use mockall::mock;

    use mgradm_common::helm::{DeployRequest, Deployer};
    use mgradm_common::image::ImageReference;
    use mgradm_common::kubernetes::{ClusterDiscovery, ClusterInfo, InspectData, ScriptExecutor};
    use mgradm_common::preflight::ToolLocator;
    use mgradm_common::ssl::{CertificateTool, ThirdPartyCertificate};
    use mgradm_common::Result;

    use super::Backends;

    mock! {
        pub Tools {}
        impl ToolLocator for Tools {
            fn locate(&self, tool: &str) -> Option<PathBuf>;
        }
    }

    mock! {
        pub Cluster {}
        #[async_trait]
        impl ClusterDiscovery for Cluster {
            async fn cluster_info(&self) -> Result<ClusterInfo>;
        }
    }

    mock! {
        pub Helm {}
        #[async_trait]
        impl Deployer for Helm {
            async fn deploy(&self, request: &DeployRequest) -> Result<()>;
            async fn apply_existing_certificate(
                &self,
                certificate: &ThirdPartyCertificate,
                scratch_dir: &Path,
            ) -> Result<()>;
        }
    }

    mock! {
        pub Server {}
        #[async_trait]
        impl ScriptExecutor for Server {
            async fn run_script(&self, scratch_dir: &Path, script: &str) -> Result<()>;
            async fn inspect_running(&self) -> Result<InspectData>;
            async fn inspect_image(
                &self,
                image: &ImageReference,
                pull_policy: &str,
            ) -> Result<InspectData>;
        }
    }

    mock! {
        pub Openssl {}
        #[async_trait]
        impl CertificateTool for Openssl {
            async fn decrypt_key(&self, key: &Path, password: Option<String>) -> Result<Vec<u8>>;
            async fn strip_certificate(&self, cert: &Path) -> Result<Vec<u8>>;
        }
    }

    /// Locator finding every tool
    pub fn all_tools() -> MockTools {
        let mut tools = MockTools::new();
        tools
            .expect_locate()
            .returning(|tool| Some(PathBuf::from("/usr/bin").join(tool)));
        tools
    }

    /// Discovery of a k3s cluster
    pub fn k3s_cluster() -> MockCluster {
        let mut cluster = MockCluster::new();
        cluster.expect_cluster_info().times(1).returning(|| {
            Ok(ClusterInfo {
                kubeconfig: None,
                ingress: "traefik".to_string(),
            })
        });
        cluster
    }

    /// Deployer recording every deploy request in order
    pub fn recording_helm(deploys: Arc<Mutex<Vec<DeployRequest>>>) -> MockHelm {
        let mut helm = MockHelm::new();
        helm.expect_deploy().returning(move |request| {
            deploys.lock().unwrap().push(request.clone());
            Ok(())
        });
        helm
    }

    pub fn backends(
        tools: MockTools,
        cluster: MockCluster,
        helm: MockHelm,
        server: MockServer,
        openssl: MockOpenssl,
    ) -> Backends {
        Backends {
            tools: Arc::new(tools),
            discovery: Arc::new(cluster),
            deployer: Arc::new(helm),
            executor: Arc::new(server),
            certificates: Arc::new(openssl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HelmConfig, ImageConfig};

    #[test]
    fn test_cmd_err_wraps_display() {
        let result: std::result::Result<(), String> = Err("boom".to_string());
        let err = result.cmd_err().unwrap_err();
        assert_eq!(err.to_string(), "command failed: boom");
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = ServerArgs::default().resolve(&FileConfig::default());
        assert_eq!(settings.image, ImageFlags::default());
        assert_eq!(settings.helm, HelmFlags::default());
        assert_eq!(settings.migration_image, MigrationImageFlags::default());
        assert_eq!(settings.scratch_root, None);
    }

    #[test]
    fn test_resolve_flags_override_file() {
        let file = FileConfig {
            image: ImageConfig {
                name: Some("file.example.com/server".to_string()),
                tag: Some("from-file".to_string()),
                pull_policy: None,
            },
            helm: HelmConfig {
                namespace: Some("file-ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let args = ServerArgs {
            image: ImageArgs {
                tag: Some("from-flag".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let settings = args.resolve(&file);
        assert_eq!(settings.image.name, "file.example.com/server");
        assert_eq!(settings.image.tag, "from-flag");
        assert_eq!(settings.image.pull_policy, "IfNotPresent");
        assert_eq!(settings.helm.namespace, "file-ns");
        assert_eq!(settings.helm.release, "uyuni");
    }
}
