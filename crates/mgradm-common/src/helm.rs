//! Helm based deployment of the server
//!
//! Every phase of the pipeline converges the release through
//! `helm upgrade --install`, which is idempotent for unchanged values.
//! `--wait` makes each call block until the server is rolled out, so a
//! successful deploy means the pod is reachable for the next phase.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::exec::{to_args, CommandRunner};
use crate::image::ImageReference;
use crate::params::DeploymentParameters;
use crate::ssl::ThirdPartyCertificate;
use crate::{Error, Result};

/// Default server chart
pub const DEFAULT_CHART: &str = "oci://registry.opensuse.org/uyuni/server-helm";
/// Default release namespace
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default release name
pub const DEFAULT_RELEASE: &str = "uyuni";

/// Secret holding the third-party server certificate
pub const CERT_SECRET_NAME: &str = "uyuni-cert";
/// ConfigMap holding the third-party root CA
pub const CA_CONFIGMAP_NAME: &str = "uyuni-ca";
/// File the certificate objects are rendered to before `kubectl apply`
const CERTIFICATE_MANIFEST_FILE: &str = "existing-certificate.yaml";

/// Helm chart and release settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmFlags {
    /// Chart reference (OCI URL, repo/chart or local path)
    pub chart: String,
    /// Chart version; latest when unset
    pub version: Option<String>,
    /// Namespace of the release
    pub namespace: String,
    /// Release name
    pub release: String,
    /// Extra values file passed to every invocation
    pub values: Option<PathBuf>,
    /// Kubeconfig used for helm and kubectl
    pub kubeconfig: Option<PathBuf>,
}

impl Default for HelmFlags {
    fn default() -> Self {
        Self {
            chart: DEFAULT_CHART.to_string(),
            version: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            release: DEFAULT_RELEASE.to_string(),
            values: None,
            kubeconfig: None,
        }
    }
}

/// One invocation of the deployment tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Server image to run
    pub image: ImageReference,
    /// Kubernetes pull policy for `image`
    pub pull_policy: String,
    /// Public FQDN of the server
    pub fqdn: String,
    /// Ingress controller of the cluster
    pub ingress: String,
    /// Accumulated overrides
    pub params: DeploymentParameters,
}

/// Applies the server deployment to the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Install or upgrade the server release, blocking until it is rolled out
    async fn deploy(&self, request: &DeployRequest) -> Result<()>;

    /// Install third-party certificates as cluster objects
    ///
    /// `scratch_dir` receives the rendered manifests.
    async fn apply_existing_certificate(
        &self,
        certificate: &ThirdPartyCertificate,
        scratch_dir: &Path,
    ) -> Result<()>;
}

/// [`Deployer`] driving the `helm` and `kubectl` binaries
pub struct HelmDeployer {
    runner: Arc<dyn CommandRunner>,
    flags: HelmFlags,
}

impl HelmDeployer {
    /// Create a deployer for the release described by `flags`
    pub fn new(runner: Arc<dyn CommandRunner>, flags: HelmFlags) -> Self {
        Self { runner, flags }
    }

    /// Arguments of the `helm upgrade --install` call for `request`
    pub fn upgrade_args(&self, request: &DeployRequest) -> Vec<String> {
        let mut args = to_args([
            "upgrade",
            "--install",
            self.flags.release.as_str(),
            self.flags.chart.as_str(),
            "--namespace",
            self.flags.namespace.as_str(),
            "--create-namespace",
            "--wait",
        ]);

        if let Some(version) = &self.flags.version {
            args.extend(to_args(["--version", version.as_str()]));
        }
        if let Some(values) = &self.flags.values {
            args.push("--values".to_string());
            args.push(values.display().to_string());
        }
        if let Some(kubeconfig) = &self.flags.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }

        args.extend(to_args([
            "--set".to_string(),
            format!("images.server={}", request.image),
            "--set".to_string(),
            format!("pullPolicy={}", request.pull_policy),
            "--set".to_string(),
            format!("fqdn={}", request.fqdn),
            "--set".to_string(),
            format!("ingress={}", request.ingress),
        ]));
        args.extend(request.params.to_helm_args());
        args
    }

    fn kubectl_args<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut result = to_args(args);
        if let Some(kubeconfig) = &self.flags.kubeconfig {
            result.push("--kubeconfig".to_string());
            result.push(kubeconfig.display().to_string());
        }
        result
    }
}

#[async_trait]
impl Deployer for HelmDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<()> {
        info!(
            release = %self.flags.release,
            namespace = %self.flags.namespace,
            image = %request.image,
            "Deploying server"
        );
        debug!(params = %request.params, "deployment parameters");
        self.runner
            .run("helm", &self.upgrade_args(request), &[])
            .await?;
        Ok(())
    }

    async fn apply_existing_certificate(
        &self,
        certificate: &ThirdPartyCertificate,
        scratch_dir: &Path,
    ) -> Result<()> {
        info!("Installing third-party certificates");
        let manifest = certificate_manifest(certificate, &self.flags.namespace)?;
        let manifest_path = scratch_dir.join(CERTIFICATE_MANIFEST_FILE);
        tokio::fs::write(&manifest_path, manifest).await?;

        let path = manifest_path.display().to_string();
        let args = self.kubectl_args([
            "apply",
            "--namespace",
            self.flags.namespace.as_str(),
            "-f",
            path.as_str(),
        ]);
        self.runner.run("kubectl", &args, &[]).await?;
        Ok(())
    }
}

fn read_material(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::material(path, e.to_string()))
}

/// Render the TLS secret and CA config map for a third-party certificate
pub fn certificate_manifest(certificate: &ThirdPartyCertificate, namespace: &str) -> Result<String> {
    let root_ca = read_material(&certificate.root_ca)?;
    let server_cert = read_material(&certificate.server_cert)?;
    let server_key = read_material(&certificate.server_key)?;

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(CERT_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(server_cert)),
            ("tls.key".to_string(), ByteString(server_key)),
            ("ca.crt".to_string(), ByteString(root_ca.clone())),
        ])),
        ..Default::default()
    };

    let root_ca_text = String::from_utf8(root_ca)
        .map_err(|_| Error::material(&certificate.root_ca, "root CA is not PEM text"))?;
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(CA_CONFIGMAP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("ca.crt".to_string(), root_ca_text)])),
        ..Default::default()
    };

    Ok(format!(
        "{}---\n{}",
        serde_yaml::to_string(&secret)?,
        serde_yaml::to_string(&config_map)?
    ))
}
