//! Certificate continuity between the legacy server and the new deployment
//!
//! The migration script copies whatever trust material the legacy server had
//! into the scratch directory. A self-issued CA is recognized by its
//! certificate and key both being present; anything else is treated as a
//! third-party chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::exec::{to_args, CommandRunner};
use crate::helm::Deployer;
use crate::params::{DeploymentParameters, SSL_CA_CERT, SSL_CA_KEY};
use crate::{Error, Result};

/// CA certificate of a self-issued legacy CA (also the third-party root)
pub const CA_CERT_FILE: &str = "RHN-ORG-TRUSTED-SSL-CERT";
/// CA key of a self-issued legacy CA
pub const CA_KEY_FILE: &str = "RHN-ORG-PRIVATE-SSL-KEY";
/// Third-party server key
pub const SERVER_KEY_FILE: &str = "spacewalk.key";
/// Third-party server certificate
pub const SERVER_CERT_FILE: &str = "spacewalk.crt";

/// Environment variable carrying the CA passphrase to openssl
const PASSWORD_ENV: &str = "MGRADM_SSL_PASSWORD";

/// Key and certificate manipulation backed by a certificate toolchain
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateTool: Send + Sync {
    /// PEM encoded private key, decrypted with `password` when given
    async fn decrypt_key(&self, key: &Path, password: Option<String>) -> Result<Vec<u8>>;

    /// PEM certificate without the human readable text preamble
    async fn strip_certificate(&self, cert: &Path) -> Result<Vec<u8>>;
}

/// [`CertificateTool`] running the `openssl` binary
pub struct OpenSslTool {
    runner: Arc<dyn CommandRunner>,
}

impl OpenSslTool {
    /// Create a tool running openssl through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CertificateTool for OpenSslTool {
    async fn decrypt_key(&self, key: &Path, password: Option<String>) -> Result<Vec<u8>> {
        let key_path = key.display().to_string();
        let passin = format!("env:{}", PASSWORD_ENV);
        // Always set so openssl never prompts on the terminal for a passphrase
        let args = to_args(["pkey", "-in", key_path.as_str(), "-passin", passin.as_str()]);
        let env = vec![(PASSWORD_ENV.to_string(), password.unwrap_or_default())];

        let output = self
            .runner
            .run("openssl", &args, &env)
            .await
            .map_err(|e| Error::material(key, format!("failed to read key: {}", e)))?;
        non_empty(key, output.stdout)
    }

    async fn strip_certificate(&self, cert: &Path) -> Result<Vec<u8>> {
        let cert_path = cert.display().to_string();
        let output = self
            .runner
            .run("openssl", &to_args(["x509", "-in", cert_path.as_str()]), &[])
            .await
            .map_err(|e| {
                Error::material(cert, format!("failed to strip certificate text: {}", e))
            })?;
        non_empty(cert, output.stdout)
    }
}

fn non_empty(path: &Path, data: Vec<u8>) -> Result<Vec<u8>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::material(path, "openssl produced no output"));
    }
    Ok(data)
}

/// CA carried over from a legacy server that issued its own certificates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfIssuedCertificate {
    /// Base64 of the PEM certificate
    pub cert_base64: String,
    /// Base64 of the unencrypted PEM key
    pub key_base64: String,
}

impl SelfIssuedCertificate {
    /// Overrides making the deployment trust and present this CA
    pub fn parameters(&self) -> DeploymentParameters {
        DeploymentParameters::new()
            .with(SSL_CA_CERT, self.cert_base64.clone())
            .with(SSL_CA_KEY, self.key_base64.clone())
    }
}

/// Third-party chain files left in the scratch directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPartyCertificate {
    /// Root CA of the chain
    pub root_ca: PathBuf,
    /// Server private key
    pub server_key: PathBuf,
    /// Server certificate
    pub server_cert: PathBuf,
}

impl ThirdPartyCertificate {
    /// Paths of the well-known files inside `dir`; existence is not checked
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            root_ca: dir.join(CA_CERT_FILE),
            server_key: dir.join(SERVER_KEY_FILE),
            server_cert: dir.join(SERVER_CERT_FILE),
        }
    }

    /// Install the chain through the deployer's dedicated certificate path
    pub async fn apply(&self, deployer: &dyn Deployer, scratch_dir: &Path) -> Result<()> {
        deployer.apply_existing_certificate(self, scratch_dir).await
    }
}

/// Which kind of trust material the legacy server used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// Both CA files are present
    SelfIssued {
        /// CA certificate file
        cert: PathBuf,
        /// CA key file
        key: PathBuf,
    },
    /// Anything else
    ThirdParty(ThirdPartyCertificate),
}

impl CertificateSource {
    /// Discriminate on the scratch directory content
    ///
    /// The self-issued check runs first and wins when both kinds of files exist.
    pub fn detect(scratch_dir: &Path) -> Self {
        let cert = scratch_dir.join(CA_CERT_FILE);
        let key = scratch_dir.join(CA_KEY_FILE);
        if cert.is_file() && key.is_file() {
            Self::SelfIssued { cert, key }
        } else {
            Self::ThirdParty(ThirdPartyCertificate::in_dir(scratch_dir))
        }
    }
}

/// Trust material to reproduce in the new deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateMaterial {
    /// Returned to the caller as deployment overrides
    SelfIssued(SelfIssuedCertificate),
    /// Deployed through its own call
    ThirdParty(ThirdPartyCertificate),
}

impl CertificateMaterial {
    /// Detect the legacy trust material and prepare it for the new deployment
    pub async fn discover(
        scratch_dir: &Path,
        tool: &dyn CertificateTool,
        password: Option<&str>,
    ) -> Result<Self> {
        match CertificateSource::detect(scratch_dir) {
            CertificateSource::SelfIssued { cert, key } => {
                info!("Reusing the self-issued CA of the source server");
                let key_pem = tool
                    .decrypt_key(&key, password.map(str::to_string))
                    .await?;
                let cert_pem = tool.strip_certificate(&cert).await?;
                Ok(Self::SelfIssued(SelfIssuedCertificate {
                    cert_base64: STANDARD.encode(cert_pem),
                    key_base64: STANDARD.encode(key_pem),
                }))
            }
            CertificateSource::ThirdParty(certificate) => {
                info!("Source server uses third-party certificates");
                Ok(Self::ThirdParty(certificate))
            }
        }
    }
}
