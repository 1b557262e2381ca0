//! Migrate command - Move a legacy server into a Kubernetes deployment
//!
//! The migration:
//! 1. Checks the required tools and inspects the cluster
//! 2. Deploys a temporary server with a generated CA
//! 3. Copies the legacy server state through a generated script
//! 4. Upgrades the database engine when the versions differ
//! 5. Finalizes the server state
//! 6. Carries the legacy certificates over
//! 7. Converges the deployment to its final configuration

use std::env::VarError;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Subcommand};
use tracing::{info, warn};

use mgradm_common::image::ImageReference;
use mgradm_common::kubernetes::ClusterInfo;
use mgradm_common::params::{
    DeploymentParameters, DATA_PATH, SSH_AGENT_SOCKET, SSH_CONFIG_PATH, SSH_KNOWN_HOSTS_PATH,
    TIMEZONE,
};
use mgradm_common::preflight::ensure_tools;
use mgradm_common::scratch::ScratchDir;
use mgradm_common::scripts::{generate_migration_script, read_migration_data, FinalizeOptions};
use mgradm_common::ssl::CertificateMaterial;
use mgradm_common::MIGRATE_REQUIRED_TOOLS;

use super::pipeline::Pipeline;
use super::{Backends, CommandErrorExt, ServerArgs, Settings};
use crate::config::FileConfig;
use crate::{Error, Result};

/// Migration targets
#[derive(Subcommand, Debug)]
pub enum MigrateTarget {
    /// Migrate a legacy server to a Kubernetes cluster
    Kubernetes(KubernetesMigrateArgs),
}

/// Migrate to Kubernetes
#[derive(Args, Debug)]
pub struct KubernetesMigrateArgs {
    /// FQDN of the legacy server
    pub fqdn: String,

    #[command(flatten)]
    pub server: ServerArgs,

    /// Passphrase of the legacy server CA key
    #[arg(long, env = "MGRADM_SSL_PASSWORD", hide_env_values = true)]
    pub ssl_password: Option<String>,
}

pub async fn run(target: MigrateTarget, file: &FileConfig) -> Result<()> {
    match target {
        MigrateTarget::Kubernetes(args) => {
            if args.fqdn.trim().is_empty() {
                return Err(Error::validation("the legacy server FQDN cannot be empty"));
            }
            let settings = args.server.resolve(file);
            let backends = Backends::system(&settings.helm);
            let config = MigrateConfig {
                fqdn: args.fqdn,
                ssh: SshContext::from_env()?,
                ssl_password: args.ssl_password.or_else(|| file.ssl.password.clone()),
                settings,
            };
            Migrator::new(config, backends).run().await
        }
    }
}

/// SSH locations the migration scripts use to reach the legacy server
///
/// Nothing is validated here: the scripts report missing files themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshContext {
    pub agent_socket: String,
    pub config_path: PathBuf,
    pub known_hosts_path: PathBuf,
}

impl SshContext {
    /// Forwarded agent socket from `SSH_AUTH_SOCK`, config files from `~/.ssh`
    pub fn from_env() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::command_failed("could not determine home directory"))?;
        let agent_socket = agent_socket(std::env::var("SSH_AUTH_SOCK"))?;
        if agent_socket.is_empty() {
            warn!("SSH_AUTH_SOCK is not set, the legacy server may not be reachable");
        }
        Ok(Self::new(agent_socket, &home))
    }

    /// Context for `agent_socket` with the SSH files of `home`
    pub fn new(agent_socket: impl Into<String>, home: &Path) -> Self {
        let ssh_dir = home.join(".ssh");
        Self {
            agent_socket: agent_socket.into(),
            config_path: ssh_dir.join("config"),
            known_hosts_path: ssh_dir.join("known_hosts"),
        }
    }

    /// Deployment overrides exposing these locations to the server
    pub fn parameters(&self) -> DeploymentParameters {
        DeploymentParameters::new()
            .with(SSH_AGENT_SOCKET, self.agent_socket.clone())
            .with(SSH_CONFIG_PATH, self.config_path.display().to_string())
            .with(SSH_KNOWN_HOSTS_PATH, self.known_hosts_path.display().to_string())
    }
}

/// An unset socket is tolerated, an unusable value is not
fn agent_socket(value: std::result::Result<String, VarError>) -> Result<String> {
    match value {
        Err(VarError::NotPresent) => Ok(String::new()),
        other => other.cmd_err(),
    }
}

/// Configuration for the migrator
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// FQDN of the legacy server, kept by the new one
    pub fqdn: String,
    pub settings: Settings,
    pub ssh: SshContext,
    /// Passphrase of the legacy CA key
    pub ssl_password: Option<String>,
}

/// The Kubernetes migrator
pub struct Migrator {
    config: MigrateConfig,
    backends: Backends,
}

impl Migrator {
    pub fn new(config: MigrateConfig, backends: Backends) -> Self {
        Self { config, backends }
    }

    /// Run the migration
    pub async fn run(&self) -> Result<()> {
        let start = Instant::now();

        info!("[Phase 1] Preflight");
        ensure_tools(self.backends.tools.as_ref(), &MIGRATE_REQUIRED_TOOLS)?;
        let cluster = self.backends.discovery.cluster_info().await?;
        let primary = self.config.settings.image.reference()?;

        let scratch = ScratchDir::create(self.config.settings.scratch_root.as_deref())?;
        self.migrate(&cluster, &primary, scratch.path()).await?;

        info!("Migration complete in {:?}", start.elapsed());
        info!("Server {} is now running on Kubernetes.", self.config.fqdn);
        Ok(())
    }

    async fn migrate(
        &self,
        cluster: &ClusterInfo,
        primary: &ImageReference,
        scratch: &Path,
    ) -> Result<()> {
        let fqdn = self.config.fqdn.as_str();
        let pipeline = Pipeline::new(&self.backends, &self.config.settings, fqdn, cluster, scratch);

        info!("[Phase 2] Deploying temporary server");
        let script = generate_migration_script(scratch, fqdn, true)?;
        let temporary = self
            .config
            .ssh
            .parameters()
            .with(DATA_PATH, scratch.display().to_string());
        pipeline.deploy(primary, &temporary).await?;

        info!("[Phase 3] Copying data from {}", fqdn);
        pipeline.run_script(&script).await?;
        let data = read_migration_data(scratch)?;
        let versions = data.version_pair()?;

        let mut params = DeploymentParameters::reset();
        params.set(TIMEZONE, data.timezone.as_str());
        let script_params = pipeline.with_scratch_mount(&params);

        info!("[Phase 4] Checking database versions");
        pipeline.reconcile_database(&versions, &script_params).await?;

        info!("[Phase 5] Finalizing migration");
        let options = FinalizeOptions {
            run_autotune: true,
            run_reindex: versions.needs_upgrade(),
            run_schema_update: true,
            migration: true,
        };
        pipeline.finalize(options, primary, &script_params).await?;

        info!("[Phase 6] Carrying over certificates");
        let material = CertificateMaterial::discover(
            scratch,
            self.backends.certificates.as_ref(),
            self.config.ssl_password.as_deref(),
        )
        .await?;
        match material {
            CertificateMaterial::SelfIssued(ca) => {
                params.extend(&ca.parameters());
            }
            CertificateMaterial::ThirdParty(certificate) => {
                certificate
                    .apply(self.backends.deployer.as_ref(), scratch)
                    .await?;
            }
        }

        info!("[Phase 7] Converging deployment");
        pipeline.deploy(primary, &params).await
    }
}
