//! Upgrade command - Move a Kubernetes server to a new image
//!
//! The running server and the new image are inspected first; a database
//! engine change goes through the migration image before the server is
//! finalized on the new image. Certificates already live in the cluster and
//! are left alone.

use std::path::Path;
use std::time::Instant;

use clap::{Args, Subcommand};
use tracing::info;

use mgradm_common::image::ImageReference;
use mgradm_common::kubernetes::ClusterInfo;
use mgradm_common::params::{DeploymentParameters, TIMEZONE};
use mgradm_common::preflight::ensure_tools;
use mgradm_common::scratch::ScratchDir;
use mgradm_common::scripts::{FinalizeOptions, VersionPair};
use mgradm_common::KUBERNETES_REQUIRED_TOOLS;

use super::pipeline::Pipeline;
use super::{Backends, ServerArgs, Settings};
use crate::config::FileConfig;
use crate::{Error, Result};

/// Upgrade targets
#[derive(Subcommand, Debug)]
pub enum UpgradeTarget {
    /// Upgrade a server running on Kubernetes
    Kubernetes(KubernetesUpgradeArgs),
}

/// Upgrade on Kubernetes
#[derive(Args, Debug)]
pub struct KubernetesUpgradeArgs {
    /// FQDN of the server
    pub fqdn: String,

    #[command(flatten)]
    pub server: ServerArgs,
}

pub async fn run(target: UpgradeTarget, file: &FileConfig) -> Result<()> {
    match target {
        UpgradeTarget::Kubernetes(args) => {
            if args.fqdn.trim().is_empty() {
                return Err(Error::validation("the server FQDN cannot be empty"));
            }
            let settings = args.server.resolve(file);
            let backends = Backends::system(&settings.helm);
            Upgrader::new(args.fqdn, settings, backends).run().await
        }
    }
}

/// The Kubernetes upgrader
pub struct Upgrader {
    fqdn: String,
    settings: Settings,
    backends: Backends,
}

impl Upgrader {
    pub fn new(fqdn: String, settings: Settings, backends: Backends) -> Self {
        Self {
            fqdn,
            settings,
            backends,
        }
    }

    /// Run the upgrade
    pub async fn run(&self) -> Result<()> {
        let start = Instant::now();

        info!("[Phase 1] Preflight");
        ensure_tools(self.backends.tools.as_ref(), &KUBERNETES_REQUIRED_TOOLS)?;
        let cluster = self.backends.discovery.cluster_info().await?;
        let primary = self.settings.image.reference()?;

        info!("[Phase 2] Inspecting running server and {}", primary);
        let running = self.backends.executor.inspect_running().await?;
        let next = self
            .backends
            .executor
            .inspect_image(&primary, &self.settings.image.pull_policy)
            .await?;
        if let (Some(from), Some(to)) = (&running.release, &next.release) {
            info!("Upgrading server from {} to {}", from, to);
        }
        let versions = VersionPair::new(&running.db_version, &next.db_version)?;

        let mut params = DeploymentParameters::reset();
        if let Some(timezone) = running.timezone.as_deref().filter(|tz| !tz.is_empty()) {
            params.set(TIMEZONE, timezone);
        }

        let scratch = ScratchDir::create(self.settings.scratch_root.as_deref())?;
        self.upgrade(&cluster, &primary, &versions, &params, scratch.path())
            .await?;

        info!("Upgrade complete in {:?}", start.elapsed());
        Ok(())
    }

    async fn upgrade(
        &self,
        cluster: &ClusterInfo,
        primary: &ImageReference,
        versions: &VersionPair,
        params: &DeploymentParameters,
        scratch: &Path,
    ) -> Result<()> {
        let pipeline = Pipeline::new(&self.backends, &self.settings, &self.fqdn, cluster, scratch);
        let script_params = pipeline.with_scratch_mount(params);

        info!("[Phase 3] Checking database versions");
        pipeline.reconcile_database(versions, &script_params).await?;

        info!("[Phase 4] Finalizing upgrade");
        let options = FinalizeOptions {
            run_autotune: false,
            run_reindex: versions.needs_upgrade(),
            run_schema_update: true,
            migration: false,
        };
        pipeline.finalize(options, primary, &script_params).await?;

        info!("[Phase 5] Converging deployment");
        pipeline.deploy(primary, params).await
    }
}
