//! Phases shared by the migrate and upgrade pipelines
//!
//! Every phase writes into the scratch directory owned by the caller and
//! deploys through the same release, so the pieces here only differ by the
//! image and the accumulated parameters they are handed.

use std::path::Path;

use tracing::info;

use mgradm_common::helm::DeployRequest;
use mgradm_common::image::{migration_image, ImageReference};
use mgradm_common::kubernetes::ClusterInfo;
use mgradm_common::params::{DeploymentParameters, DATA_PATH};
use mgradm_common::scripts::{
    generate_finalize_script, generate_pg_migration_script, FinalizeOptions, VersionPair,
};

use super::{Backends, Settings};
use crate::Result;

/// One pipeline run against one server release
pub(crate) struct Pipeline<'a> {
    backends: &'a Backends,
    settings: &'a Settings,
    fqdn: &'a str,
    ingress: String,
    scratch: &'a Path,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        backends: &'a Backends,
        settings: &'a Settings,
        fqdn: &'a str,
        cluster: &ClusterInfo,
        scratch: &'a Path,
    ) -> Self {
        Self {
            backends,
            settings,
            fqdn,
            ingress: cluster.ingress.clone(),
            scratch,
        }
    }

    /// `params` with the scratch directory mounted into the server
    pub fn with_scratch_mount(&self, params: &DeploymentParameters) -> DeploymentParameters {
        params
            .clone()
            .with(DATA_PATH, self.scratch.display().to_string())
    }

    pub async fn deploy(&self, image: &ImageReference, params: &DeploymentParameters) -> Result<()> {
        let request = DeployRequest {
            image: image.clone(),
            pull_policy: self.settings.image.pull_policy.clone(),
            fqdn: self.fqdn.to_string(),
            ingress: self.ingress.clone(),
            params: params.clone(),
        };
        self.backends.deployer.deploy(&request).await?;
        Ok(())
    }

    pub async fn run_script(&self, script: &str) -> Result<()> {
        self.backends.executor.run_script(self.scratch, script).await?;
        Ok(())
    }

    /// Upgrade the database engine when the versions differ
    pub async fn reconcile_database(
        &self,
        versions: &VersionPair,
        params: &DeploymentParameters,
    ) -> Result<()> {
        if !versions.needs_upgrade() {
            info!("Database version {} is current", versions.target);
            return Ok(());
        }

        info!(
            "Upgrading database from {} to {}",
            versions.legacy, versions.target
        );
        let image = migration_image(
            &self.settings.image,
            &self.settings.migration_image,
            &versions.legacy,
            &versions.target,
        )?;
        info!("Using migration image {}", image);

        let script =
            generate_pg_migration_script(self.scratch, &versions.legacy, &versions.target)?;
        self.deploy(&image, params).await?;
        self.run_script(&script).await
    }

    /// Generate the finalize script and run it on the `primary` image
    pub async fn finalize(
        &self,
        options: FinalizeOptions,
        primary: &ImageReference,
        params: &DeploymentParameters,
    ) -> Result<()> {
        let script = generate_finalize_script(self.scratch, options)?;
        self.deploy(primary, params).await?;
        self.run_script(&script).await
    }
}
