//! mgradm
//!
//! Migrates legacy servers to Kubernetes and upgrades containerized ones.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mgradm_cli::{Cli, Error};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = cli.run().await {
        match &e {
            Error::Common(inner) if inner.is_precondition() => {
                error!("Preflight failed: {}", inner)
            }
            _ => error!("{}", e),
        }
        std::process::exit(1);
    }
}
