//! Script generation
//!
//! Scripts are minijinja templates compiled into the binary and rendered into
//! the scratch directory, where the server sees them through its data mount.
//! Rendering uses strict undefined behavior so a missing value is a
//! generation error rather than an empty string in a shell script.

mod data;

pub use data::{read_migration_data, MigrationData, VersionPair, DATA_FILE};

use std::path::{Path, PathBuf};

use minijinja::{context, Environment, UndefinedBehavior};
use tracing::debug;

use crate::ssl::{CA_CERT_FILE, CA_KEY_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE};
use crate::{Error, Result, SERVER_DATA_MOUNT};

/// Name of the initial migration script
pub const MIGRATE_SCRIPT: &str = "migrate.sh";
/// Name of the database upgrade script
pub const PGSQL_MIGRATE_SCRIPT: &str = "pgsql_migrate.sh";
/// Name of the finalize script
pub const FINALIZE_SCRIPT: &str = "migrate_finalize.sh";

/// File marking a server as migrated from a legacy installation
pub const MIGRATED_MARKER: &str = "/etc/uyuni/.migrated";

/// Folders copied from the legacy server
const MIGRATED_FOLDERS: [&str; 11] = [
    "/var/lib/pgsql/data",
    "/var/spacewalk",
    "/var/cache",
    "/var/lib/cobbler",
    "/var/lib/salt",
    "/srv/salt",
    "/srv/pillar",
    "/srv/susemanager",
    "/srv/tftpboot",
    "/etc/rhn",
    "/etc/salt",
];

/// Prints `key=value` facts about a server, running or not
pub const INSPECT_SNIPPET: &str = r#"echo "timezone=$(cat /etc/timezone 2>/dev/null || timedatectl show -p Timezone --value 2>/dev/null)"
echo "db_version=$(cat /var/lib/pgsql/data/PG_VERSION 2>/dev/null || ls -1 /usr/lib | sed -n 's/^postgresql\([0-9]\+\)$/\1/p' | sort -n | tail -1)"
echo "release=$(sed -n 's/^web.version *= *//p' /usr/share/rhn/config-defaults/rhn_web.conf 2>/dev/null)""#;

/// Optional steps of the finalize script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeOptions {
    /// Tune the database for the new host
    pub run_autotune: bool,
    /// Rebuild indexes, needed after a database engine upgrade
    pub run_reindex: bool,
    /// Apply pending schema upgrades
    pub run_schema_update: bool,
    /// Post-migration fixups and cutover marker
    pub migration: bool,
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template(MIGRATE_SCRIPT, include_str!("templates/migrate.sh"))?;
    env.add_template(PGSQL_MIGRATE_SCRIPT, include_str!("templates/pgsql_migrate.sh"))?;
    env.add_template(FINALIZE_SCRIPT, include_str!("templates/migrate_finalize.sh"))?;
    Ok(env)
}

fn render(name: &str, ctx: minijinja::Value) -> Result<String> {
    environment()?
        .get_template(name)?
        .render(ctx)
        .map_err(|e| Error::generation(name, e.to_string()))
}

/// Write `content` as an executable script, replacing any previous version
fn write_script(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, content).map_err(|e| Error::generation(name, e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    debug!(path = %path.display(), "generated script");
    Ok(path)
}

fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
        })
}

fn is_valid_fqdn(fqdn: &str) -> bool {
    !fqdn.is_empty()
        && fqdn
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Generate the script copying the legacy server state into the new one
///
/// The kubernetes flavour skips host level configuration the chart manages.
pub fn generate_migration_script(dir: &Path, source_fqdn: &str, kubernetes: bool) -> Result<String> {
    if !is_valid_fqdn(source_fqdn) {
        return Err(Error::generation(
            MIGRATE_SCRIPT,
            format!("invalid source FQDN '{}'", source_fqdn),
        ));
    }

    let content = render(
        MIGRATE_SCRIPT,
        context! {
            source_fqdn => source_fqdn,
            data_mount => SERVER_DATA_MOUNT,
            data_file => DATA_FILE,
            folders => MIGRATED_FOLDERS.to_vec(),
            kubernetes => kubernetes,
            ca_cert => CA_CERT_FILE,
            ca_key => CA_KEY_FILE,
            server_key => SERVER_KEY_FILE,
            server_cert => SERVER_CERT_FILE,
        },
    )?;
    write_script(dir, MIGRATE_SCRIPT, &content)?;
    Ok(MIGRATE_SCRIPT.to_string())
}

/// Generate the database engine upgrade script, returning its name
pub fn generate_pg_migration_script(dir: &Path, legacy: &str, target: &str) -> Result<String> {
    for version in [legacy, target] {
        if !is_valid_version(version) {
            return Err(Error::generation(
                PGSQL_MIGRATE_SCRIPT,
                format!("invalid database version '{}'", version),
            ));
        }
    }

    let content = render(
        PGSQL_MIGRATE_SCRIPT,
        context! { legacy => legacy, target => target },
    )?;
    write_script(dir, PGSQL_MIGRATE_SCRIPT, &content)?;
    Ok(PGSQL_MIGRATE_SCRIPT.to_string())
}

/// Generate the finalize script, returning its name
pub fn generate_finalize_script(dir: &Path, options: FinalizeOptions) -> Result<String> {
    let content = render(
        FINALIZE_SCRIPT,
        context! {
            run_autotune => options.run_autotune,
            run_reindex => options.run_reindex,
            run_schema_update => options.run_schema_update,
            migration => options.migration,
            migrated_marker => MIGRATED_MARKER,
        },
    )?;
    write_script(dir, FINALIZE_SCRIPT, &content)?;
    Ok(FINALIZE_SCRIPT.to_string())
}
