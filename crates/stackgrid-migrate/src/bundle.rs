//! Loading migration sets from tar bundles and directories.
//!
//! A VAPI release archive carries its schema under `migrations/`; every
//! `<version>_<name>.sql` entry there becomes a migration. Other entries are
//! ignored.

use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::MigrateError;
use crate::migration::{Migration, MigrationSet};

const MIGRATIONS_DIR: &str = "migrations";

pub fn migrations_from_tar(archive: &[u8]) -> Result<MigrationSet, MigrateError> {
    let bundle_err = |e: std::io::Error| MigrateError::Bundle(e.to_string());
    let mut archive = tar::Archive::new(archive);
    let mut migrations = Vec::new();

    for entry in archive.entries().map_err(bundle_err)? {
        let mut entry = entry.map_err(bundle_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(bundle_err)?.into_owned();
        let Some(file_name) = migration_file_name(&path) else {
            continue;
        };
        let mut query = String::new();
        entry.read_to_string(&mut query).map_err(bundle_err)?;
        migrations.push(Migration::from_file(&file_name, query)?);
    }

    debug!(count = migrations.len(), "loaded migrations from bundle");
    Ok(MigrationSet::new(migrations))
}

/// The file name of a `migrations/<file>.sql` entry. Leading `./` is allowed.
fn migration_file_name(path: &Path) -> Option<String> {
    let mut components = path
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir));
    let dir = components.next()?;
    let file = components.next()?;
    if components.next().is_some() || dir.as_os_str() != MIGRATIONS_DIR {
        return None;
    }
    let file = file.as_os_str().to_str()?;
    file.ends_with(".sql").then(|| file.to_string())
}

/// Every `*.sql` file directly inside `dir`.
pub fn migrations_from_dir(dir: &Path) -> Result<MigrationSet, MigrateError> {
    let dir_err = |e: std::io::Error| MigrateError::Bundle(format!("{}: {e}", dir.display()));
    let mut migrations = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(dir_err)? {
        let entry = entry.map_err(dir_err)?;
        if !entry.file_type().map_err(dir_err)?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }
        let query = std::fs::read_to_string(entry.path()).map_err(dir_err)?;
        migrations.push(Migration::from_file(file_name, query)?);
    }
    Ok(MigrationSet::new(migrations))
}
