//! Owner-only permissions for the results database and its directory.

use std::fs::{self, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};

use pulse_config::ensure_private_dir;

pub(crate) fn prepare_db_path(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_private_dir(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    ensure_secure_db_file(path)
}

fn ensure_secure_db_file(path: &Path) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("Failed to create database file: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set database permissions: {}", path.display()))?;
    }
    Ok(())
}
