//! The `~/.pulse` data directory and owner-only directory creation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DATA_DIR_NAME: &str = ".pulse";

/// `~/.pulse`, home of the default config file and results database.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
}

/// Create `path` and any missing parents as owner-only directories.
///
/// Directories that already exist keep their permissions, except the default
/// data directory, which is tightened to `0o700` when we own it.
pub fn ensure_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;

    #[cfg(unix)]
    {
        if data_dir().as_deref() == Some(path) {
            tighten_if_owned(path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn tighten_if_owned(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let metadata = fs::metadata(path)?;
    let our_uid = unsafe { libc::getuid() };
    if metadata.uid() == our_uid && metadata.permissions().mode() & 0o077 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
