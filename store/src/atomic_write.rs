//! Crash-safe replacement of the state file.
//!
//! The new contents go to a sibling temp file which is then renamed over the
//! target, so a reader only ever sees the old document or the new one.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// How a replacement is made durable.
#[derive(Debug, Clone, Copy)]
pub struct ReplaceOptions {
    /// `fsync` the temp file before the rename.
    pub sync_file: bool,
    /// Best-effort `fsync` of the parent directory after the rename.
    pub sync_dir: bool,
    /// Unix permission bits applied before any bytes are written.
    pub unix_mode: Option<u32>,
}

impl ReplaceOptions {
    /// Options for files holding credentials or per-user state.
    #[must_use]
    pub const fn private() -> Self {
        Self {
            sync_file: true,
            sync_dir: true,
            unix_mode: Some(0o600),
        }
    }
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            sync_file: true,
            sync_dir: false,
            unix_mode: None,
        }
    }
}

/// Replace `path` with `bytes`, creating missing parent directories.
pub fn replace_file(path: &Path, bytes: &[u8], options: ReplaceOptions) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    if let Some(mode) = options.unix_mode {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(mode))?;
    }

    staged.write_all(bytes)?;
    if options.sync_file {
        staged.as_file().sync_all()?;
    }
    staged.persist(path).map_err(|e| e.error)?;

    if options.sync_dir {
        sync_dir(dir);
    }
    Ok(())
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %dir.display(), "directory fsync failed: {e}");
    }
    #[cfg(not(unix))]
    let _ = dir;
}
