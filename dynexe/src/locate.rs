//! Self-location: where is this launcher installed, and which directory is
//! the runtime root?

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LaunchError;

/// Name of the optional directory the launcher may sit in under the root.
pub const BIN_DIR_NAME: &str = "bin";

#[cfg(target_os = "linux")]
const SELF_IMAGE: &str = "/proc/self/exe";

/// Resolve the running image's absolute path. `argv[0]` is never consulted.
#[cfg(target_os = "linux")]
pub fn current_exe() -> Result<PathBuf, LaunchError> {
    fs::canonicalize(SELF_IMAGE).map_err(|err| LaunchError::resolution(SELF_IMAGE, err))
}

#[cfg(not(target_os = "linux"))]
pub fn current_exe() -> Result<PathBuf, LaunchError> {
    let exe = std::env::current_exe()
        .map_err(|err| LaunchError::resolution("current executable", err))?;
    fs::canonicalize(&exe).map_err(|err| LaunchError::resolution(&exe, err))
}

/// Derive the runtime root from the launcher's resolved path.
///
/// A launcher living in `<root>/bin/` belongs to `<root>`; anywhere else the
/// containing directory is the root.
pub fn install_root(exe: &Path) -> Result<PathBuf, LaunchError> {
    let dir = exe.parent().unwrap_or(exe);

    if dir.file_name() == Some(OsStr::new(BIN_DIR_NAME)) {
        let lower_dir = dir.join("..");
        if lower_dir.exists() {
            return fs::canonicalize(&lower_dir)
                .map_err(|err| LaunchError::resolution(&lower_dir, err));
        }
    }

    Ok(dir.to_path_buf())
}
