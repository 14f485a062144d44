//! Interpreter discovery.
//!
//! The bundled dynamic linker is recognised by name alone:
//! `ld-<token>-<token>.so.<version>`, e.g. `ld-linux-x86-64.so.2` or
//! `ld-musl-aarch64.so.1`. If several files match, whichever the directory
//! listing yields first wins; the listing is not sorted, so that choice is
//! up to the filesystem.

use std::ffi::OsString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::LaunchError;

const PREFIX: &[u8] = b"ld-";
const SO_MARKER: &[u8] = b".so.";

/// Does `name` look like a dynamic linker?
pub fn is_interpreter_name(name: &[u8]) -> bool {
    let Some(rest) = name.strip_prefix(PREFIX) else {
        return false;
    };
    // Tokens cannot contain '.', so the first dot must open ".so.".
    let Some(dot) = rest.iter().position(|&b| b == b'.') else {
        return false;
    };
    let (stem, tail) = rest.split_at(dot);
    if stem.contains(&b'/') {
        return false;
    }

    // <token>-<token>: some '-' with at least one byte on each side.
    let split = stem
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'-' && i > 0 && i + 1 < stem.len());

    // The version after ".so." may be empty, as with `ld-a-b.so.`.
    split && tail.starts_with(SO_MARKER)
}

/// Return the file name (not the path) of the first regular file in
/// `lib_dir` that passes [`is_interpreter_name`].
pub fn find_interpreter(lib_dir: &Path) -> Result<OsString, LaunchError> {
    let entries = WalkDir::new(lib_dir).max_depth(1).follow_links(true);

    for entry in entries {
        let entry = match entry {
            // lib_dir itself; walkdir yields nothing below a non-directory.
            Ok(entry) if entry.depth() == 0 => {
                if entry.file_type().is_dir() {
                    continue;
                }
                return Err(LaunchError::Enumeration {
                    dir: lib_dir.to_path_buf(),
                    source: io::Error::from_raw_os_error(libc::ENOTDIR),
                });
            }
            Ok(entry) => entry,
            // Depth 0 is lib_dir itself: missing, unreadable, ...
            Err(err) if err.depth() == 0 => {
                return Err(LaunchError::Enumeration {
                    dir: lib_dir.to_path_buf(),
                    source: io::Error::from(err),
                });
            }
            // Dangling symlink or an entry that vanished mid-scan.
            Err(_) => continue,
        };

        if entry.file_type().is_file() && is_interpreter_name(entry.file_name().as_bytes()) {
            return Ok(entry.file_name().to_os_string());
        }
    }

    Err(LaunchError::NotFound {
        dir: lib_dir.to_path_buf(),
    })
}
