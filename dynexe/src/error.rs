use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Resolution,
    Enumeration,
    NotFound,
    Exec,
}

/// Every variant is fatal: the launcher reports it and exits.
#[derive(Debug)]
pub enum LaunchError {
    /// The launcher's own path, or the parent of its `bin/` directory, could not be resolved.
    Resolution { path: PathBuf, source: io::Error },
    /// The library directory could not be opened or read.
    Enumeration { dir: PathBuf, source: io::Error },
    /// The library directory holds no file that looks like a dynamic linker.
    NotFound { dir: PathBuf },
    /// `execv` on the interpreter returned.
    Exec { interpreter: PathBuf, source: io::Error },
}

impl LaunchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LaunchError::Resolution { .. } => ErrorKind::Resolution,
            LaunchError::Enumeration { .. } => ErrorKind::Enumeration,
            LaunchError::NotFound { .. } => ErrorKind::NotFound,
            LaunchError::Exec { .. } => ErrorKind::Exec,
        }
    }

    pub(crate) fn resolution(path: impl AsRef<Path>, source: io::Error) -> Self {
        LaunchError::Resolution {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::Resolution { path, source } => {
                write!(f, "failed to resolve {}: {}", path.display(), source)
            }
            LaunchError::Enumeration { dir, source } => {
                write!(f, "failed to read {}: {}", dir.display(), source)
            }
            LaunchError::NotFound { dir } => {
                write!(f, "no valid linker found in {}", dir.display())
            }
            LaunchError::Exec { interpreter, source } => {
                write!(f, "failed to execute {}: {}", interpreter.display(), source)
            }
        }
    }
}

impl StdError for LaunchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            LaunchError::Resolution { source, .. }
            | LaunchError::Enumeration { source, .. }
            | LaunchError::Exec { source, .. } => Some(source),
            LaunchError::NotFound { .. } => None,
        }
    }
}
