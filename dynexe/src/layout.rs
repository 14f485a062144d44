use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

pub const SHARED_DIR_NAME: &str = "shared";

/// `<root>/shared/{bin,lib}`, derived once from the install root.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuntimeLayout {
    bin_dir: PathBuf,
    lib_dir: PathBuf,
}

impl RuntimeLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let shared = root.as_ref().join(SHARED_DIR_NAME);
        Self {
            bin_dir: shared.join("bin"),
            lib_dir: shared.join("lib"),
        }
    }

    /// Redistributed executables.
    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Redistributed shared libraries and the interpreter.
    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// `bin_dir + "/" + name`. `name` is appended even when it is absolute.
    pub fn target(&self, name: &OsStr) -> PathBuf {
        concat(&self.bin_dir, name)
    }

    pub fn interpreter(&self, file_name: &OsStr) -> PathBuf {
        concat(&self.lib_dir, file_name)
    }
}

// `Path::join` would replace the base when `name` is absolute.
fn concat(dir: &Path, name: &OsStr) -> PathBuf {
    let mut joined = OsString::with_capacity(dir.as_os_str().len() + 1 + name.len());
    joined.push(dir.as_os_str());
    joined.push("/");
    joined.push(name);
    PathBuf::from(joined)
}
