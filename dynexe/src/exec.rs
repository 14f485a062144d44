//! Process replacement through the bundled interpreter.

use std::convert::Infallible;
use std::ffi::{CString, OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::error::LaunchError;

/// Makes the interpreter search the given directory for libraries first.
pub const LIBRARY_PATH_FLAG: &str = "--library-path";

/// `[interpreter, --library-path, lib_dir, target, forwarded...]`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecArgv {
    interpreter: PathBuf,
    argv: Vec<OsString>,
}

impl ExecArgv {
    pub fn new(interpreter: &Path, lib_dir: &Path, target: &Path, forwarded: Vec<OsString>) -> Self {
        let mut argv = Vec::with_capacity(forwarded.len() + 4);
        argv.push(interpreter.as_os_str().to_os_string());
        argv.push(OsString::from(LIBRARY_PATH_FLAG));
        argv.push(lib_dir.as_os_str().to_os_string());
        argv.push(target.as_os_str().to_os_string());
        argv.extend(forwarded);

        Self {
            interpreter: interpreter.to_path_buf(),
            argv,
        }
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn args(&self) -> &[OsString] {
        &self.argv
    }

    /// Replace the current process image. Only returns on failure.
    ///
    /// The environment is handed over exactly as inherited.
    pub fn exec(&self) -> LaunchError {
        let source = match self.replace_image() {
            Ok(never) => match never {},
            Err(err) => err,
        };
        LaunchError::Exec {
            interpreter: self.interpreter.clone(),
            source,
        }
    }

    fn replace_image(&self) -> io::Result<Infallible> {
        let program = c_string(self.interpreter.as_os_str())?;
        let argv = self
            .argv
            .iter()
            .map(|arg| c_string(arg))
            .collect::<io::Result<Vec<_>>>()?;
        let argv_ptrs = null_terminated(&argv);

        // SAFETY: every pointer refers to a CString owned by this frame and
        // the array ends with NULL. execv passes the process's own environ
        // block through as-is.
        unsafe {
            libc::execv(program.as_ptr(), argv_ptrs.as_ptr());
        }
        Err(io::Error::last_os_error())
    }
}

fn c_string(value: &OsStr) -> io::Result<CString> {
    CString::new(value.as_bytes()).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

fn null_terminated(values: &[CString]) -> Vec<*const libc::c_char> {
    values
        .iter()
        .map(|value| value.as_ptr())
        .chain(Some(ptr::null()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn argv_prefixes_forwarded_arguments() {
        let exec = ExecArgv::new(
            Path::new("/opt/app/shared/lib/ld-linux-x86-64.so.2"),
            Path::new("/opt/app/shared/lib"),
            Path::new("/opt/app/shared/bin/mytool"),
            vec![OsString::from("--flag"), OsString::from("val")],
        );

        assert_eq!(exec.interpreter(), Path::new("/opt/app/shared/lib/ld-linux-x86-64.so.2"));
        assert_eq!(
            exec.args(),
            [
                "/opt/app/shared/lib/ld-linux-x86-64.so.2",
                "--library-path",
                "/opt/app/shared/lib",
                "/opt/app/shared/bin/mytool",
                "--flag",
                "val",
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn argv_length_is_forwarded_plus_four() {
        let forwarded: Vec<OsString> = (0..7).map(|i| OsString::from(i.to_string())).collect();
        let exec = ExecArgv::new(Path::new("/l/ld-a-b.so.1"), Path::new("/l"), Path::new("/b/t"), forwarded);
        assert_eq!(exec.args().len(), 11);
    }

    #[test]
    fn null_terminated_ends_with_sentinel() {
        let values = vec![CString::new("a").unwrap(), CString::new("b").unwrap()];
        let ptrs = null_terminated(&values);
        assert_eq!(ptrs.len(), 3);
        assert!(ptrs[2].is_null());
        assert_eq!(ptrs[0], values[0].as_ptr());
    }

    #[test]
    fn interior_nul_is_invalid_input() {
        let err = c_string(OsStr::from_bytes(b"a\0b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_interpreter_fails_with_exec_error() {
        let temp = tempfile::tempdir().unwrap();
        let interpreter = temp.path().join("ld-linux-x86-64.so.2");
        let exec = ExecArgv::new(&interpreter, temp.path(), &temp.path().join("tool"), Vec::new());

        let err = exec.exec();
        assert_eq!(err.kind(), ErrorKind::Exec);
        match &err {
            LaunchError::Exec { source, .. } => assert_eq!(source.raw_os_error(), Some(libc::ENOENT)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with(&format!("failed to execute {}: ", interpreter.display())));
    }
}
