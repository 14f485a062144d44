//! `dynexe`: run a bundled binary through a bundled dynamic linker.
//!
//! Installed layout:
//!
//! ```text
//! <root>/
//!   bin/dynexe              (optional; the launcher may also sit in <root>)
//!   shared/bin/<tool>       targets
//!   shared/lib/ld-*-*.so.*  the interpreter
//!   shared/lib/*.so*        everything the targets link against
//! ```
//!
//! `dynexe <tool> args...`, or a copy/link of the launcher named `<tool>`,
//! becomes `<interpreter> --library-path <root>/shared/lib <root>/shared/bin/<tool> args...`.

#[cfg(not(unix))]
compile_error!("dynexe replaces itself with execv and only supports unix targets");

pub mod dispatch;
pub mod error;
pub mod exec;
pub mod interpreter;
pub mod layout;
pub mod locate;

use std::convert::Infallible;
use std::ffi::OsString;
use std::path::Path;

pub use crate::dispatch::{Dispatch, DYNEXE_NAME};
pub use crate::error::{ErrorKind, LaunchError};
pub use crate::exec::ExecArgv;
pub use crate::layout::RuntimeLayout;

/// Everything up to, but not including, the `execv`.
///
/// `exe` is the launcher's resolved path and `argv` its full argument vector.
pub fn plan<I>(exe: &Path, argv: I) -> Result<ExecArgv, LaunchError>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let root = locate::install_root(exe)?;
    let layout = RuntimeLayout::new(root);

    let dispatch = Dispatch::from_args(argv);
    let target = layout.target(&dispatch.bin_name);

    let linker_name = interpreter::find_interpreter(layout.lib_dir())?;
    let linker = layout.interpreter(&linker_name);

    Ok(ExecArgv::new(&linker, layout.lib_dir(), &target, dispatch.args))
}

/// Resolve, plan and replace the current process. Returns only on failure.
pub fn run() -> Result<Infallible, LaunchError> {
    let exe = locate::current_exe()?;
    let exec = plan(&exe, std::env::args_os())?;
    Err(exec.exec())
}
