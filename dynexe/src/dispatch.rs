use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

/// Invoked under this name, the launcher takes the target from its first argument.
pub const DYNEXE_NAME: &str = "dynexe";

/// Which binary in `shared/bin` to run, and what to hand it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dispatch {
    pub bin_name: OsString,
    pub args: Vec<OsString>,
}

impl Dispatch {
    /// `argv` is the launcher's full argument vector, slot 0 included.
    ///
    /// `dynexe tool a b` selects `tool` and forwards `a b`. Any other name,
    /// e.g. a `tool -> dynexe` symlink run as `tool a b`, selects itself and
    /// forwards everything after slot 0.
    pub fn from_args<I>(argv: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);

        let mut bin_name = match argv.next() {
            Some(arg0) => basename(&arg0).to_os_string(),
            None => OsString::from(DYNEXE_NAME),
        };
        let mut args: Vec<OsString> = argv.collect();

        if bin_name == DYNEXE_NAME && !args.is_empty() {
            bin_name = args.remove(0);
        }

        Self { bin_name, args }
    }
}

fn basename(path: &OsStr) -> &OsStr {
    let bytes = path.as_bytes();
    match bytes.iter().rposition(|&b| b == b'/') {
        Some(slash) => OsStr::from_bytes(&bytes[slash + 1..]),
        None => path,
    }
}
